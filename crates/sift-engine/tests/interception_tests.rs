use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use sift_core::matcher::decide;
use sift_core::request::{Decision, RequestDescriptor};
use sift_core::types::ResourceType;
use sift_engine::{Interceptor, MatchEvent};
use tokio::sync::mpsc;

mod helpers;
use helpers::{open_manager, MockFetcher, EASYLIST, TRACKERS};

const EASYLIST_URL: &str = "https://lists.example.com/easylist.txt";
const TRACKERS_URL: &str = "https://lists.example.com/trackers.txt";

fn script(url: &str, document: &str) -> RequestDescriptor {
    RequestDescriptor::new(url, document, ResourceType::SCRIPT)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<MatchEvent>) -> Vec<MatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_should_block_with_attribution() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(MockFetcher::new().with_list(EASYLIST_URL, EASYLIST));
    let manager = open_manager(dir.path(), fetcher).await;
    let id = manager.add(EASYLIST_URL, "EasyList").await.unwrap();
    manager.refresh_now(id).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let interceptor = Interceptor::new(manager.index_handle()).with_sink(Arc::new(tx));

    let ad = script("https://ads.example.com/x.js", "https://news.org/");
    let sub = script("https://sub.ads.example.com/x.js", "https://news.org/");
    let not_ad = script("https://notads.example.com/x.js", "https://news.org/");
    let allowed = script("https://ads.example.com/allowed.js", "https://news.org/");

    assert!(interceptor.should_block(&ad).is_blocked());
    assert!(interceptor.should_block(&sub).is_blocked());
    assert_eq!(interceptor.should_block(&not_ad), Decision::Allow);
    assert_eq!(interceptor.should_block(&allowed), Decision::Allow);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.subscription() == Some(id)));
    assert!(events.iter().all(|e| e.subscription_title.as_deref() == Some("EasyList")));
    assert_eq!(events[0].pattern(), Some("||ads.example.com^"));

    let response = interceptor.intercept(&ad).unwrap();
    assert_eq!(response.status, 403);
    assert_eq!(response.message, "Advertisement has been blocked");
}

#[tokio::test]
async fn test_disabling_subscription_stops_its_events() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_list(EASYLIST_URL, EASYLIST)
            .with_list(TRACKERS_URL, TRACKERS),
    );
    let manager = open_manager(dir.path(), fetcher).await;
    let easylist = manager.add(EASYLIST_URL, "EasyList").await.unwrap();
    let trackers = manager.add(TRACKERS_URL, "Trackers").await.unwrap();
    manager.refresh_all().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let interceptor = Interceptor::new(manager.index_handle()).with_sink(Arc::new(tx));
    let requests = [
        script("https://ads.example.com/x.js", "https://shop.example.com/"),
        script("https://tracker.net/t.js", "https://shop.example.com/"),
        script("https://metrics.example.org/m.js", "https://shop.example.com/"),
    ];

    for request in &requests {
        assert!(interceptor.should_block(request).is_blocked());
    }
    assert_eq!(interceptor.cosmetic_rules_for("shop.example.com"), vec![".ad-banner", ".tracking-pixel"]);
    let before = drain(&mut rx);
    assert_eq!(before.iter().filter(|e| e.subscription() == Some(trackers)).count(), 2);

    manager.set_enabled(trackers, false).await.unwrap();
    for request in &requests {
        interceptor.should_block(request);
    }
    let after = drain(&mut rx);
    assert_eq!(after.len(), 1);
    assert!(after.iter().all(|e| e.subscription() == Some(easylist)));
    assert_eq!(interceptor.cosmetic_rules_for("shop.example.com"), vec![".ad-banner"]);
    assert_eq!(
        interceptor.stylesheet_for("shop.example.com"),
        ".ad-banner{display:none !important;}"
    );
}

#[tokio::test]
async fn test_third_party_and_type_constraints_through_facade() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_list(EASYLIST_URL, EASYLIST)
            .with_list(TRACKERS_URL, TRACKERS),
    );
    let manager = open_manager(dir.path(), fetcher).await;
    manager.add(EASYLIST_URL, "EasyList").await.unwrap();
    manager.add(TRACKERS_URL, "Trackers").await.unwrap();
    manager.refresh_all().await.unwrap();
    let interceptor = Interceptor::new(manager.index_handle());

    let first_party = script("https://tracker.net/t.js", "https://www.tracker.net/");
    assert_eq!(interceptor.should_block(&first_party), Decision::Allow);

    let banner_image = RequestDescriptor::new("https://cdn.site.org/banner/1.png", "https://site.org/", ResourceType::IMAGE);
    let banner_script = script("https://cdn.site.org/banner/1.js", "https://site.org/");
    assert!(interceptor.should_block(&banner_image).is_blocked());
    assert_eq!(interceptor.should_block(&banner_script), Decision::Allow);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_reads_during_rebuild_see_whole_snapshots() {
    const READERS: usize = 100;
    const CALLS_BEFORE_PUBLISH: usize = 10;

    let dir = tempfile::tempdir().unwrap();
    let (fetcher, gate) = MockFetcher::gated();
    let fetcher = Arc::new(fetcher.with_list(EASYLIST_URL, EASYLIST).with_list(TRACKERS_URL, TRACKERS));
    let manager = Arc::new(open_manager(dir.path(), fetcher).await);
    let easylist = manager.add(EASYLIST_URL, "EasyList").await.unwrap();
    gate.notify_one();
    manager.refresh_now(easylist).await.unwrap();
    let trackers = manager.add(TRACKERS_URL, "Trackers").await.unwrap();

    let old_version = manager.version();
    let old_rules = manager.current_index().network_rule_count();
    let handle = manager.index_handle();
    let interceptor = manager.interceptor();

    // held at the fetch until every reader has gone through the old snapshot
    let rebuild = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.refresh_now(trackers).await })
    };

    let ad = script("https://ads.example.com/x.js", "https://news.org/");
    let tracker = script("https://tracker.net/t.js", "https://news.org/");
    let read_old = Barrier::new(READERS + 1);
    let calls = AtomicUsize::new(0);

    let check = |saw_new: &mut bool| {
        let snapshot = handle.load_full();
        let is_new = snapshot.version() > old_version;
        if is_new {
            assert_eq!(snapshot.network_rule_count(), old_rules + 2);
        } else {
            assert_eq!(snapshot.network_rule_count(), old_rules);
        }
        assert!(decide(&snapshot, &ad).is_blocked());
        assert_eq!(decide(&snapshot, &tracker).is_blocked(), is_new);
        assert_eq!(snapshot.contains_subscription(trackers), is_new);
        assert!(interceptor.should_block(&ad).is_blocked());
        calls.fetch_add(1, Ordering::Relaxed);
        *saw_new |= is_new;
        is_new
    };

    std::thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                let mut saw_new = false;
                for _ in 0..CALLS_BEFORE_PUBLISH {
                    assert!(!check(&mut saw_new));
                }
                read_old.wait();

                let deadline = Instant::now() + Duration::from_secs(10);
                while !check(&mut saw_new) && Instant::now() < deadline {
                    std::thread::yield_now();
                }
                assert!(saw_new, "reader never observed the rebuilt index");
            });
        }

        read_old.wait();
        gate.notify_one();
    });

    rebuild.await.unwrap().unwrap();
    assert!(calls.load(Ordering::Relaxed) >= READERS * (CALLS_BEFORE_PUBLISH + 1));
    assert!(manager.version() > old_version);
    assert!(interceptor.should_block(&tracker).is_blocked());
}

#[tokio::test]
async fn test_filtering_switch_bypasses_rules_without_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(MockFetcher::new().with_list(EASYLIST_URL, EASYLIST));
    let manager = open_manager(dir.path(), Arc::clone(&fetcher)).await;
    let id = manager.add(EASYLIST_URL, "EasyList").await.unwrap();
    manager.refresh_now(id).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let interceptor = manager.interceptor().with_sink(Arc::new(tx));
    let ad = script("https://ads.example.com/x.js", "https://news.org/");
    let version = manager.version();

    manager.set_filtering_enabled(false).await.unwrap();
    assert_eq!(interceptor.should_block(&ad), Decision::Allow);
    assert!(interceptor.cosmetic_rules_for("news.org").is_empty());
    assert!(drain(&mut rx).is_empty());
    assert_eq!(manager.version(), version);
    assert!(manager.subscription(id).unwrap().subscription.enabled);

    manager.set_filtering_enabled(true).await.unwrap();
    assert!(interceptor.should_block(&ad).is_blocked());
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(interceptor.stylesheet_for("news.org"), ".ad-banner{display:none !important;}");
}
