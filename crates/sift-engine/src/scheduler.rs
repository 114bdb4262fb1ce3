use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::SubscriptionManager;

/// Background job refreshing subscriptions whose interval has elapsed.
///
/// The first tick fires immediately, so subscriptions that were never
/// fetched (or whose cache was discarded) are refreshed at startup.
pub struct RefreshScheduler {
    manager: Arc<SubscriptionManager>,
    tick: Duration,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        let tick = manager.config().scheduler_tick();
        let shutdown = manager.shutdown_token();
        Self {
            manager,
            tick,
            shutdown,
        }
    }

    pub fn with_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        log::info!("starting refresh scheduler, tick every {:?}", self.tick);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        log::info!("refresh scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.manager.refresh_due().await {
                            Ok(0) => log::trace!("no subscriptions due"),
                            Ok(n) => log::info!("refreshed {} subscriptions", n),
                            Err(e) => log::error!("scheduled refresh failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
