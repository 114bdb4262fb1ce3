use std::sync::Arc;

use clap::{Subcommand, ValueEnum};

use sift_core::SubscriptionId;
use sift_engine::{EngineConfig, HttpFetcher, SubscriptionManager, SubscriptionStatus};

#[derive(Subcommand)]
pub enum SubscriptionCommand {
    /// List subscriptions and their status
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Subscribe to a filter list (http(s):// or file:// locator)
    Add {
        locator: String,

        #[arg(short, long)]
        title: Option<String>,

        /// Register only, do not fetch now
        #[arg(long)]
        no_fetch: bool,
    },

    /// Delete a subscription and its cached text
    Remove { id: u32 },

    Enable { id: u32 },

    Disable { id: u32 },

    /// Show or set the engine-wide filtering switch
    Filtering { state: Option<Switch> },

    /// Fetch one subscription, or every enabled one
    Refresh {
        id: Option<u32>,

        /// Only subscriptions whose refresh interval has elapsed
        #[arg(long, conflicts_with = "id")]
        due: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

pub fn run(config: EngineConfig, command: SubscriptionCommand) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {e}"))?;
    runtime.block_on(run_command(config, command))
}

async fn run_command(config: EngineConfig, command: SubscriptionCommand) -> Result<(), String> {
    let fetcher = HttpFetcher::new(&config).map_err(|e| e.to_string())?;
    let manager = SubscriptionManager::open(config, Arc::new(fetcher))
        .await
        .map_err(|e| e.to_string())?;

    match command {
        SubscriptionCommand::List { json } => print_subscriptions(&manager.subscriptions(), json)?,
        SubscriptionCommand::Add {
            locator,
            title,
            no_fetch,
        } => {
            let title = title.unwrap_or_else(|| locator.clone());
            let id = manager.add(&locator, &title).await.map_err(|e| e.to_string())?;
            println!("Added subscription {} ({})", id.0, title);
            if !no_fetch {
                manager.refresh_now(id).await.map_err(|e| e.to_string())?;
                report(&manager, id);
            }
        }
        SubscriptionCommand::Remove { id } => {
            manager.remove(SubscriptionId(id)).await.map_err(|e| e.to_string())?;
            println!("Removed subscription {}", id);
        }
        SubscriptionCommand::Enable { id } => {
            manager.set_enabled(SubscriptionId(id), true).await.map_err(|e| e.to_string())?;
            println!("Enabled subscription {}", id);
        }
        SubscriptionCommand::Disable { id } => {
            manager.set_enabled(SubscriptionId(id), false).await.map_err(|e| e.to_string())?;
            println!("Disabled subscription {}", id);
        }
        SubscriptionCommand::Filtering { state } => {
            if let Some(state) = state {
                manager
                    .set_filtering_enabled(matches!(state, Switch::On))
                    .await
                    .map_err(|e| e.to_string())?;
            }
            println!("Filtering is {}", if manager.is_filtering_enabled() { "on" } else { "off" });
        }
        SubscriptionCommand::Refresh { id: Some(id), .. } => {
            let id = SubscriptionId(id);
            manager.refresh_now(id).await.map_err(|e| e.to_string())?;
            report(&manager, id);
        }
        SubscriptionCommand::Refresh { id: None, due } => {
            let refreshed = if due {
                manager.refresh_due().await
            } else {
                manager.refresh_all().await
            }
            .map_err(|e| e.to_string())?;
            println!("Refreshed {} subscriptions", refreshed);
            print_subscriptions(&manager.subscriptions(), false)?;
        }
    }

    let index = manager.current_index();
    log::debug!(
        "index v{}: {} network rules, {} cosmetic rules",
        index.version(),
        index.network_rule_count(),
        index.cosmetic_rule_count()
    );
    Ok(())
}

fn report(manager: &SubscriptionManager, id: SubscriptionId) {
    if let Some(status) = manager.subscription(id) {
        println!(
            "  {} rules accepted, {} lines skipped",
            status.subscription.stats.rules_accepted, status.subscription.stats.lines_skipped
        );
    }
}

fn print_subscriptions(subscriptions: &[SubscriptionStatus], json: bool) -> Result<(), String> {
    if json {
        let out = serde_json::to_string_pretty(subscriptions).map_err(|e| e.to_string())?;
        println!("{out}");
        return Ok(());
    }

    if subscriptions.is_empty() {
        println!("No subscriptions");
        return Ok(());
    }

    println!("{:>4}  {:<8}  {:<10}  {:>7}  {:>7}  TITLE", "ID", "ENABLED", "STATE", "RULES", "SKIPPED");
    for status in subscriptions {
        let sub = &status.subscription;
        let state = if sub.last_fetched.is_none() {
            "never".to_string()
        } else {
            format!("{:?}", status.state).to_lowercase()
        };
        println!(
            "{:>4}  {:<8}  {:<10}  {:>7}  {:>7}  {}",
            sub.id.0, sub.enabled, state, sub.stats.rules_accepted, sub.stats.lines_skipped, sub.title
        );
        println!("      {}", sub.locator);
        if let Some(error) = &status.last_error {
            println!("      last error: {}", error);
        }
    }
    Ok(())
}
