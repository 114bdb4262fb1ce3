//! Sift CLI
//!
//! Inspect filter lists, try requests against them and manage the
//! subscription cache used by the engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use sift_compiler::{build_index, parse_filter_list, ParsedList};
use sift_core::{Matcher, RequestDescriptor, ResourceType, SubscriptionId};
use sift_engine::{build_stylesheet, EngineConfig};

mod subscriptions;

use subscriptions::SubscriptionCommand;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Sift content filter tools")]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true, default_value = "sift.json")]
    config: PathBuf,

    /// Override the subscription cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse filter lists and report statistics
    Check {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,
    },

    /// Decide one request against local filter lists
    Match {
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Top-level document URL
        #[arg(short, long, default_value = "")]
        document: String,

        /// Resource type (script, image, stylesheet, document, ...)
        #[arg(short = 't', long = "type", default_value = "other")]
        resource_type: String,
    },

    /// Print the element-hiding stylesheet for a domain
    Cosmetic {
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        #[arg(short, long)]
        domain: String,
    },

    /// Manage subscriptions in the cache directory
    Subscriptions {
        #[command(subcommand)]
        command: SubscriptionCommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let result = match cli.command {
        Commands::Check { input } => cmd_check(&input),
        Commands::Match {
            input,
            url,
            document,
            resource_type,
        } => cmd_match(&input, &url, &document, &resource_type),
        Commands::Cosmetic { input, domain } => cmd_cosmetic(&input, &domain),
        Commands::Subscriptions { command } => {
            load_config(&cli.config, cli.cache_dir).and_then(|config| subscriptions::run(config, command))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: &Path, cache_dir: Option<PathBuf>) -> Result<EngineConfig, String> {
    let config = EngineConfig::load(path).map_err(|e| e.to_string())?;
    Ok(match cache_dir {
        Some(dir) => config.with_cache_dir(dir),
        None => config,
    })
}

/// Parse every input file as its own list, numbered from 1 in argument order.
fn load_lists(inputs: &[PathBuf]) -> Result<Vec<ParsedList>, String> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let content =
                fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
            Ok(parse_filter_list(&content, SubscriptionId(i as u32 + 1)))
        })
        .collect()
}

fn cmd_check(inputs: &[PathBuf]) -> Result<(), String> {
    let start = Instant::now();
    let lists = load_lists(inputs)?;
    let parse_time = start.elapsed();

    for (path, list) in inputs.iter().zip(&lists) {
        println!(
            "  {} - {} rules accepted, {} lines skipped ({} network, {} cosmetic)",
            path.file_name().unwrap_or_default().to_string_lossy(),
            list.stats.rules_accepted,
            list.stats.lines_skipped,
            list.network.len(),
            list.cosmetic.len()
        );
    }

    let build_start = Instant::now();
    let (index, stats) = build_index(&lists);
    let build_time = build_start.elapsed();

    println!("Checked {} filter lists", lists.len());
    println!(
        "  Network:  {} -> {} (dedupe removed {}, badfilter removed {})",
        stats.optimize.before,
        stats.optimize.after,
        stats.optimize.deduped,
        stats.optimize.badfilter_rules + stats.optimize.badfiltered_rules
    );
    println!("  Cosmetic: {} (dedupe removed {})", stats.cosmetic_rules, stats.cosmetic_deduped);
    println!("  Index:    {} token buckets, {} residual rules", index.token_count(), index.residual_count());
    println!(
        "  Time:     {:.1}ms (parse: {:.1}ms, build: {:.1}ms)",
        start.elapsed().as_secs_f64() * 1000.0,
        parse_time.as_secs_f64() * 1000.0,
        build_time.as_secs_f64() * 1000.0,
    );

    Ok(())
}

fn cmd_match(inputs: &[PathBuf], url: &str, document: &str, resource_type: &str) -> Result<(), String> {
    let resource_type: ResourceType = resource_type.parse().map_err(|e| format!("{e}"))?;
    let lists = load_lists(inputs)?;
    let (index, _) = build_index(&lists);

    let request = RequestDescriptor::new(url, document, resource_type);
    let start = Instant::now();
    let decision = Matcher::new(&index).decide(&request);
    let elapsed = start.elapsed();

    match decision.rule() {
        Some(rule) => {
            let source = inputs
                .get((rule.subscription.0 as usize).saturating_sub(1))
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("BLOCK {}", url);
            println!("  Rule:   {}", rule.raw);
            println!("  List:   {}", source);
        }
        None => println!("ALLOW {}", url),
    }
    println!("  Third-party: {}", request.is_third_party());
    println!("  Time:   {:.1}us", elapsed.as_secs_f64() * 1_000_000.0);

    Ok(())
}

fn cmd_cosmetic(inputs: &[PathBuf], domain: &str) -> Result<(), String> {
    let lists = load_lists(inputs)?;
    let (index, _) = build_index(&lists);
    let selectors = Matcher::new(&index).cosmetic_selectors(domain);

    if selectors.is_empty() {
        println!("/* no cosmetic rules for {} */", domain);
    } else {
        println!("{}", build_stylesheet(&selectors));
    }
    Ok(())
}
