//! # Castline — bulk dispatch operator CLI
//!
//! Manages the destination pool and outcome log, and drives dispatch cycles
//! through a dry-run transport that logs instead of sending.
//!
//! Usage:
//!   castline config init                    # Write default config
//!   castline add <id> <name> --alias foo    # Add a destination
//!   castline list --eligible                # Destinations eligible right now
//!   castline summary                        # Availability counts + 24h stats
//!   castline send --template "hi" g1 g2     # One manual round
//!   castline run --template "hi"            # Jittered cycles until Ctrl-C

mod dry_run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use castline_core::types::{Destination, Session};
use castline_core::CastlineConfig;
use castline_scheduler::{DispatchService, SessionRegistry};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::dry_run::DryRunTransport;

#[derive(Parser)]
#[command(
    name = "castline",
    version,
    about = "📣 Castline — paced bulk dispatch with availability tracking"
)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = "~/.castline/config.toml")]
    config: String,

    /// Database path (overrides the config file)
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Add a destination to the pool
    Add {
        id: String,
        name: String,
        #[arg(long)]
        alias: Option<String>,
        /// Owning account scope
        #[arg(long)]
        account: Option<String>,
    },
    /// Remove a destination from the pool
    Remove { id: String },
    /// List destinations
    List {
        /// Only destinations eligible right now
        #[arg(long)]
        eligible: bool,
        #[arg(long)]
        json: bool,
    },
    /// Availability counts and last-24h outcome stats
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Move a suppressed destination back to active
    Reactivate { id: String },
    /// Show the dispatch outcome log, newest first
    Logs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// Run one dispatch round over the given destinations
    Send {
        #[arg(short, long)]
        template: String,
        #[command(flatten)]
        session: SessionArgs,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Run jittered dispatch cycles until Ctrl-C
    Run {
        #[arg(short, long)]
        template: String,
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file (keeps an existing one)
    Init,
    /// Print the effective config
    Show,
}

#[derive(clap::Args)]
struct SessionArgs {
    #[arg(long, default_value = "dry-run")]
    session: String,
    #[arg(long, default_value = "local")]
    account: String,
    /// Share of sends that fail with a transient error (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    fail_rate: f64,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "castline=debug,castline_scheduler=debug"
    } else {
        "castline=info,castline_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = PathBuf::from(expand_path(&cli.config));

    if let Command::Config { action } = &cli.command {
        return config_command(action, &config_path);
    }

    let mut config = if config_path.exists() {
        CastlineConfig::load_from(&config_path)?
    } else {
        CastlineConfig::default()
    };
    if let Some(db_path) = &cli.db_path {
        config.store.path = db_path.clone();
    }
    config.store.path = expand_path(&config.store.path);

    let registry = Arc::new(SessionRegistry::new());
    let service = DispatchService::from_config(&config, registry.clone())
        .with_context(|| format!("opening store at {}", config.store.path))?;

    match cli.command {
        Command::Config { .. } => {}
        Command::Add {
            id,
            name,
            alias,
            account,
        } => {
            let mut dest = Destination::new(&id, &name);
            if let Some(alias) = alias {
                dest = dest.with_alias(&alias);
            }
            if let Some(account) = account {
                dest = dest.with_account(&account);
            }
            service.add_destination(dest)?;
            println!("✅ Added {id}");
        }
        Command::Remove { id } => {
            if service.remove_destination(&id)? {
                println!("🗑️  Removed {id}");
            } else {
                println!("⚠️  No destination '{id}'");
            }
        }
        Command::List { eligible, json } => {
            let destinations = if eligible {
                service.list_eligible_destinations()?
            } else {
                service.destinations()?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&destinations)?);
            } else {
                print_destinations(&destinations);
            }
        }
        Command::Summary { json } => {
            let stats = service.dashboard_stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let a = &stats.availability;
                println!("📊 Destinations: {}", a.total());
                println!("   active:               {}", a.active);
                println!("   suppressed_temporary: {}", a.suppressed_temporary);
                println!("   suppressed_permanent: {}", a.suppressed_permanent);
                println!("📈 Last 24h: {} sent, {} failed", stats.sent_last_24h, stats.failed_last_24h);
            }
        }
        Command::Reactivate { id } => {
            if service.reactivate(&id)? {
                println!("🔓 Reactivated {id}");
            } else {
                println!("ℹ️  {id} is already active");
            }
        }
        Command::Logs {
            limit,
            offset,
            json,
        } => {
            let outcomes = service.recent_outcomes(limit, offset)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                for o in &outcomes {
                    println!(
                        "{}  {:<24} {:<24} attempts={} {}",
                        o.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        o.destination_id,
                        o.status.as_str(),
                        o.attempts,
                        o.error_detail.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Command::Send {
            template,
            session,
            ids,
        } => {
            register(&registry, &session).await;
            let outcomes = service.run_one_cycle(&session.session, &ids, &template).await?;
            for o in &outcomes {
                println!("{:<24} {}", o.destination_id, o.status);
            }
        }
        Command::Run { template, session } => {
            register(&registry, &session).await;
            service
                .start_cycles(&session.session, &template, service.pacing().clone())
                .await?;
            println!("▶️  Cycles running for session '{}'. Ctrl-C to stop.", session.session);
            tokio::signal::ctrl_c().await?;
            println!("\n⏹️  Stopping...");
            service.shutdown().await;
            for run in service.cycle_history(10).iter().rev() {
                println!(
                    "{}  sent={} failed={} {}",
                    run.started_at.format("%H:%M:%S"),
                    run.sent,
                    run.failed,
                    run.error.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn config_command(action: &ConfigAction, path: &std::path::Path) -> Result<()> {
    match action {
        ConfigAction::Init => {
            if path.exists() {
                println!("⚠️  Config already exists at {}", path.display());
            } else {
                CastlineConfig::default().save_to(path)?;
                println!("✅ Wrote {}", path.display());
            }
        }
        ConfigAction::Show => {
            let config = if path.exists() {
                CastlineConfig::load_from(path)?
            } else {
                CastlineConfig::default()
            };
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

async fn register(registry: &SessionRegistry, args: &SessionArgs) {
    let mut session = Session::new(&args.session, &args.account);
    session.label = Some("dry-run".into());
    registry
        .set(session, Arc::new(DryRunTransport::new(args.fail_rate)))
        .await;
}

fn print_destinations(destinations: &[Destination]) {
    if destinations.is_empty() {
        println!("(no destinations)");
        return;
    }
    for d in destinations {
        let until = d
            .availability
            .suppressed_until()
            .map(|t| format!(" until {}", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        let reason = d
            .availability
            .reason()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        println!(
            "{:<24} {:<28} {}{}{}  sent={}",
            d.id,
            d.name,
            d.availability.kind(),
            reason,
            until,
            d.send_count
        );
    }
}
