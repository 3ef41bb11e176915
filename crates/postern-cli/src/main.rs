//! `postern` — drive and inspect the daily message quota from a terminal.
//!
//! This is the local stand-in for whatever front end consumes the limiter:
//! it runs the same check-then-record sequence a contact form would, and
//! adds inspection commands the library keeps out of its public surface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use postern_core::{Config, FileStore, MessageLimiter};

#[derive(Parser)]
#[command(name = "postern", version, about = "Device-fingerprinted daily message quota")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether this device may send another message today
    Check,
    /// Record one dispatched message against today's bucket
    Record {
        /// Record even when the admission check says no
        #[arg(long)]
        force: bool,
    },
    /// Print the decoded usage database
    Status,
    /// Print the current device fingerprint
    Fingerprint {
        /// Also print the individual signal values feeding the hash
        #[arg(long)]
        signals: bool,
    },
    /// Drop all stored usage state
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let store = FileStore::open(&config.data_dir).with_context(|| {
        format!(
            "failed to open data directory {}",
            config.data_dir.display()
        )
    })?;
    let limiter = MessageLimiter::new(store, config);

    match cli.command {
        Command::Check => {
            let decision = limiter.can_send_message().await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Record { force } => {
            // Same contract as a real front end: check, then record only
            // what was admitted.
            if !force {
                let decision = limiter.can_send_message().await;
                if !decision.allowed {
                    println!("{}", serde_json::to_string_pretty(&decision)?);
                    anyhow::bail!("daily quota exhausted — message not recorded");
                }
            }
            limiter.record_message_sent().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&limiter.can_send_message().await)?
            );
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&limiter.snapshot())?);
        }
        Command::Fingerprint { signals } => {
            if signals {
                let (values, _) = postern_core::signals::collect();
                for (name, value) in values {
                    println!("{name}: {value}");
                }
            }
            println!("{}", postern_core::fingerprint::generate());
        }
        Command::Reset => {
            limiter.reset().context("failed to clear usage state")?;
            println!("usage state cleared");
        }
    }

    Ok(())
}
