//! butler
//!
//! Keeps a downstream service's configuration in sync with remote repositories.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                          BUTLER                           │
//!                 │                                                           │
//!   Remote repos  │  ┌───────────┐   ┌──────────┐   ┌──────────┐             │
//!   http/s3/blob ─┼─▶│ retrieval │──▶│  render  │──▶│ validate │             │
//!   etcd/file     │  └───────────┘   └──────────┘   └────┬─────┘             │
//!                 │                                      ▼                    │
//!                 │                               ┌─────────────┐             │
//!                 │                               │ engine event│ commit gate │
//!                 │                               └──────┬──────┘             │
//!                 │                       ok ┌───────────┴──────────┐ failed  │
//!                 │                          ▼                      ▼         │
//!   Local files ◀─┼──────────────────── ┌─────────┐          ┌────────────┐   │
//!                 │                     │  merge  │          │   cache    │   │
//!                 │                     └────┬────┘          │  fallback  │   │
//!                 │                 changed  ▼               └────────────┘   │
//!   Service     ◀─┼─────────────────── ┌──────────┐                           │
//!   reload        │                    │ reloader │      status file, metrics │
//!                 │                    └──────────┘                           │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use butler::lifecycle::{self, StartupOptions};

#[derive(Debug, Parser)]
#[command(name = "butler", version, about = "Configuration synchronization daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/butler/butler.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run one reconciliation pass per manager and exit.
    #[arg(long)]
    once: bool,

    /// Do not reload when the configuration file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    lifecycle::run(StartupOptions {
        config_path: cli.config,
        log_level: cli.log_level,
        once: cli.once,
        watch: !cli.no_watch,
    })
    .await?;

    Ok(())
}
