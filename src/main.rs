//! # reposyncd
//!
//! A mirror and snapshot manager for RPM and Debian package repositories.
//! Fetches upstream metadata and packages into a content-addressed store,
//! and builds immutable, alias-able snapshots of that store on demand.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!                    │   CLI (clap) │
//!                    └──────┬───────┘
//!                           │
//!                    ┌──────▼───────┐
//!                    │    Runner    │  fixed worker pool, one job queue
//!                    └──────┬───────┘
//!              ┌────────────┼────────────┐
//!              ▼            ▼            ▼
//!         ┌─────────┐ ┌──────────┐ ┌──────────┐
//!         │ Mirror  │ │ Snapshot │ │ Migrate  │
//!         │(rpm/deb)│ │  store   │ │          │
//!         └────┬────┘ └──────────┘ └──────────┘
//!              │
//!      ┌───────┴───────┐
//!      ▼               ▼
//! ┌────────┐    ┌──────────────┐
//! │ Hasher │    │   Fetcher    │
//! │(md5/sha)│   │   (ureq)     │
//! └────────┘    └──────────────┘
//! ```

mod config;
mod deb_meta;
mod error;
mod fetcher;
mod hasher;
mod logging;
mod migrate;
mod mirror;
mod rpm_meta;
mod runner;
mod snapshot;

use clap::{Parser, Subcommand};
use colored::Colorize;
use error::{ConfigError, RepoSyncError};
use std::path::PathBuf;

const DEFAULT_CFG: &str = "/etc/reposyncd/reposync.ini";

/// reposyncd — mirrors and snapshots RPM and Debian package repositories
#[derive(Parser, Debug)]
#[command(
    name = "reposyncd",
    version,
    about = "Mirror and snapshot RPM and Debian package repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Full path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CFG)]
    cfg: PathBuf,

    /// Execute the command on this repository only (mutually exclusive with --tags)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Comma separated list of tags; a leading '!' negates a tag (mutually exclusive with --repo)
    #[arg(long, global = true)]
    tags: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch upstream metadata and content for every selected repository
    Sync,

    /// Create a new dated snapshot and repoint `latest` at it
    Snap,

    /// Delete unreferenced timestamp snapshots
    SnapCleanup,

    /// List existing snapshots and their aliases
    SnapList,

    /// Give a timestamp (or another named snapshot) a durable name
    SnapName {
        /// Source timestamp, or the name of an existing named/latest snapshot
        #[arg(long)]
        timestamp: String,
        /// Name to create
        #[arg(long = "name")]
        snapname: String,
    },

    /// Remove a named snapshot alias
    SnapUnname {
        /// Name to remove
        #[arg(long = "name")]
        snapname: String,
    },

    /// Re-validate already-downloaded package hashes without re-fetching
    Validate,

    /// One-shot migration of a legacy layout to content-addressed naming
    Migrate,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {e}", "error:".red());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RepoSyncError> {
    let cfg = config::load_config(&cli.cfg)?;
    logging::init(&cfg.main.loglevel);

    if cli.repo.is_some() && cli.tags.is_some() {
        return Err(ConfigError::BothRepoAndTags.into());
    }

    let repos = select_repositories(&cfg, cli.repo.as_deref(), cli.tags.as_deref());
    let date = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();

    let action = match &cli.command {
        Command::Sync => runner::Action::Sync,
        Command::Snap => runner::Action::Snap,
        Command::SnapCleanup => runner::Action::SnapCleanup,
        Command::SnapList => runner::Action::SnapList,
        Command::SnapName { timestamp, snapname } => runner::Action::SnapName {
            timestamp: timestamp.clone(),
            snapname: snapname.clone(),
        },
        Command::SnapUnname { snapname } => runner::Action::SnapUnname {
            snapname: snapname.clone(),
        },
        Command::Validate => runner::Action::Validate,
        Command::Migrate => runner::Action::Migrate,
    };

    let ctx = runner::RunnerContext {
        destination: cfg.main.destination.clone(),
        global_proxy: cfg.main.proxy.clone(),
        date,
    };

    print_header(&cli.command);
    let (status, results) = runner::run(repos, action, ctx, cfg.main.downloaders);

    for result in &results {
        if !result.lines.is_empty() {
            eprintln!("\n  {}", result.reponame.bold());
            for line in &result.lines {
                eprintln!("  {line}");
            }
        }
        if let Some(e) = &result.error {
            eprintln!("  {} {}: {e}", "✗".red(), result.reponame);
        }
    }

    std::process::exit(status);
}

fn select_repositories(
    cfg: &config::Config,
    repo: Option<&str>,
    tags: Option<&str>,
) -> Vec<config::Repository> {
    let tag_filter: Vec<String> = tags
        .map(|t| t.split(',').map(str::trim).map(String::from).collect())
        .unwrap_or_default();

    cfg.repositories
        .values()
        .filter(|r| match repo {
            Some(name) => r.reponame == name,
            None => true,
        })
        .filter(|r| {
            if tag_filter.is_empty() {
                true
            } else {
                config::tags_match(&r.tags, &tag_filter)
            }
        })
        .cloned()
        .collect()
}

fn print_header(command: &Command) {
    let label = match command {
        Command::Sync => "sync",
        Command::Snap => "snap",
        Command::SnapCleanup => "snap_cleanup",
        Command::SnapList => "snap_list",
        Command::SnapName { .. } => "snap_name",
        Command::SnapUnname { .. } => "snap_unname",
        Command::Validate => "validate",
        Command::Migrate => "migrate",
    };
    eprintln!();
    eprintln!(
        "  {} reposyncd v{} — {label}",
        "⚡".bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
}
