use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use gator::commands::{self, Session, DEFAULT_BROWSE_LIMIT};
use gator::config::Config;
use gator::storage::{Database, DatabaseError};
use gator::util::parse_duration;

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Multi-user RSS aggregator")]
struct Args {
    /// Config file (defaults to ~/.config/gator/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and log in as it
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// List users
    Users,
    /// Delete every user, feed, follow and post
    Reset,
    /// Register a feed and follow it
    Addfeed { name: String, url: String },
    /// List all feeds
    Feeds,
    /// Follow an existing feed by url
    Follow { url: String },
    /// Stop following a feed by url
    Unfollow { url: String },
    /// List feeds the current user follows
    Following,
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
    /// Poll feeds forever, one per interval (e.g. 30s, 1m30s)
    Agg {
        #[arg(value_parser = parse_interval)]
        interval: Duration,
    },
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

/// Flip `tx` to `true` on the first SIGINT or SIGTERM.
async fn forward_shutdown_signal(tx: watch::Sender<bool>) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, stopping after current cycle"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, stopping after current cycle"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl-C, stopping after current cycle");
    }

    // Receiver gone means the loop already ended
    let _ = tx.send(true);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.resolve_database_path(&config_path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let mut session = Session::new(db, config, config_path);
    let mut out = std::io::stdout().lock();

    match args.command {
        Command::Register { name } => commands::register(&mut session, &name, &mut out).await?,
        Command::Login { name } => commands::login(&mut session, &name, &mut out).await?,
        Command::Users => commands::users(&session, &mut out).await?,
        Command::Reset => commands::reset(&session, &mut out).await?,
        Command::Addfeed { name, url } => {
            commands::add_feed(&session, &name, &url, &mut out).await?
        }
        Command::Feeds => commands::feeds(&session, &mut out).await?,
        Command::Follow { url } => commands::follow(&session, &url, &mut out).await?,
        Command::Unfollow { url } => commands::unfollow(&session, &url, &mut out).await?,
        Command::Following => commands::following(&session, &mut out).await?,
        Command::Browse { limit } => commands::browse(&session, limit, &mut out).await?,
        Command::Agg { interval } => {
            let (tx, rx) = watch::channel(false);
            let signals = tokio::spawn(forward_shutdown_signal(tx));
            commands::agg(session, interval, rx, &mut out).await?;
            signals.abort();
        }
    }

    Ok(())
}
