mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{BlacklistAction, Cli, Command};
use gitarchive::blob::LocalBlobStore;
use gitarchive::config::Config;
use gitarchive::model::{repo_url, WorkItem};
use gitarchive::protocol::{FetchClient, ProgressMode};
use gitarchive::repository::{audit, Database};
use gitarchive::util::format_timestamp;
use gitarchive::worker::Fetcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitarchive=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(blobs) = cli.blobs {
        config.blobs = blobs;
    }

    let db = open_database(&config.database).await?;

    match cli.command {
        Command::Run => run(db, &config, cli.quiet).await,
        Command::Enqueue { name, parent } => {
            let item = match parent {
                Some(parent) => WorkItem::fork_of(name, parent),
                None => WorkItem::new(name),
            };
            db.enqueue(&item).await?;
            eprintln!("Queued {} ({} pending)", item.name, db.queue_len().await?);
            Ok(())
        }
        Command::Blacklist { action: BlacklistAction::Add { name } } => {
            db.add_blacklist(&name).await?;
            eprintln!("Blacklisted {name}");
            Ok(())
        }
        Command::Blacklist { action: BlacklistAction::Show { name } } => {
            println!("{name}: {}", db.blacklist_state(&name).await?);
            Ok(())
        }
        Command::Latest { name } => {
            let latest = db.get_latest(&repo_url(&config.host, &name)).await?;
            println!("{name}: {}", format_timestamp(latest));
            Ok(())
        }
        Command::Audit => {
            let blobs = open_blobs(&config.blobs).await?;
            let report = audit(&db, &blobs).await?;
            if !report.is_clean() {
                bail!(
                    "Audit found {} under-linked records, {} dangling edges, {} orphan blobs, {} missing blobs",
                    report.under_linked.len(),
                    report.dangling_deps.len(),
                    report.orphan_blobs.len(),
                    report.missing_blobs.len()
                );
            }
            eprintln!("Archive is consistent");
            Ok(())
        }
    }
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Could not create {}", dir.display()))?;
    }
    let path_str = path.to_str().context("Invalid path encoding")?;
    let db = Database::new(path_str)
        .await
        .with_context(|| format!("Could not open index {}", path.display()))?;
    if db.init_schema().await? {
        info!(path = %path.display(), "created new index");
    }
    Ok(db)
}

async fn open_blobs(root: &Path) -> Result<LocalBlobStore> {
    LocalBlobStore::open(root)
        .await
        .with_context(|| format!("Could not open blob store {}", root.display()))
}

/// Cancel `token` on Ctrl-C or SIGTERM; a second signal exits at once
fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Keyboard interrupt."),
            _ = terminate.recv() => info!("Received SIGTERM."),
        }
        token.cancel();
        info!("Stopping after the current fetch. Signal again to exit now.");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        warn!("Exiting with a fetch in flight.");
        std::process::exit(130);
    });
    Ok(())
}

async fn run(db: Database, config: &Config, quiet: bool) -> Result<()> {
    let blobs = Arc::new(open_blobs(&config.blobs).await?);
    let client = FetchClient::new(&config.user_agent, config.http_timeout())?;
    let progress = if quiet {
        ProgressMode::Quiet
    } else if std::io::stderr().is_terminal() {
        ProgressMode::Spinner
    } else {
        ProgressMode::Raw
    };

    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;

    let fetcher = Fetcher::new(db.clone(), db, blobs, client)
        .with_schedule(config.week_schedule()?)
        .with_host(&config.host)
        .with_progress(progress)
        .with_cancellation(token);

    let result = fetcher.run().await;
    info!(metrics = %fetcher.metrics().to_json(), "shutting down");
    result.context("Worker stopped")
}
