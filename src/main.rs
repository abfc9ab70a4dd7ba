mod config;
mod db;
mod digest;
mod loader;
mod notify;
mod sampler;
mod schedule;
mod store;
mod telegram;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    config::Config,
    digest::DigestService,
    loader::Loader,
    notify::Notifier,
    sampler::{service::sample_and_load, Sampler, WebDriverSession},
    store::{PgRowStore, RowStore},
    telegram::TelegramClient,
};

#[derive(Parser)]
#[command(name = "gym_occupancy", version, about = "Gym occupancy scraper and Telegram digest")]
struct Cli {
    /// JSON config file (default: $GYM_CONFIG, then main_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read every gym's online counter once and store the batch
    Sample,
    /// Send one digest, replacing the previous one
    Digest,
    /// Apply the embedded migrations
    Migrate,
    /// Run both pipelines on their schedules until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; env vars may also be set externally
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let pool = db::create_pool(&config.postgres, &config.layer)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Command::Migrate => {
            db::run_migrations(&pool, &config.layer).await?;
            info!(layer = %config.layer, "Migrations applied");
        }
        Command::Sample => {
            let store: Arc<dyn RowStore> = Arc::new(PgRowStore::new(pool));
            let loader = Loader::new(store, config.layer.clone());
            scrape_once(&config, &loader).await?;
        }
        Command::Digest => {
            let service = digest_service(&config, pool);
            digest_once(&config, &service).await?;
        }
        Command::Serve => serve(config, pool).await?,
    }

    Ok(())
}

fn digest_service(config: &Config, pool: PgPool) -> DigestService {
    let store: Arc<dyn RowStore> = Arc::new(PgRowStore::new(pool));
    let telegram = Arc::new(TelegramClient::new(&config.telegram));
    let loader = Loader::new(store.clone(), config.layer.clone());
    let notifier = Notifier::new(
        store.clone(),
        telegram,
        loader,
        config.telegram.notification_tables,
    );
    DigestService::new(store, notifier, &config.digest)
}

/// Scrape pipeline. A rolled-back load is logged by the loader and is not an
/// error here.
async fn scrape_once(config: &Config, loader: &Loader) -> Result<()> {
    let sampler = Sampler::new(&config.scrape, config.offset());
    let mut session = WebDriverSession::connect(&config.scrape.webdriver_url).await?;
    let outcome = sample_and_load(&sampler, &mut session, loader).await?;
    info!(stored = outcome.is_committed(), outcome = ?outcome, "Scrape run finished");
    Ok(())
}

async fn digest_once(config: &Config, service: &DigestService) -> Result<()> {
    let report = service.run_once(config.local_now()).await?;
    info!(
        views = ?report.views,
        cleanup = ?report.notify.cleanup,
        persisted = report.notify.persisted.is_committed(),
        messages = report.notify.record.chat_message_id.len(),
        "Digest cycle finished"
    );
    Ok(())
}

async fn serve(config: Config, pool: PgPool) -> Result<()> {
    db::run_migrations(&pool, &config.layer).await?;
    info!("Database ready");

    let config = Arc::new(config);

    // Scrape loop
    {
        let config = config.clone();
        let store: Arc<dyn RowStore> = Arc::new(PgRowStore::new(pool.clone()));
        let loader = Loader::new(store, config.layer.clone());
        let job = config.schedule.scrape.clone();

        tokio::spawn(schedule::run_forever("scrape", job, move || {
            let config = config.clone();
            let loader = loader.clone();
            async move { scrape_once(&config, &loader).await }
        }));
    }

    // Digest loop
    {
        let config = config.clone();
        let service = Arc::new(digest_service(&config, pool));
        let job = config.schedule.digest.clone();

        tokio::spawn(schedule::run_forever("digest", job, move || {
            let config = config.clone();
            let service = service.clone();
            async move { digest_once(&config, &service).await }
        }));
    }

    shutdown_signal().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
