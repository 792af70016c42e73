use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use moltbook_client::{MoltbookClient, RateLimiter};
use sentinel_common::Config;
use sentinel_ingest::{
    shutdown_pair, AgentRefresh, Scheduler, StaleRescan, TrendingSync,
};
use sentinel_store::SentinelStore;

#[derive(Parser, Debug)]
#[command(name = "sentinel", about = "Moltbook feed ingestion engine")]
struct Args {
    /// Run a single trending sync and exit instead of scheduling.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sentinel_ingest=info".parse()?)
                .add_directive("sentinel_store=info".parse()?)
                .add_directive("moltbook_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    config.log_redacted();

    let store = Arc::new(
        SentinelStore::connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?,
    );
    store.migrate().await.context("migrations failed")?;

    let limiter = Arc::new(RateLimiter::new(config.requests_per_minute));
    let api = Arc::new(MoltbookClient::new(
        &config.moltbook_base_url,
        config.moltbook_api_key.clone(),
        limiter,
    ));

    let (handle, shutdown) = shutdown_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            handle.trigger();
        }
    });

    let (authors_tx, authors_rx) = mpsc::channel(8);
    let authors_rx = Arc::new(Mutex::new(authors_rx));

    let trending = Arc::new(
        TrendingSync::new(
            api.clone(),
            store.clone(),
            config.feed_type.clone(),
            config.feed_limit,
            authors_tx.clone(),
        )
        .with_shutdown(shutdown.clone()),
    );

    if args.once {
        let stats = trending.run().await?;
        info!(%stats, "Single trending sync finished");
        return Ok(());
    }

    let agents = Arc::new(
        AgentRefresh::new(
            api.clone(),
            store.clone(),
            config.agent_stale_hours,
            config.agent_refresh_cap,
            authors_rx,
        )
        .with_shutdown(shutdown.clone()),
    );

    let rescan = Arc::new(
        StaleRescan::new(api, store, config.rescan_window_days, authors_tx)
            .with_shutdown(shutdown.clone()),
    );

    let scheduler = Scheduler::new(
        trending,
        agents,
        rescan,
        Duration::from_secs(config.trending_interval_secs),
        Duration::from_secs(config.agent_refresh_interval_secs),
        Duration::from_secs(config.rescan_interval_secs),
    );

    scheduler.run(shutdown).await;
    Ok(())
}
