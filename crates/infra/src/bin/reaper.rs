//! Standalone reaper: periodically expires overdue inventory holds across all
//! shops. Runs until interrupted.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use stockhold_infra::{run_reaper_sweep, PostgresHoldStore, SweepConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockhold_observability::init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let interval_secs = match std::env::var("REAPER_INTERVAL_SECS") {
        Ok(raw) => raw
            .parse::<u64>()
            .context("REAPER_INTERVAL_SECS must be a positive integer")?,
        Err(_) => 60,
    };

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresHoldStore::new(pool);
    let config = SweepConfig::default();

    info!(interval_secs, "inventory hold reaper started");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_reaper_sweep(&store, &config, Utc::now()).await {
                    Ok(stats) => {
                        if stats.shops_swept > 0 || stats.shops_failed > 0 {
                            info!(
                                shops_swept = stats.shops_swept,
                                shops_failed = stats.shops_failed,
                                "reaper sweep pass"
                            );
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "reaper sweep pass failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping reaper");
                break;
            }
        }
    }

    Ok(())
}
