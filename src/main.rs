use std::sync::Arc;
use anyhow::Result;
use dotenv::dotenv;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use clickhouse::Client;
use tokio::time::{sleep, Duration};

mod config;
mod db;
mod services;
mod types;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::db::init::init_database;
use crate::db::operations::ClickHouseStore;
use crate::services::chain::JsonRpcProvider;
use crate::services::market::CoinGeckoClient;
use crate::services::monitor::{self, TokenRefresher};
use crate::services::notify::{DiscordNotifier, LogNotifier, Notifier};

async fn connect_to_clickhouse(config: &Config, max_retries: u32) -> Result<Client> {
    let client = Client::default()
        .with_url(&config.clickhouse_url)
        .with_database(&config.clickhouse_database);

    for attempt in 1..=max_retries {
        match client.query("SELECT 1").execute().await {
            Ok(_) => {
                tracing::info!("Connected to ClickHouse at {}", config.clickhouse_url);
                return Ok(client);
            }
            Err(e) => {
                if attempt == max_retries {
                    return Err(anyhow::anyhow!("Failed to connect to ClickHouse after {} attempts: {}", max_retries, e));
                }
                tracing::warn!("Failed to connect to ClickHouse (attempt {}/{}): {}", attempt, max_retries, e);
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Err(anyhow::anyhow!("ClickHouse connection attempts must be positive"))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    dotenv().ok();
    let config = Config::from_env()?;
    tracing::info!("Tracking {} tokens", config.tokens.len());

    let quota = NonZeroU32::new(config.rpc_requests_per_second).unwrap_or(nonzero_ext::nonzero!(5u32));
    let rpc_limiter = Arc::new(RateLimiter::direct(Quota::per_second(quota)));
    let chain = Arc::new(JsonRpcProvider::new(&config.rpc_url, rpc_limiter, config.request_timeout)?);

    let client = connect_to_clickhouse(&config, 5).await?;
    init_database(&client).await?;
    let store = Arc::new(ClickHouseStore::new(client));

    let notifier: Arc<dyn Notifier> = match &config.discord_webhook_url {
        Some(url) => Arc::new(DiscordNotifier::new(url)),
        None => {
            tracing::info!("DISCORD_WEBHOOK_URL not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let refresher = Arc::new(TokenRefresher::new(
        chain,
        store,
        Arc::new(CoinGeckoClient::new(config.request_timeout)?),
        notifier,
        config.engine.clone(),
        config.tokens.clone(),
    ));

    // A token name or address on the command line refreshes that token once
    if let Some(key) = std::env::args().nth(1) {
        let stats = refresher.refresh_token(&key).await?;
        tracing::info!(
            "Refreshed {}: {} holders, top holders own {}%",
            stats.token_name,
            stats.total_holders,
            stats.top_holders_proportion
        );
        return Ok(());
    }

    // Start the monitoring service in a separate task
    let monitor_handle = tokio::spawn({
        let refresher = refresher.clone();
        let interval = config.refresh_interval;
        async move {
            monitor::start_monitoring(refresher, interval).await;
        }
    });

    tokio::select! {
        _ = monitor_handle => {
            tracing::info!("Monitoring service finished");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
