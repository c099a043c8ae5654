use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveTime, Utc};
use thiserror::Error;
use tokio::time::Duration;

use crate::db::PersistenceGateway;
use crate::services::chain::ChainLogProvider;
use crate::services::holders::{EngineConfig, EngineError, HolderEngine};
use crate::services::ledger::normalize_address;
use crate::services::market::MarketData;
use crate::services::notify::Notifier;
use crate::types::models::{HoldersGraphPoint, TokenStats, TrackedToken};

/// Minimum time between two refreshes of the same token.
pub const GRACE_PERIOD_MINUTES: i64 = 15;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("unknown token {0}")]
    UnknownToken(String),
    #[error("refresh already running for {0}")]
    AlreadyRunning(String),
    #[error("{token} was refreshed {minutes} minutes ago")]
    GracePeriod { token: String, minutes: i64 },
    #[error("no data returned for {token}: {source}")]
    NoData {
        token: String,
        #[source]
        source: EngineError,
    },
    #[error("failed to refresh {token}: {source}")]
    Failed {
        token: String,
        #[source]
        source: anyhow::Error,
    },
}

/// UTC midnight of `now`, in milliseconds.
pub fn day_timestamp(now: DateTime<Utc>) -> i64 {
    now.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Returns `graph` with `day`'s point set to `holders`, replacing any earlier
/// point for the same day.
pub fn record_daily_holders(
    graph: &[HoldersGraphPoint],
    day: i64,
    holders: u32,
) -> Vec<HoldersGraphPoint> {
    let mut updated: Vec<HoldersGraphPoint> = graph
        .iter()
        .copied()
        .filter(|(ts, _)| *ts != day)
        .collect();
    updated.push((day, holders));
    updated.sort_by_key(|(ts, _)| *ts);
    updated
}

/// Clears the running flag for a token when dropped.
pub struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    token_address: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.token_address);
        }
    }
}

pub struct TokenRefresher {
    chain: Arc<dyn ChainLogProvider>,
    store: Arc<dyn PersistenceGateway>,
    market: Arc<dyn MarketData>,
    notifier: Arc<dyn Notifier>,
    engine_config: EngineConfig,
    tokens: Vec<TrackedToken>,
    running: Mutex<HashSet<String>>,
}

impl TokenRefresher {
    pub fn new(
        chain: Arc<dyn ChainLogProvider>,
        store: Arc<dyn PersistenceGateway>,
        market: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
        engine_config: EngineConfig,
        tokens: Vec<TrackedToken>,
    ) -> Self {
        Self {
            chain,
            store,
            market,
            notifier,
            engine_config,
            tokens,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn tokens(&self) -> &[TrackedToken] {
        &self.tokens
    }

    /// Looks a tracked token up by name (case-insensitive) or address.
    pub fn find_token(&self, key: &str) -> Option<&TrackedToken> {
        let key = key.trim().to_lowercase();
        self.tokens
            .iter()
            .find(|t| t.name.to_lowercase() == key || normalize_address(&t.token_address) == key)
    }

    /// Marks `token_address` as running, or `None` if a run is in flight.
    pub fn try_begin(&self, token_address: &str) -> Option<RunningGuard<'_>> {
        let token_address = normalize_address(token_address);
        let mut running = self.running.lock().ok()?;
        if !running.insert(token_address.clone()) {
            return None;
        }
        Some(RunningGuard {
            running: &self.running,
            token_address,
        })
    }

    pub async fn refresh_token(&self, key: &str) -> Result<TokenStats, RefreshError> {
        let token = self
            .find_token(key)
            .cloned()
            .ok_or_else(|| RefreshError::UnknownToken(key.to_string()))?;
        self.refresh_at(&token, Utc::now()).await
    }

    pub async fn refresh_at(
        &self,
        token: &TrackedToken,
        now: DateTime<Utc>,
    ) -> Result<TokenStats, RefreshError> {
        let token_address = normalize_address(&token.token_address);

        let Some(_guard) = self.try_begin(&token_address) else {
            self.notifier
                .info(&format!("REJECTED refresh of {}: already running", token.name))
                .await;
            return Err(RefreshError::AlreadyRunning(token.name.clone()));
        };

        let prior = self
            .store
            .load_stats(&token_address)
            .await
            .map_err(|source| RefreshError::Failed {
                token: token.name.clone(),
                source,
            })?;

        if let Some(prior) = &prior {
            let minutes = (now - prior.last_updated).num_minutes();
            if minutes < GRACE_PERIOD_MINUTES {
                self.notifier
                    .info(&format!(
                        "Skipping {}, update requested too soon (last updated {} minutes ago)",
                        token.name, minutes
                    ))
                    .await;
                return Err(RefreshError::GracePeriod {
                    token: token.name.clone(),
                    minutes,
                });
            }
        }

        self.notifier
            .info(&format!("Refreshing token stats for {}", token.name))
            .await;

        let engine = HolderEngine::new(
            self.chain.as_ref(),
            self.store.as_ref(),
            self.engine_config.clone(),
        );
        let (report, market_cap) = tokio::join!(
            engine.reconstruct(&token_address, token.creation_block),
            self.market.market_cap(&token.mc_ticker),
        );

        let report = match report {
            Ok(report) => report,
            Err(e @ (EngineError::NoHolders(_)
                | EngineError::AllWindowsFailed { .. }
                | EngineError::Distribution(_))) => {
                self.notifier
                    .error(&format!("FAILED TO REFRESH TOKEN STATS FOR {} - no data returned: {}", token.name, e))
                    .await;
                return Err(RefreshError::NoData {
                    token: token.name.clone(),
                    source: e,
                });
            }
            Err(e) => {
                self.notifier
                    .error(&format!("FAILED TO REFRESH TOKEN STATS FOR {} - {}", token.name, e))
                    .await;
                return Err(RefreshError::Failed {
                    token: token.name.clone(),
                    source: e.into(),
                });
            }
        };

        let total_holders = report.distribution.total_holders as u32;
        let prior_graph = prior.as_ref().map(|p| p.holders_graph.as_slice()).unwrap_or(&[]);

        let stats = TokenStats {
            token_name: token.name.clone(),
            token_address: token_address.clone(),
            date_added: prior.as_ref().map_or(now, |p| p.date_added),
            last_updated: now,
            total_supply: report.total_supply,
            market_cap,
            top_holders_proportion: report.top_holders_proportion,
            average_balance: report.distribution.average_balance,
            median_balance: report.distribution.median_balance,
            total_holders,
            top_holders: report.top_holders,
            group_stats: report.distribution.group_stats,
            holders_graph: record_daily_holders(prior_graph, day_timestamp(now), total_holders),
        };

        if let Err(source) = self.store.save_stats(&stats).await {
            self.notifier
                .error(&format!("FAILED TO SAVE TOKEN STATS FOR {} - {}", token.name, source))
                .await;
            return Err(RefreshError::Failed {
                token: token.name.clone(),
                source,
            });
        }

        self.notifier
            .info(&format!("Finished refreshing {} token stats ({} holders)", token.name, total_holders))
            .await;
        Ok(stats)
    }

    /// Refreshes every tracked token one after another.
    pub async fn refresh_all(&self) {
        self.notifier.info("Starting token refresh").await;
        for token in &self.tokens {
            match self.refresh_at(token, Utc::now()).await {
                Ok(stats) => tracing::info!("Successfully updated stats for {} ({} holders)", token.name, stats.total_holders),
                Err(e) => tracing::error!("Failed to update stats for {}: {}", token.name, e),
            }
        }
        self.notifier.info("Token refresh complete").await;
    }
}

pub async fn start_monitoring(refresher: Arc<TokenRefresher>, interval: Duration) {
    tracing::info!("Starting monitoring service for {} tokens...", refresher.tokens().len());
    let mut timer = tokio::time::interval(interval);

    loop {
        timer.tick().await;
        tracing::info!("Starting stats monitoring cycle...");
        refresher.refresh_all().await;
    }
}
