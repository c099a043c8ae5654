use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use super::chain::{to_token_units, ChainLogProvider, TransferEvent};
use super::distribution::{calculate_distribution, top_holders_proportion, DistributionError};
use super::ledger::{normalize_address, BalanceLedger};
use super::retry::RequestError;
use crate::db::PersistenceGateway;
use crate::types::models::{
    AccountType, Checkpoint, DistributionStats, Holder, HolderReport, TopHolder,
};

pub const DUST_THRESHOLD: f64 = 0.01;
pub const TOP_HOLDER_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Blocks per `eth_getLogs` window.
    pub batch_size: u64,
    /// Courtesy pause before every window fetch.
    pub window_delay: Duration,
    pub dust_threshold: f64,
    pub top_holders: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50_000,
            window_delay: Duration::from_millis(500),
            dust_threshold: DUST_THRESHOLD,
            top_holders: TOP_HOLDER_COUNT,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no token holders found for {0}")]
    NoHolders(String),
    #[error("all {windows} block windows failed to fetch for {token}")]
    AllWindowsFailed { token: String, windows: usize },
    #[error("failed to calculate distribution: {0}")]
    Distribution(#[from] DistributionError),
    #[error("chain provider error: {0}")]
    Chain(#[from] RequestError),
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    FetchingWindow { from: u64, to: u64 },
    ApplyingEvents { from: u64, to: u64, events: Vec<TransferEvent> },
    Persisting,
    Done,
    Failed,
}

/// Output of a run once the ledger has been replayed up to the end block.
#[derive(Debug, Clone)]
pub struct Concluded {
    pub checkpoint: Checkpoint,
    pub holders: Vec<Holder>,
    pub distribution: DistributionStats,
}

/// One reconstruction of one token, advanced window by window.
///
/// The run owns its ledger exclusively. Windows are processed strictly in
/// order; a window that fails to fetch is skipped and never retried.
pub struct ReconstructionRun {
    token_address: String,
    initial_block_fetched: u64,
    start_block: u64,
    end_block: u64,
    prior_last_block: Option<u64>,
    decimals: u8,
    config: EngineConfig,
    ledger: BalanceLedger,
    state: RunState,
    fetched_windows: usize,
    skipped_windows: Vec<(u64, u64)>,
    skipped_events: usize,
}

impl ReconstructionRun {
    /// Resumes from `prior` at `last_block_fetched + 1`, or starts at
    /// `initial_block` when the token has never been scanned.
    pub fn new(
        token_address: &str,
        prior: Option<Checkpoint>,
        initial_block: u64,
        end_block: u64,
        decimals: u8,
        config: EngineConfig,
    ) -> Self {
        let mut ledger = BalanceLedger::new();
        let (initial_block_fetched, start_block, prior_last_block) = match prior {
            Some(checkpoint) => {
                ledger.hydrate(&checkpoint.holders);
                (
                    checkpoint.initial_block_fetched,
                    checkpoint.last_block_fetched.saturating_add(1),
                    Some(checkpoint.last_block_fetched),
                )
            }
            None => (initial_block, initial_block, None),
        };

        Self {
            token_address: normalize_address(token_address),
            initial_block_fetched,
            start_block,
            end_block,
            prior_last_block,
            decimals,
            config,
            ledger,
            state: RunState::Idle,
            fetched_windows: 0,
            skipped_windows: Vec::new(),
            skipped_events: 0,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    #[cfg(test)]
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    #[cfg(test)]
    pub fn skipped_windows(&self) -> &[(u64, u64)] {
        &self.skipped_windows
    }

    /// True when windows were requested and none of them could be fetched.
    pub fn all_windows_failed(&self) -> bool {
        self.fetched_windows == 0 && !self.skipped_windows.is_empty()
    }

    /// True once there is nothing left to fetch or apply.
    pub fn is_replayed(&self) -> bool {
        matches!(
            self.state,
            RunState::Persisting | RunState::Done | RunState::Failed
        )
    }

    fn window_from(&self, from: u64) -> RunState {
        if from > self.end_block {
            return RunState::Persisting;
        }
        let to = from.saturating_add(self.config.batch_size.max(1)).min(self.end_block);
        RunState::FetchingWindow { from, to }
    }

    fn after_window(&self, to: u64) -> RunState {
        match to.checked_add(1) {
            Some(next) => self.window_from(next),
            None => RunState::Persisting,
        }
    }

    /// Advances the fetch/apply part of the run by one transition.
    pub async fn step(&mut self, provider: &dyn ChainLogProvider) {
        let state = std::mem::replace(&mut self.state, RunState::Failed);
        self.state = match state {
            RunState::Idle => {
                tracing::info!(
                    "Reconstructing holders for {} from block {} to {}",
                    self.token_address,
                    self.start_block,
                    self.end_block
                );
                self.window_from(self.start_block)
            }
            RunState::FetchingWindow { from, to } => {
                tracing::info!("Fetching events from block {} to {}...", from, to);
                if !self.config.window_delay.is_zero() {
                    sleep(self.config.window_delay).await;
                }
                match provider.transfer_events(&self.token_address, from, to).await {
                    Ok(events) => {
                        self.fetched_windows += 1;
                        RunState::ApplyingEvents { from, to, events }
                    }
                    Err(e) => {
                        tracing::warn!("Skipping blocks {}-{} for {}: {}", from, to, self.token_address, e);
                        self.skipped_windows.push((from, to));
                        self.after_window(to)
                    }
                }
            }
            RunState::ApplyingEvents { to, events, .. } => {
                for event in &events {
                    self.apply_event(event);
                }
                self.after_window(to)
            }
            terminal => terminal,
        };
    }

    fn apply_event(&mut self, event: &TransferEvent) {
        let (Some(from), Some(to), Some(raw)) = (&event.from, &event.to, event.raw_value) else {
            tracing::warn!("Skipping malformed transfer event: {:?}", event);
            self.skipped_events += 1;
            return;
        };

        let value = to_token_units(raw, self.decimals);
        if !value.is_finite() {
            tracing::warn!("Skipping transfer {} -> {} with unrepresentable value {}", from, to, raw);
            self.skipped_events += 1;
            return;
        }

        self.ledger.apply_transfer(from, to, value);
    }

    /// Builds the new checkpoint and statistics from the replayed ledger.
    /// A run whose every window failed, an empty holder set or a failed
    /// distribution ends the run as failed and leaves nothing to persist.
    pub fn conclude(&mut self, total_supply: f64) -> Result<Concluded, EngineError> {
        if !matches!(self.state, RunState::Persisting) {
            tracing::warn!("Concluding run for {} in state {:?}", self.token_address, self.state);
        }

        if !self.skipped_windows.is_empty() || self.skipped_events > 0 {
            tracing::warn!(
                "Run for {} skipped {} windows and {} events",
                self.token_address,
                self.skipped_windows.len(),
                self.skipped_events
            );
        }

        if self.all_windows_failed() {
            self.state = RunState::Failed;
            return Err(EngineError::AllWindowsFailed {
                token: self.token_address.clone(),
                windows: self.skipped_windows.len(),
            });
        }

        let holders = self.ledger.snapshot(self.config.dust_threshold);
        if holders.is_empty() {
            self.state = RunState::Failed;
            return Err(EngineError::NoHolders(self.token_address.clone()));
        }

        let distribution = match calculate_distribution(&holders, total_supply) {
            Ok(distribution) => distribution,
            Err(e) => {
                self.state = RunState::Failed;
                return Err(e.into());
            }
        };

        let last_block_fetched = self
            .prior_last_block
            .map_or(self.end_block, |prior| prior.max(self.end_block));

        self.state = RunState::Persisting;
        Ok(Concluded {
            checkpoint: Checkpoint {
                token_address: self.token_address.clone(),
                initial_block_fetched: self.initial_block_fetched,
                last_block_fetched,
                holders: holders.clone(),
            },
            holders,
            distribution,
        })
    }

    pub fn mark_done(&mut self) {
        self.state = RunState::Done;
    }

    pub fn mark_failed(&mut self) {
        self.state = RunState::Failed;
    }
}

/// Drives a [`ReconstructionRun`] against real collaborators and persists the
/// resulting checkpoint.
pub struct HolderEngine<'a> {
    provider: &'a dyn ChainLogProvider,
    store: &'a dyn PersistenceGateway,
    config: EngineConfig,
}

impl<'a> HolderEngine<'a> {
    pub fn new(
        provider: &'a dyn ChainLogProvider,
        store: &'a dyn PersistenceGateway,
        config: EngineConfig,
    ) -> Self {
        Self { provider, store, config }
    }

    pub async fn reconstruct(
        &self,
        token_address: &str,
        initial_block: u64,
    ) -> Result<HolderReport, EngineError> {
        let token_address = normalize_address(token_address);
        let operation_start = std::time::Instant::now();

        let raw_supply = self.provider.total_supply(&token_address).await?;
        let decimals = self.provider.decimals(&token_address).await?;
        let prior = self
            .store
            .load_checkpoint(&token_address)
            .await
            .map_err(EngineError::Persistence)?;
        let end_block = self.provider.current_block_height().await?;

        let total_supply = to_token_units(raw_supply, decimals);

        let mut run = ReconstructionRun::new(
            &token_address,
            prior,
            initial_block,
            end_block,
            decimals,
            self.config.clone(),
        );
        while !run.is_replayed() {
            run.step(self.provider).await;
        }

        let concluded = run.conclude(total_supply)?;

        if let Err(e) = self.store.save_checkpoint(&concluded.checkpoint).await {
            run.mark_failed();
            return Err(EngineError::Persistence(e));
        }
        run.mark_done();
        tracing::info!(
            "Saved checkpoint for {} at block {} with {} holders",
            token_address,
            concluded.checkpoint.last_block_fetched,
            concluded.holders.len()
        );

        let top_holders = self.classify_top_holders(&concluded.holders).await;
        let amounts: Vec<f64> = top_holders.iter().map(|h| h.token_amount).collect();

        tracing::info!("Holder reconstruction for {} took: {:?}", token_address, operation_start.elapsed());

        Ok(HolderReport {
            total_supply,
            top_holders_proportion: top_holders_proportion(&amounts, total_supply),
            top_holders,
            holders: concluded.holders,
            distribution: concluded.distribution,
        })
    }

    /// Labels the largest holders by whether code is deployed at their
    /// address right now. Lookup failures yield `unknown`.
    async fn classify_top_holders(&self, holders: &[Holder]) -> Vec<TopHolder> {
        let lookups = holders.iter().take(self.config.top_holders).map(|holder| async move {
            let account_type = match self.provider.has_code_at(&holder.address).await {
                Ok(true) => AccountType::Contract,
                Ok(false) => AccountType::Wallet,
                Err(e) => {
                    tracing::warn!("Error fetching code for address {}: {}", holder.address, e);
                    AccountType::Unknown
                }
            };
            TopHolder {
                address: holder.address.clone(),
                token_amount: holder.balance,
                account_type,
            }
        });

        futures::future::join_all(lookups).await
    }
}
