//! In-memory stand-ins for the chain provider, the store, the price oracle
//! and the notification sink.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::U256;
use anyhow::Result;
use async_trait::async_trait;

use crate::db::PersistenceGateway;
use crate::services::chain::{ChainLogProvider, TransferEvent};
use crate::services::ledger::normalize_address;
use crate::services::market::MarketData;
use crate::services::notify::Notifier;
use crate::services::retry::RequestError;
use crate::types::models::{Checkpoint, TokenStats};

pub fn transfer(from: &str, to: &str, raw_value: u64) -> TransferEvent {
    TransferEvent {
        from: Some(from.to_string()),
        to: Some(to.to_string()),
        raw_value: Some(U256::from(raw_value)),
    }
}

pub struct FakeChain {
    height: u64,
    total_supply: U256,
    decimals: u8,
    events: Vec<(u64, TransferEvent)>,
    failing_windows: HashSet<u64>,
    fail_all_windows: bool,
    contracts: HashSet<String>,
    code_errors: HashSet<String>,
    requested: Mutex<Vec<(u64, u64)>>,
}

impl FakeChain {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            total_supply: U256::ZERO,
            decimals: 0,
            events: Vec::new(),
            failing_windows: HashSet::new(),
            fail_all_windows: false,
            contracts: HashSet::new(),
            code_errors: HashSet::new(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    pub fn with_supply(mut self, raw_supply: u64, decimals: u8) -> Self {
        self.total_supply = U256::from(raw_supply);
        self.decimals = decimals;
        self
    }

    pub fn with_event(mut self, block: u64, event: TransferEvent) -> Self {
        self.events.push((block, event));
        self
    }

    /// Fails the window whose first block is `from_block`.
    pub fn failing_window(mut self, from_block: u64) -> Self {
        self.failing_windows.insert(from_block);
        self
    }

    pub fn failing_all_windows(mut self) -> Self {
        self.fail_all_windows = true;
        self
    }

    pub fn with_contract(mut self, address: &str) -> Self {
        self.contracts.insert(normalize_address(address));
        self
    }

    pub fn with_code_error(mut self, address: &str) -> Self {
        self.code_errors.insert(normalize_address(address));
        self
    }

    pub fn requested_windows(&self) -> Vec<(u64, u64)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainLogProvider for FakeChain {
    async fn current_block_height(&self) -> Result<u64, RequestError> {
        Ok(self.height)
    }

    async fn transfer_events(
        &self,
        _token_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RequestError> {
        self.requested.lock().unwrap().push((from_block, to_block));
        if self.fail_all_windows || self.failing_windows.contains(&from_block) {
            return Err(RequestError::Timeout);
        }
        Ok(self
            .events
            .iter()
            .filter(|(block, _)| (from_block..=to_block).contains(block))
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn total_supply(&self, _token_address: &str) -> Result<U256, RequestError> {
        Ok(self.total_supply)
    }

    async fn decimals(&self, _token_address: &str) -> Result<u8, RequestError> {
        Ok(self.decimals)
    }

    async fn has_code_at(&self, address: &str) -> Result<bool, RequestError> {
        let address = normalize_address(address);
        if self.code_errors.contains(&address) {
            return Err(RequestError::Other(anyhow::anyhow!("eth_getCode unavailable")));
        }
        Ok(self.contracts.contains(&address))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    stats: Mutex<HashMap<String, TokenStats>>,
    checkpoint_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn with_checkpoint(self, checkpoint: Checkpoint) -> Self {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(normalize_address(&checkpoint.token_address), checkpoint);
        self
    }

    pub fn checkpoint(&self, token_address: &str) -> Option<Checkpoint> {
        self.checkpoints.lock().unwrap().get(&normalize_address(token_address)).cloned()
    }

    pub fn stats(&self, token_address: &str) -> Option<TokenStats> {
        self.stats.lock().unwrap().get(&normalize_address(token_address)).cloned()
    }

    pub fn checkpoint_saves(&self) -> usize {
        self.checkpoint_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn load_checkpoint(&self, token_address: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoint(token_address))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoint_saves.fetch_add(1, Ordering::SeqCst);
        self.checkpoints
            .lock()
            .unwrap()
            .insert(normalize_address(&checkpoint.token_address), checkpoint.clone());
        Ok(())
    }

    async fn load_stats(&self, token_address: &str) -> Result<Option<TokenStats>> {
        Ok(self.stats(token_address))
    }

    async fn save_stats(&self, stats: &TokenStats) -> Result<()> {
        self.stats
            .lock()
            .unwrap()
            .insert(normalize_address(&stats.token_address), stats.clone());
        Ok(())
    }
}

pub struct FixedMarket(pub Option<f64>);

#[async_trait]
impl MarketData for FixedMarket {
    async fn market_cap(&self, _ticker: &str) -> Option<f64> {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(bool, String)>>,
}

impl RecordingNotifier {
    pub fn errors(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(is_error, _)| *is_error)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(is_error, _)| !*is_error)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn info(&self, message: &str) {
        self.messages.lock().unwrap().push((false, message.to_string()));
    }

    async fn error(&self, message: &str) {
        self.messages.lock().unwrap().push((true, message.to_string()));
    }
}
