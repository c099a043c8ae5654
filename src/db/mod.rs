pub mod init;
pub mod models;
pub mod operations;
pub mod schema;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::models::{Checkpoint, TokenStats};

/// Storage for holder checkpoints and stats snapshots, keyed by lowercased
/// token address. Saves are upserts that replace the whole document.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_checkpoint(&self, token_address: &str) -> Result<Option<Checkpoint>>;
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn load_stats(&self, token_address: &str) -> Result<Option<TokenStats>>;
    async fn save_stats(&self, stats: &TokenStats) -> Result<()>;
}
