use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a holder set: a lowercased address and its decimal-adjusted balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    pub balance: f64,
}

/// Persisted progress of a holder reconstruction for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub token_address: String,
    pub initial_block_fetched: u64,
    pub last_block_fetched: u64,
    pub holders: Vec<Holder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Wallet,
    Contract,
    Unknown,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Wallet => "wallet",
            AccountType::Contract => "contract",
            AccountType::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "wallet" => AccountType::Wallet,
            "contract" => AccountType::Contract,
            _ => AccountType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHolder {
    pub address: String,
    pub token_amount: f64,
    pub account_type: AccountType,
}

/// Aggregate for one holder-count percentile range, e.g. "0-10%".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStat {
    pub range: String,
    pub account_count: u32,
    pub percent_tokens_held: f64,
    pub amount_tokens_held: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub total_holders: usize,
    pub average_balance: f64,
    pub median_balance: f64,
    pub group_stats: Vec<GroupStat>,
}

/// What a reconstruction run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderReport {
    pub total_supply: f64,
    pub holders: Vec<Holder>,
    pub top_holders_proportion: f64,
    pub top_holders: Vec<TopHolder>,
    pub distribution: DistributionStats,
}

/// (UTC midnight in milliseconds, holder count)
pub type HoldersGraphPoint = (i64, u32);

/// Snapshot document stored per token after a successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub token_name: String,
    pub token_address: String,
    pub date_added: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_supply: f64,
    pub market_cap: Option<f64>,
    pub top_holders_proportion: f64,
    pub average_balance: f64,
    pub median_balance: f64,
    pub total_holders: u32,
    pub top_holders: Vec<TopHolder>,
    pub group_stats: Vec<GroupStat>,
    pub holders_graph: Vec<HoldersGraphPoint>,
}

/// Entry of the tracked-token registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedToken {
    pub name: String,
    pub token_address: String,
    pub creation_block: u64,
    pub mc_ticker: String,
}
