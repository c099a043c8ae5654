use clickhouse::Row;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Row, Serialize, Deserialize)]
pub struct TokenHoldersRecord {
    pub token_address: String,
    pub initial_block_fetched: u64,
    pub last_block_fetched: u64,
    pub holders: Vec<(String, f64)>,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Row, Serialize, Deserialize)]
pub struct TokenStatsRecord {
    pub token_address: String,
    pub token_name: String,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub date_added: OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub last_updated: OffsetDateTime,
    pub total_supply: f64,
    pub market_cap: Option<f64>,
    pub top_holders_proportion: f64,
    pub average_balance: f64,
    pub median_balance: f64,
    pub total_holders: u32,
    pub top_holders: Vec<(String, f64, String)>,
    pub token_distribution: Vec<(String, u32, f64, f64)>,
    pub holders_graph: Vec<(i64, u32)>,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub updated_at: OffsetDateTime,
}
