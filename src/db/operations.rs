use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::Client;
use time::OffsetDateTime;

use crate::db::models::{TokenHoldersRecord, TokenStatsRecord};
use crate::db::PersistenceGateway;
use crate::types::models::{AccountType, Checkpoint, GroupStat, Holder, TokenStats, TopHolder};

pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_offset(dt: DateTime<Utc>) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp(dt.timestamp())?)
}

fn from_offset(dt: OffsetDateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.unix_timestamp(), 0)
        .single()
        .unwrap_or_default()
}

impl From<TokenHoldersRecord> for Checkpoint {
    fn from(record: TokenHoldersRecord) -> Self {
        Checkpoint {
            token_address: record.token_address,
            initial_block_fetched: record.initial_block_fetched,
            last_block_fetched: record.last_block_fetched,
            holders: record
                .holders
                .into_iter()
                .map(|(address, balance)| Holder { address, balance })
                .collect(),
        }
    }
}

impl From<TokenStatsRecord> for TokenStats {
    fn from(record: TokenStatsRecord) -> Self {
        TokenStats {
            token_name: record.token_name,
            token_address: record.token_address,
            date_added: from_offset(record.date_added),
            last_updated: from_offset(record.last_updated),
            total_supply: record.total_supply,
            market_cap: record.market_cap,
            top_holders_proportion: record.top_holders_proportion,
            average_balance: record.average_balance,
            median_balance: record.median_balance,
            total_holders: record.total_holders,
            top_holders: record
                .top_holders
                .into_iter()
                .map(|(address, token_amount, account_type)| TopHolder {
                    address,
                    token_amount,
                    account_type: AccountType::parse(&account_type),
                })
                .collect(),
            group_stats: record
                .token_distribution
                .into_iter()
                .map(|(range, account_count, percent_tokens_held, amount_tokens_held)| GroupStat {
                    range,
                    account_count,
                    percent_tokens_held,
                    amount_tokens_held,
                })
                .collect(),
            holders_graph: record.holders_graph,
        }
    }
}

#[async_trait]
impl PersistenceGateway for ClickHouseStore {
    async fn load_checkpoint(&self, token_address: &str) -> Result<Option<Checkpoint>> {
        let record = self
            .client
            .query(
                "SELECT
                    token_address,
                    initial_block_fetched,
                    last_block_fetched,
                    holders,
                    updated_at
                FROM token_holders FINAL
                WHERE token_address = ?
                LIMIT 1"
            )
            .bind(token_address.to_lowercase())
            .fetch_one::<TokenHoldersRecord>()
            .await;

        match record {
            Ok(record) => Ok(Some(record.into())),
            Err(clickhouse::error::Error::RowNotFound) => Ok(None),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        tracing::debug!(
            "Saving checkpoint: token={}, last_block={}, holders={}",
            checkpoint.token_address,
            checkpoint.last_block_fetched,
            checkpoint.holders.len()
        );

        let record = TokenHoldersRecord {
            token_address: checkpoint.token_address.to_lowercase(),
            initial_block_fetched: checkpoint.initial_block_fetched,
            last_block_fetched: checkpoint.last_block_fetched,
            holders: checkpoint
                .holders
                .iter()
                .map(|h| (h.address.clone(), h.balance))
                .collect(),
            updated_at: OffsetDateTime::now_utc(),
        };

        let mut insert = self.client.insert("token_holders")?;
        insert.write(&record).await?;
        insert.end().await?;
        Ok(())
    }

    async fn load_stats(&self, token_address: &str) -> Result<Option<TokenStats>> {
        let record = self
            .client
            .query(
                "SELECT
                    token_address,
                    token_name,
                    date_added,
                    last_updated,
                    total_supply,
                    market_cap,
                    top_holders_proportion,
                    average_balance,
                    median_balance,
                    total_holders,
                    top_holders,
                    token_distribution,
                    holders_graph,
                    updated_at
                FROM token_stats FINAL
                WHERE token_address = ?
                LIMIT 1"
            )
            .bind(token_address.to_lowercase())
            .fetch_one::<TokenStatsRecord>()
            .await;

        match record {
            Ok(record) => Ok(Some(record.into())),
            Err(clickhouse::error::Error::RowNotFound) => Ok(None),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }

    async fn save_stats(&self, stats: &TokenStats) -> Result<()> {
        let record = TokenStatsRecord {
            token_address: stats.token_address.to_lowercase(),
            token_name: stats.token_name.clone(),
            date_added: to_offset(stats.date_added)?,
            last_updated: to_offset(stats.last_updated)?,
            total_supply: stats.total_supply,
            market_cap: stats.market_cap,
            top_holders_proportion: stats.top_holders_proportion,
            average_balance: stats.average_balance,
            median_balance: stats.median_balance,
            total_holders: stats.total_holders,
            top_holders: stats
                .top_holders
                .iter()
                .map(|h| (h.address.clone(), h.token_amount, h.account_type.as_str().to_string()))
                .collect(),
            token_distribution: stats
                .group_stats
                .iter()
                .map(|g| (g.range.clone(), g.account_count, g.percent_tokens_held, g.amount_tokens_held))
                .collect(),
            holders_graph: stats.holders_graph.clone(),
            updated_at: OffsetDateTime::now_utc(),
        };

        let mut insert = self.client.insert("token_stats")?;
        insert.write(&record).await?;
        insert.end().await?;

        tracing::info!("Saved stats snapshot for {}", stats.token_address);
        Ok(())
    }
}
