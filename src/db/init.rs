use anyhow::Result;
use clickhouse::Client;
use crate::db::schema::{TOKEN_HOLDERS_SQL, TOKEN_STATS_SQL};

pub async fn init_database(client: &Client) -> Result<()> {
    tracing::info!("Initializing database tables...");

    // Create tables if they don't exist (won't drop existing data)
    client.query(TOKEN_HOLDERS_SQL).execute().await?;
    client.query(TOKEN_STATS_SQL).execute().await?;

    Ok(())
}
