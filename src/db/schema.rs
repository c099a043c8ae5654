pub const TOKEN_HOLDERS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_holders (
    token_address String,
    initial_block_fetched UInt64,
    last_block_fetched UInt64,
    holders Array(Tuple(String, Float64)),
    updated_at DateTime64(3, 'UTC')
) ENGINE = ReplacingMergeTree(updated_at)
ORDER BY token_address
"#;

pub const TOKEN_STATS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS token_stats (
    token_address String,
    token_name String,
    date_added DateTime('UTC'),
    last_updated DateTime('UTC'),
    total_supply Float64,
    market_cap Nullable(Float64),
    top_holders_proportion Float64,
    average_balance Float64,
    median_balance Float64,
    total_holders UInt32,
    top_holders Array(Tuple(String, Float64, String)),
    token_distribution Array(Tuple(String, UInt32, Float64, Float64)),
    holders_graph Array(Tuple(Int64, UInt32)),
    updated_at DateTime64(3, 'UTC')
) ENGINE = ReplacingMergeTree(updated_at)
ORDER BY token_address
"#;
