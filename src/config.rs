use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::holders::EngineConfig;
use crate::services::ledger::normalize_address;
use crate::types::models::TrackedToken;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub discord_webhook_url: Option<String>,
    pub rpc_requests_per_second: u32,
    pub request_timeout: Duration,
    pub refresh_interval: Duration,
    pub engine: EngineConfig,
    pub tokens: Vec<TrackedToken>,
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Parses the tracked-token registry and lowercases every address.
pub fn parse_tokens(json: &str) -> Result<Vec<TrackedToken>> {
    let mut tokens: Vec<TrackedToken> = serde_json::from_str(json)?;
    for token in &mut tokens {
        token.token_address = normalize_address(&token.token_address);
    }
    Ok(tokens)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_url = env::var("ETH_RPC_URL").context("ETH_RPC_URL must be set")?;

        let tokens_file = env::var("TOKENS_FILE").unwrap_or_else(|_| "tokens.json".to_string());
        let tokens_json = std::fs::read_to_string(&tokens_file)
            .with_context(|| format!("failed to read {}", tokens_file))?;
        let tokens = parse_tokens(&tokens_json)
            .with_context(|| format!("failed to parse {}", tokens_file))?;

        let rpc_requests_per_second: u32 = parse_var("RPC_REQUESTS_PER_SECOND", 5)?;
        if rpc_requests_per_second == 0 {
            anyhow::bail!("RPC_REQUESTS_PER_SECOND must be positive");
        }
        let batch_size: u64 = parse_var("BLOCK_BATCH_SIZE", 50_000)?;
        if batch_size == 0 {
            anyhow::bail!("BLOCK_BATCH_SIZE must be positive");
        }

        Ok(Self {
            rpc_url,
            clickhouse_url: env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string()),
            clickhouse_database: env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "default".to_string()),
            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),
            rpc_requests_per_second,
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 20)?),
            refresh_interval: Duration::from_secs(parse_var::<u64>("REFRESH_INTERVAL_HOURS", 24)? * 60 * 60),
            engine: EngineConfig {
                batch_size,
                window_delay: Duration::from_millis(parse_var("WINDOW_DELAY_MS", 500)?),
                ..EngineConfig::default()
            },
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_registry_is_lowercased() {
        let tokens = parse_tokens(
            r#"[{"name":"HYDRA","token_address":"0xaF04f0912E793620824F4442b03F4d984Af29853","creation_block":21365038,"mc_ticker":"hydradao"}]"#,
        )
        .unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_address, "0xaf04f0912e793620824f4442b03f4d984af29853");
        assert_eq!(tokens[0].creation_block, 21365038);
    }

    #[test]
    fn malformed_registry_is_an_error() {
        assert!(parse_tokens(r#"[{"name":"X"}]"#).is_err());
    }
}
