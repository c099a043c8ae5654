use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use anyhow::anyhow;
use async_trait::async_trait;
use governor::{RateLimiter, state::{NotKeyed, InMemoryState}, clock::DefaultClock};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::ledger::normalize_address;
use super::retry::{retry_after_from_headers, with_retry, RequestError, RetryPolicy};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";
const DECIMALS_SELECTOR: &str = "0x313ce567";

pub type RpcRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A Transfer log as returned by the provider. Fields are optional because
/// indexers occasionally hand back logs that do not decode cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub from: Option<String>,
    pub to: Option<String>,
    pub raw_value: Option<U256>,
}

#[async_trait]
pub trait ChainLogProvider: Send + Sync {
    async fn current_block_height(&self) -> Result<u64, RequestError>;

    async fn transfer_events(
        &self,
        token_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RequestError>;

    async fn total_supply(&self, token_address: &str) -> Result<U256, RequestError>;

    async fn decimals(&self, token_address: &str) -> Result<u8, RequestError>;

    async fn has_code_at(&self, address: &str) -> Result<bool, RequestError>;
}

/// Converts a raw smallest-unit amount into token units.
pub fn to_token_units(raw: U256, decimals: u8) -> f64 {
    let amount = raw.to_string().parse::<f64>().unwrap_or(f64::INFINITY);
    amount / 10f64.powi(decimals as i32)
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

/// EVM JSON-RPC backed provider (`eth_getLogs`, `eth_call`, `eth_getCode`).
pub struct JsonRpcProvider {
    http: reqwest::Client,
    url: String,
    rate_limiter: Arc<RpcRateLimiter>,
    retry: RetryPolicy,
}

impl JsonRpcProvider {
    pub fn new(
        url: &str,
        rate_limiter: Arc<RpcRateLimiter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            rate_limiter,
            retry: RetryPolicy::default(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RequestError> {
        with_retry(self.retry, method, || self.send(method, params.clone())).await
    }

    async fn send<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RequestError> {
        self.rate_limiter.until_ready().await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RequestError::RateLimited {
                retry_after: retry_after_from_headers(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(anyhow!("{} returned HTTP {}", method, status).into());
        }

        let parsed: JsonRpcResponse<T> = response.json().await?;
        if let Some(error) = parsed.error {
            // -32005 is the de-facto "limit exceeded" code across hosted providers
            if error.code == 429 || error.code == -32005 {
                return Err(RequestError::RateLimited { retry_after: None });
            }
            return Err(anyhow!("{} failed ({}): {}", method, error.code, error.message).into());
        }

        parsed
            .result
            .ok_or_else(|| anyhow!("{} returned no result", method).into())
    }

    async fn eth_call(&self, token_address: &str, selector: &str) -> Result<U256, RequestError> {
        let raw: String = self
            .call("eth_call", json!([{ "to": token_address, "data": selector }, "latest"]))
            .await?;
        parse_quantity(&raw).ok_or_else(|| anyhow!("eth_call returned malformed data: {}", raw).into())
    }
}

#[async_trait]
impl ChainLogProvider for JsonRpcProvider {
    async fn current_block_height(&self) -> Result<u64, RequestError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| anyhow!("malformed block number: {}", raw).into())
    }

    async fn transfer_events(
        &self,
        token_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RequestError> {
        let logs: Vec<RpcLog> = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": token_address,
                    "fromBlock": format!("{:#x}", from_block),
                    "toBlock": format!("{:#x}", to_block),
                    "topics": [TRANSFER_TOPIC],
                }]),
            )
            .await?;

        Ok(logs.iter().map(decode_transfer).collect())
    }

    async fn total_supply(&self, token_address: &str) -> Result<U256, RequestError> {
        self.eth_call(token_address, TOTAL_SUPPLY_SELECTOR).await
    }

    async fn decimals(&self, token_address: &str) -> Result<u8, RequestError> {
        let value = self.eth_call(token_address, DECIMALS_SELECTOR).await?;
        if value > U256::from(u8::MAX) {
            return Err(anyhow!("decimals out of range for {}: {}", token_address, value).into());
        }
        Ok(value.to::<u8>())
    }

    async fn has_code_at(&self, address: &str) -> Result<bool, RequestError> {
        let code: String = self.call("eth_getCode", json!([address, "latest"])).await?;
        Ok(has_bytecode(&code))
    }
}

fn parse_quantity(raw: &str) -> Option<U256> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return None;
    }
    U256::from_str_radix(digits, 16).ok()
}

fn has_bytecode(code: &str) -> bool {
    let digits = code.trim().trim_start_matches("0x");
    !digits.is_empty() && digits.chars().any(|c| c != '0')
}

fn topic_to_address(topic: &str) -> Option<String> {
    let digits = topic.trim().trim_start_matches("0x");
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(normalize_address(&format!("0x{}", &digits[24..])))
}

fn decode_transfer(log: &RpcLog) -> TransferEvent {
    TransferEvent {
        from: log.topics.get(1).and_then(|t| topic_to_address(t)),
        to: log.topics.get(2).and_then(|t| topic_to_address(t)),
        raw_value: parse_quantity(&log.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(address_hex: &str) -> String {
        format!("0x{:0>64}", address_hex)
    }

    #[test]
    fn decodes_indexed_transfer_log() {
        let log = RpcLog {
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                topic("AbCdEf0000000000000000000000000000000001"),
                topic("0000000000000000000000000000000000000002"),
            ],
            data: "0x0de0b6b3a7640000".to_string(),
        };

        let event = decode_transfer(&log);
        assert_eq!(event.from.as_deref(), Some("0xabcdef0000000000000000000000000000000001"));
        assert_eq!(event.to.as_deref(), Some("0x0000000000000000000000000000000000000002"));
        assert_eq!(event.raw_value, Some(U256::from(1_000_000_000_000_000_000u128)));
    }

    #[test]
    fn missing_topics_leave_fields_empty() {
        let log = RpcLog {
            topics: vec![TRANSFER_TOPIC.to_string()],
            data: "0x".to_string(),
        };

        let event = decode_transfer(&log);
        assert_eq!(event.from, None);
        assert_eq!(event.to, None);
        assert_eq!(event.raw_value, None);
    }

    #[test]
    fn converts_raw_amounts_with_decimals() {
        let raw = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(to_token_units(raw, 18), 1.5);
        assert_eq!(to_token_units(U256::from(12345u64), 2), 123.45);
    }

    #[test]
    fn detects_bytecode() {
        assert!(!has_bytecode("0x"));
        assert!(!has_bytecode("0x0"));
        assert!(has_bytecode("0x6080604052"));
    }
}
