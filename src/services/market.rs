use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;

use super::retry::{retry_after_from_headers, with_retry, RequestError, RetryPolicy};

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Market cap in USD, or `None` when the oracle has nothing usable.
    async fn market_cap(&self, ticker: &str) -> Option<f64>;
}

#[derive(Debug, Deserialize)]
struct CoinGeckoCoin {
    market_data: CoinGeckoMarketData,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoMarketData {
    market_cap: CoinGeckoMarketCap,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoMarketCap {
    usd: Option<f64>,
}

/// Maps a CoinGecko response status to a retryable or final error.
fn check_status(
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    ticker: &str,
) -> Result<(), RequestError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(RequestError::RateLimited {
            retry_after: retry_after_from_headers(headers),
        });
    }
    if !status.is_success() {
        return Err(anyhow!("unexpected response status {} for {}", status, ticker).into());
    }
    Ok(())
}

pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl CoinGeckoClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            retry: RetryPolicy::default(),
        })
    }

    async fn fetch_coin(&self, ticker: &str) -> Result<CoinGeckoCoin, RequestError> {
        let url = format!("{}/coins/{}", self.base_url, ticker);
        let response = self.http.get(&url).send().await?;
        check_status(response.status(), response.headers(), ticker)?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketData for CoinGeckoClient {
    async fn market_cap(&self, ticker: &str) -> Option<f64> {
        match with_retry(self.retry, ticker, || self.fetch_coin(ticker)).await {
            Ok(coin) => coin.market_data.market_cap.usd,
            Err(e) => {
                tracing::warn!("Error fetching market cap for {}: {}", ticker, e);
                None
            }
        }
    }
}
