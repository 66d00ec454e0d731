//! Binance spot ticker client.
//!
//! One endpoint: `GET /api/v3/ticker/price?symbol=...`. Prices come back
//! as strings and are parsed into decimals without a float round trip.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use super::PriceFeed;

const BASE_URL: &str = "https://api.binance.com/api/v3";

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// REST spot-price feed for a single symbol (e.g. "BNBUSDT").
pub struct BinanceFeed {
    http: Client,
    symbol: String,
    base_url: String,
}

impl BinanceFeed {
    pub fn new(symbol: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("ROUNDBET/0.1.0 (round-betting-agent)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            symbol: symbol.to_uppercase(),
            base_url: BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(symbol: &str, base_url: &str) -> Self {
        Self {
            http: Client::new(),
            symbol: symbol.to_uppercase(),
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn spot_price(&self) -> Result<Decimal> {
        let url = format!("{}/ticker/price", self.base_url);
        let ticker: TickerPrice = self
            .http
            .get(&url)
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await
            .context("Spot price request failed")?
            .error_for_status()
            .context("Spot price request rejected")?
            .json()
            .await
            .context("Unparseable ticker response")?;

        let price = Decimal::from_str(&ticker.price)
            .with_context(|| format!("Unparseable ticker price: {}", ticker.price))?;

        debug!(symbol = %self.symbol, %price, "Spot price fetched");
        Ok(price)
    }
}
