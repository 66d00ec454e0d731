//! Spot-price feed.
//!
//! A single-operation trait plus the Binance REST implementation. Feed
//! failures are transient by design: the predictor never guesses on
//! missing data, it just waits for the next tick.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Off-chain reference price for the underlying asset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current spot price. May fail transiently.
    async fn spot_price(&self) -> Result<Decimal>;
}
