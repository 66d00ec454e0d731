//! Chain access.
//!
//! Defines the `ChainGateway` trait over the round-based prediction
//! contract and provides the BSC implementation backed by alloy.
//! The engine only ever talks to the trait, so tests drive it with an
//! in-memory gateway.

pub mod bsc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{Round, RoundPosition, Side};

/// Receipt for a confirmed wager transaction.
#[derive(Debug, Clone)]
pub struct WagerReceipt {
    pub round_id: u64,
    pub side: Side,
    pub amount: Decimal,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Read/write surface of the prediction contract.
///
/// Wager and claim submissions have submit-and-await-confirmation
/// semantics: they return only once the transaction is final (or fail
/// within a bounded confirmation wait).
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Id of the currently open round.
    async fn current_round_id(&self) -> Result<u64>;

    /// Lock/close timestamps and prices for a round. The close price is
    /// zero until the oracle finalises the round.
    async fn round_info(&self, round_id: u64) -> Result<Round>;

    /// The wallet's position in a round, if any.
    async fn position(&self, round_id: u64) -> Result<Option<RoundPosition>>;

    /// Submit a wager and wait for confirmation. Fails if the balance is
    /// insufficient or the round is already locked.
    async fn wager(&self, round_id: u64, side: Side, amount: Decimal) -> Result<WagerReceipt>;

    /// Claim winnings for the given rounds. Idempotent if unclaimed.
    async fn claim(&self, round_ids: &[u64]) -> Result<String>;

    /// Fresh wallet balance in the native currency.
    async fn wallet_balance(&self) -> Result<Decimal>;
}
