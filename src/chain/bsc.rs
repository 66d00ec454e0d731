//! BSC gateway for the prediction contract.
//!
//! Typed contract bindings via alloy's `sol!` macro: `currentEpoch`,
//! `rounds`, `ledger`, the payable `betBull`/`betBear`, and `claim`.
//! Wagers are submitted and awaited to finality with a bounded
//! confirmation timeout; a stalled confirmation surfaces as an error the
//! tick loop treats as transient.
//!
//! Prices come from the contract's oracle with 8 decimals; stakes are in
//! the 18-decimal native currency.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;

use super::{ChainGateway, WagerReceipt};
use crate::types::{Round, RoundPosition, Side};

sol! {
    #[sol(rpc)]
    contract Prediction {
        function currentEpoch() external view returns (uint256);

        function rounds(uint256 epoch) external view returns (
            uint256 epochStored,
            uint256 startTimestamp,
            uint256 lockTimestamp,
            uint256 closeTimestamp,
            int256 lockPrice,
            int256 closePrice,
            uint256 lockOracleId,
            uint256 closeOracleId,
            uint256 totalAmount,
            uint256 bullAmount,
            uint256 bearAmount,
            uint256 rewardBaseCalAmount,
            uint256 rewardAmount,
            bool oracleCalled
        );

        function ledger(uint256 epoch, address user) external view returns (
            uint8 position,
            uint256 amount,
            bool claimed
        );

        function betBull(uint256 epoch) external payable;
        function betBear(uint256 epoch) external payable;
        function claim(uint256[] calldata epochs) external;
    }
}

/// Oracle prices carry 8 fractional digits.
const PRICE_SCALE: Decimal = dec!(100_000_000);
/// Native currency uses 18 fractional digits.
const WEI_PER_UNIT: Decimal = dec!(1_000_000_000_000_000_000);

/// Failure modes of the BSC gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("confirmation wait exceeded {0:?}")]
    ConfirmationTimeout(Duration),

    #[error("amount {0} not representable on-chain")]
    Amount(Decimal),
}

/// Gateway against a PancakeSwap-style prediction contract on BSC.
pub struct BscGateway {
    provider: DynProvider,
    contract_address: Address,
    wallet_address: Address,
    confirmation_timeout: Duration,
}

impl BscGateway {
    /// Connect a signing provider to the given RPC endpoint.
    pub async fn connect(
        rpc_endpoint: &str,
        contract_address: &str,
        private_key: SecretString,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let key = private_key.expose_secret();
        let signer: PrivateKeySigner = key
            .strip_prefix("0x")
            .unwrap_or(key)
            .parse()
            .context("Invalid wallet private key")?;
        let wallet_address = signer.address();

        let contract_address: Address = contract_address
            .parse()
            .context("Invalid prediction contract address")?;

        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(rpc_endpoint)
            .await
            .with_context(|| format!("Failed to connect RPC endpoint {rpc_endpoint}"))?
            .erased();

        info!(
            wallet = %wallet_address,
            contract = %contract_address,
            "Chain gateway connected"
        );

        Ok(Self {
            provider,
            contract_address,
            wallet_address,
            confirmation_timeout,
        })
    }

    fn contract(&self) -> Prediction::PredictionInstance<DynProvider> {
        Prediction::new(self.contract_address, self.provider.clone())
    }

    async fn submit_wager_tx(&self, round_id: u64, side: Side, value: U256) -> Result<String> {
        let contract = self.contract();
        let epoch = U256::from(round_id);

        let pending = match side {
            Side::Up => contract.betBull(epoch).value(value).send().await,
            Side::Down => contract.betBear(epoch).value(value).send().await,
        }
        .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        let receipt = tokio::time::timeout(self.confirmation_timeout, pending.get_receipt())
            .await
            .map_err(|_| GatewayError::ConfirmationTimeout(self.confirmation_timeout))?
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        if !receipt.status() {
            return Err(GatewayError::Reverted(format!(
                "wager tx {} for round {round_id}",
                receipt.transaction_hash
            ))
            .into());
        }

        Ok(format!("{}", receipt.transaction_hash))
    }
}

#[async_trait]
impl ChainGateway for BscGateway {
    async fn current_round_id(&self) -> Result<u64> {
        let epoch = self
            .contract()
            .currentEpoch()
            .call()
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;
        u256_to_u64(epoch)
    }

    async fn round_info(&self, round_id: u64) -> Result<Round> {
        let data = self
            .contract()
            .rounds(U256::from(round_id))
            .call()
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        Ok(Round {
            id: round_id,
            lock_timestamp: u256_to_datetime(data.lockTimestamp)?,
            close_timestamp: u256_to_datetime(data.closeTimestamp)?,
            lock_price: scaled_price_to_decimal(&data.lockPrice.to_string())?,
            close_price: scaled_price_to_decimal(&data.closePrice.to_string())?,
        })
    }

    async fn position(&self, round_id: u64) -> Result<Option<RoundPosition>> {
        let entry = self
            .contract()
            .ledger(U256::from(round_id), self.wallet_address)
            .call()
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        if entry.amount.is_zero() {
            return Ok(None);
        }

        // Ledger position codes: 0 = Bull (up), 1 = Bear (down).
        let side = if entry.position == 0 { Side::Up } else { Side::Down };

        Ok(Some(RoundPosition {
            side,
            stake: wei_to_decimal(entry.amount)?,
            claimed: entry.claimed,
        }))
    }

    async fn wager(&self, round_id: u64, side: Side, amount: Decimal) -> Result<WagerReceipt> {
        let value = decimal_to_wei(amount)?;
        debug!(round_id, %side, %amount, "Submitting wager");

        let tx_hash = self.submit_wager_tx(round_id, side, value).await?;

        info!(round_id, %side, %amount, tx_hash, "Wager confirmed");
        Ok(WagerReceipt {
            round_id,
            side,
            amount,
            tx_hash,
            timestamp: Utc::now(),
        })
    }

    async fn claim(&self, round_ids: &[u64]) -> Result<String> {
        let epochs: Vec<U256> = round_ids.iter().map(|id| U256::from(*id)).collect();

        let pending = self
            .contract()
            .claim(epochs)
            .send()
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        let receipt = tokio::time::timeout(self.confirmation_timeout, pending.get_receipt())
            .await
            .map_err(|_| GatewayError::ConfirmationTimeout(self.confirmation_timeout))?
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;

        if !receipt.status() {
            warn!(?round_ids, "Claim transaction reverted");
            return Err(GatewayError::Reverted(format!("claim for rounds {round_ids:?}")).into());
        }

        Ok(format!("{}", receipt.transaction_hash))
    }

    async fn wallet_balance(&self) -> Result<Decimal> {
        let wei = self
            .provider
            .get_balance(self.wallet_address)
            .await
            .map_err(|e| GatewayError::Rpc(e.to_string()))?;
        wei_to_decimal(wei)
    }
}

// ---------------------------------------------------------------------------
// Unit conversions
// ---------------------------------------------------------------------------

fn u256_to_u64(value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("value {value} exceeds u64"))
}

fn u256_to_datetime(value: U256) -> Result<DateTime<Utc>> {
    let secs = u256_to_u64(value)? as i64;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| anyhow::anyhow!("timestamp {secs} out of range"))
}

/// Oracle price (8 implied decimals, signed) to a plain decimal.
fn scaled_price_to_decimal(raw: &str) -> Result<Decimal> {
    let value = Decimal::from_str(raw)
        .with_context(|| format!("unparseable oracle price: {raw}"))?;
    Ok(value / PRICE_SCALE)
}

/// Wei (18 implied decimals) to a native-currency decimal.
fn wei_to_decimal(wei: U256) -> Result<Decimal> {
    let value = Decimal::from_str(&wei.to_string())
        .with_context(|| format!("wei amount {wei} exceeds decimal range"))?;
    Ok(value / WEI_PER_UNIT)
}

/// Native-currency decimal to wei, truncating below the wei boundary.
fn decimal_to_wei(amount: Decimal) -> Result<U256> {
    let wei = (amount * WEI_PER_UNIT).trunc();
    let units = wei
        .to_u128()
        .ok_or(GatewayError::Amount(amount))?;
    Ok(U256::from(units))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_round_trip() {
        let amount = dec!(0.003);
        let wei = decimal_to_wei(amount).unwrap();
        assert_eq!(wei, U256::from(3_000_000_000_000_000u128));
        assert_eq!(wei_to_decimal(wei).unwrap(), amount);
    }

    #[test]
    fn test_decimal_to_wei_truncates_sub_wei() {
        // Anything below 1e-18 cannot exist on-chain.
        let wei = decimal_to_wei(dec!(0.0000000000000000019)).unwrap();
        assert_eq!(wei, U256::from(1u64));
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(decimal_to_wei(dec!(-0.5)).is_err());
    }

    #[test]
    fn test_oracle_price_scaling() {
        // 600.12345678 with 8 implied decimals.
        assert_eq!(
            scaled_price_to_decimal("60012345678").unwrap(),
            dec!(600.12345678)
        );
        assert_eq!(scaled_price_to_decimal("0").unwrap(), Decimal::ZERO);
        // Sentinel negative price from a misbehaving oracle still parses.
        assert_eq!(scaled_price_to_decimal("-100000000").unwrap(), dec!(-1));
    }

    #[test]
    fn test_u256_to_datetime() {
        let ts = u256_to_datetime(U256::from(1_700_000_000u64)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
