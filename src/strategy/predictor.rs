//! Early outcome prediction for a locked, not-yet-finalized round.
//!
//! A threshold heuristic, not a price model: compares the live spot
//! price against the round's lock price inside a narrow window before
//! the close, and classifies the wallet's position as a likely win,
//! likely loss, or uncertain. Never guesses on missing data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{Round, RoundPosition, Side};

/// Earliest admission point: seconds before the round closes.
const WINDOW_OPEN_SECS: i64 = 25;
/// Latest admission point: close enough that finalization is imminent.
const WINDOW_CLOSE_SECS: i64 = 15;

// ---------------------------------------------------------------------------
// Prediction value object
// ---------------------------------------------------------------------------

/// How the predictor classified the wallet's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Price movement agrees with the position beyond the noise band.
    Win,
    /// Price movement contradicts the position beyond the noise band.
    Loss,
    /// Movement is inside the noise band; no assumption is safe.
    Uncertain,
}

/// A confidence-scored outcome guess. Pure value; the engine decides
/// what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub classification: Classification,
    /// Signed spot-minus-lock difference the classification was made on.
    pub price_diff: Decimal,
    /// The stake that rides on the conjectured round.
    pub stake_at_risk: Decimal,
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Threshold-based round predictor. Holds no mutable state.
pub struct RoundPredictor {
    threshold: Decimal,
}

impl RoundPredictor {
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }

    /// Whether `now` falls inside the admission window for `round`:
    /// late enough that the price move is informative, early enough to
    /// act before finalization.
    pub fn in_window(&self, round: &Round, now: DateTime<Utc>) -> bool {
        let secs = round.seconds_until_close(now);
        (WINDOW_CLOSE_SECS..=WINDOW_OPEN_SECS).contains(&secs)
    }

    /// Classify the wallet's position in a still-open round against a
    /// fresh spot price.
    ///
    /// Returns `None` outside the admission window ("not yet decidable",
    /// distinct from uncertain). The caller is responsible for treating
    /// a failed price fetch the same way.
    pub fn predict(
        &self,
        round: &Round,
        position: &RoundPosition,
        spot_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Prediction> {
        if !self.in_window(round, now) {
            return None;
        }

        let price_diff = spot_price - round.lock_price;
        let classification = if price_diff.abs() < self.threshold {
            Classification::Uncertain
        } else {
            let favourable = match position.side {
                Side::Up => price_diff > Decimal::ZERO,
                Side::Down => price_diff < Decimal::ZERO,
            };
            if favourable {
                Classification::Win
            } else {
                Classification::Loss
            }
        };

        debug!(
            round_id = round.id,
            side = %position.side,
            price_diff = %price_diff,
            threshold = %self.threshold,
            classification = ?classification,
            "Round classified"
        );

        Some(Prediction {
            classification,
            price_diff,
            stake_at_risk: position.stake,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
