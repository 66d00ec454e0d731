//! The betting state machine.
//!
//! Driven by a fixed-interval tick, the engine reconciles three
//! time-skewed sources: on-chain round state, the off-chain spot feed,
//! and its own conjecture about an unresolved round. It guarantees at
//! most one wager per round, applies each round's outcome exactly once,
//! and halts itself on risk-control trips.
//!
//! Sequential execution is the sole consistency mechanism: exactly one
//! tick is in flight at a time and operator commands are applied only
//! between ticks, so `BettingState` needs no locking.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::ChainGateway;
use crate::control::{self, Command};
use crate::feed::PriceFeed;
use crate::strategy::predictor::{Classification, RoundPredictor};
use crate::strategy::staking;
use crate::telegram::Notifier;
use crate::types::{
    AssumedOutcome, BettingState, Conjecture, HaltReason, Round, RoundPosition, Settings,
};

/// Standard wagering window: this close to the round lock (seconds).
const WAGER_WINDOW_MAX_SECS: i64 = 20;
/// Lower bound of the window; any later risks missing the lock.
const WAGER_WINDOW_MIN_SECS: i64 = 15;

/// The core betting engine. Owns `BettingState` exclusively.
pub struct BettingEngine<G, F> {
    gateway: G,
    feed: F,
    notifier: Arc<dyn Notifier>,
    settings: Settings,
    state: BettingState,
}

impl<G: ChainGateway, F: PriceFeed> BettingEngine<G, F> {
    pub fn new(gateway: G, feed: F, notifier: Arc<dyn Notifier>, settings: Settings) -> Self {
        let state = BettingState::new(settings.base_stake);
        Self { gateway, feed, notifier, settings, state }
    }

    pub fn state(&self) -> &BettingState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start the tick loop without an operator command (auto-start).
    pub fn start(&mut self) {
        self.state.running = true;
    }

    // -- Tick ------------------------------------------------------------

    /// One polling tick. Errors are for the caller to log and drop: the
    /// loop continues on the next scheduled tick regardless.
    pub async fn tick(&mut self) -> Result<()> {
        if !self.state.running {
            return Ok(());
        }

        let current_id = self.gateway.current_round_id().await?;

        // A conjecture left from early prediction: verify it against the
        // real outcome once its round finalizes.
        if let Some(round_id) = self.state.conjecture.as_ref().map(|c| c.round_id) {
            let round = self.gateway.round_info(round_id).await?;
            if round.is_finalized() {
                let position = self.gateway.position(round_id).await?;
                self.reconcile(&round, position.as_ref()).await?;
            }
        }
        if !self.state.running {
            return Ok(());
        }

        // The awaited wager: reconcile its on-chain outcome, or infer it
        // early from the spot price while the chain catches up.
        let mut early_wager = false;
        if self.state.awaiting_resolution {
            if let Some(round_id) = self.state.last_wagered_round {
                let round = self.gateway.round_info(round_id).await?;
                if round.is_finalized() {
                    let position = self.gateway.position(round_id).await?;
                    self.reconcile(&round, position.as_ref()).await?;
                } else if self.settings.prediction_enabled
                    && self.state.conjecture.is_none()
                    && current_id > round_id
                    && !self.state.reconciled.contains(round_id)
                {
                    early_wager = self.predict_early(&round, current_id).await?;
                }
            }
        }
        if !self.state.running {
            return Ok(());
        }

        self.maybe_wager(current_id, early_wager).await
    }

    // -- Early prediction ------------------------------------------------

    /// Classify the awaited round from a fresh spot price. A confident
    /// call raises a conjecture, re-sizes the next stake from the
    /// assumed outcome, and authorizes wagering this tick; an uncertain
    /// call sits out one round instead of guessing.
    async fn predict_early(&mut self, round: &Round, current_id: u64) -> Result<bool> {
        let now = Utc::now();
        let predictor = RoundPredictor::new(self.settings.prediction_threshold);
        if !predictor.in_window(round, now) {
            return Ok(false);
        }

        let Some(position) = self.gateway.position(round.id).await? else {
            warn!(round_id = round.id, "Awaited round has no ledger entry");
            return Ok(false);
        };

        // Never predict on missing data.
        let spot = match self.feed.spot_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "Spot price unavailable, prediction skipped");
                return Ok(false);
            }
        };

        let Some(prediction) = predictor.predict(round, &position, spot, now) else {
            return Ok(false);
        };

        match prediction.classification {
            Classification::Uncertain => {
                // Skip-and-verify: no stake or streak mutation.
                self.state.skip_round = Some(current_id);
                info!(
                    round_id = round.id,
                    price_diff = %prediction.price_diff,
                    "Movement inside noise band, sitting out one round"
                );
                self.notify(format!(
                    "Round #{}: move {} is inside the noise band. Skipping round #{}.",
                    round.id, prediction.price_diff, current_id
                ))
                .await;
                Ok(false)
            }
            Classification::Win => {
                self.state.conjecture = Some(Conjecture {
                    round_id: round.id,
                    assumed: AssumedOutcome::Win,
                    stake_at_risk: prediction.stake_at_risk,
                    verified: false,
                });
                self.state.awaiting_resolution = false;
                // Assume the streak clears; verification corrects if not.
                self.state.next_stake = self.settings.base_stake;
                info!(
                    round_id = round.id,
                    price_diff = %prediction.price_diff,
                    "Assuming win, wagering base stake early"
                );
                self.notify(format!(
                    "Round #{} looks won (move {}). Wagering base stake into round #{}.",
                    round.id, prediction.price_diff, current_id
                ))
                .await;
                Ok(true)
            }
            Classification::Loss => {
                self.state.conjecture = Some(Conjecture {
                    round_id: round.id,
                    assumed: AssumedOutcome::Loss,
                    stake_at_risk: prediction.stake_at_risk,
                    verified: false,
                });
                self.state.awaiting_resolution = false;
                self.state.assumed_losses += prediction.stake_at_risk;

                let projected = staking::next_stake(
                    self.state.consecutive_losses + 1,
                    self.state.total_lost_in_streak + self.state.assumed_losses,
                    self.settings.base_stake,
                    self.settings.max_double_downs,
                );
                if projected > self.settings.max_early_stake {
                    let reason = HaltReason::EarlyStakeCeiling {
                        projected,
                        ceiling: self.settings.max_early_stake,
                    };
                    warn!(%reason, "Early stake above ceiling, halting");
                    self.notify(format!(
                        "HALTED: {reason}. Streak: {} real losses ({}), assumed {}. /continue to resume.",
                        self.state.consecutive_losses,
                        self.state.total_lost_in_streak,
                        self.state.assumed_losses,
                    ))
                    .await;
                    self.state.halt(reason);
                    return Ok(false);
                }

                self.state.next_stake = projected;
                info!(
                    round_id = round.id,
                    price_diff = %prediction.price_diff,
                    next_stake = %projected,
                    "Assuming loss, doubling into the next round early"
                );
                self.notify(format!(
                    "Round #{} looks lost (move {}). Wagering {} into round #{}.",
                    round.id, prediction.price_diff, projected, current_id
                ))
                .await;
                Ok(true)
            }
        }
    }

    // -- Wagering --------------------------------------------------------

    async fn maybe_wager(&mut self, current_id: u64, early_authorized: bool) -> Result<()> {
        if self.state.awaiting_resolution {
            return Ok(());
        }
        // At most one wager per round.
        if self.state.last_wagered_round == Some(current_id) {
            return Ok(());
        }
        if let Some(skip) = self.state.skip_round {
            if skip == current_id {
                debug!(round_id = current_id, "Round skipped after uncertain prediction");
                return Ok(());
            }
            if current_id > skip {
                self.state.skip_round = None;
            }
        }

        // The ledger is authoritative: adopt a position the state lost
        // track of (e.g. after a confirmation timeout last tick).
        if let Some(position) = self.gateway.position(current_id).await? {
            warn!(
                round_id = current_id,
                stake = %position.stake,
                "Unrecorded position found in ledger, adopting"
            );
            self.state.record_wager(current_id, position.stake);
            return Ok(());
        }

        let round = self.gateway.round_info(current_id).await?;
        let secs_to_lock = round.seconds_until_lock(Utc::now());
        let in_window =
            secs_to_lock > WAGER_WINDOW_MIN_SECS && secs_to_lock <= WAGER_WINDOW_MAX_SECS;
        if !(in_window || early_authorized) {
            return Ok(());
        }

        let stake = self.state.next_stake;
        let balance = self.gateway.wallet_balance().await?;
        if balance < stake {
            let reason = HaltReason::InsufficientFunds { balance, required: stake };
            warn!(%reason, "Halting");
            self.notify(format!("HALTED: {reason}.")).await;
            self.state.halt(reason);
            return Ok(());
        }

        let side = self.settings.side.pick();
        let receipt = self.gateway.wager(current_id, side, stake).await?;
        self.state.record_wager(current_id, stake);

        info!(
            round_id = current_id,
            %side,
            %stake,
            tx_hash = %receipt.tx_hash,
            streak = self.state.consecutive_losses,
            "Wager confirmed"
        );
        self.notify(format!(
            "Wagered {stake} {side} on round #{current_id} (streak {}).",
            self.state.consecutive_losses
        ))
        .await;
        Ok(())
    }

    // -- Reconciliation --------------------------------------------------

    /// Apply a finalized round's real outcome exactly once. Verifies and
    /// discards a conjecture held for this round.
    async fn reconcile(&mut self, round: &Round, position: Option<&RoundPosition>) -> Result<()> {
        // A conjecture is used for at most one verification.
        let held = self.state.conjecture.as_ref().map(|c| c.round_id);
        let conjecture = if held == Some(round.id) {
            self.state.conjecture.take()
        } else {
            None
        };

        if self.state.last_wagered_round == Some(round.id) {
            self.state.awaiting_resolution = false;
        }

        let Some(position) = position else {
            warn!(round_id = round.id, "No ledger entry for finalized round");
            return Ok(());
        };

        if !self.state.reconciled.insert(round.id) {
            debug!(round_id = round.id, "Round already reconciled");
            return Ok(());
        }

        if let Some(c) = &conjecture {
            let actual = if position.wins(round) { "win" } else { "loss" };
            info!(
                round_id = round.id,
                assumed = %c.assumed,
                actual,
                "Conjecture verified"
            );
        }

        if position.wins(round) {
            self.apply_win(round, position).await;
        } else {
            self.apply_loss(round, position, conjecture).await;
        }
        Ok(())
    }

    /// A real win clears the whole streak, real and assumed alike.
    async fn apply_win(&mut self, round: &Round, position: &RoundPosition) {
        self.state.wins += 1;
        let recovered = self.state.total_lost_in_streak;
        self.state.reset_streak(self.settings.base_stake);

        // Claim failures are non-fatal: winnings stay claimable.
        match self.gateway.claim(&[round.id]).await {
            Ok(tx_hash) => debug!(round_id = round.id, tx_hash, "Claim submitted"),
            Err(e) => warn!(round_id = round.id, error = %e, "Claim failed, winnings remain claimable"),
        }

        let balance_note = match self.gateway.wallet_balance().await {
            Ok(balance) => format!(" Balance: {balance}."),
            Err(_) => String::new(),
        };

        info!(
            round_id = round.id,
            stake = %position.stake,
            recovered = %recovered,
            "Round won, streak cleared"
        );
        self.notify(format!(
            "WIN on round #{} (stake {}). Streak cleared.{balance_note}",
            round.id, position.stake
        ))
        .await;
    }

    /// A real loss grows the streak. If a conjecture already carried the
    /// stake as an assumed loss, the amount moves from the assumed carry
    /// into the real streak instead of being counted twice.
    async fn apply_loss(
        &mut self,
        round: &Round,
        position: &RoundPosition,
        conjecture: Option<Conjecture>,
    ) {
        self.state.losses += 1;
        self.state.consecutive_losses += 1;

        match &conjecture {
            Some(c) if c.assumed == AssumedOutcome::Loss => {
                let carried = (self.state.assumed_losses - position.stake).max(Decimal::ZERO);
                self.state.assumed_losses = carried;
                self.state.total_lost_in_streak += position.stake;
            }
            _ => {
                self.state.total_lost_in_streak += position.stake;
            }
        }

        self.state.next_stake = staking::next_stake(
            self.state.consecutive_losses,
            self.state.total_lost_in_streak + self.state.assumed_losses,
            self.settings.base_stake,
            self.settings.max_double_downs,
        );

        info!(
            round_id = round.id,
            stake = %position.stake,
            streak = self.state.consecutive_losses,
            total_lost = %self.state.total_lost_in_streak,
            next_stake = %self.state.next_stake,
            "Round lost"
        );

        if self.state.consecutive_losses > self.settings.max_double_downs {
            let reason = HaltReason::LossCapExceeded {
                consecutive_losses: self.state.consecutive_losses,
            };
            warn!(%reason, "Halting");
            self.notify(format!(
                "HALTED: {reason}. Lost {} over the streak (assumed {}), next stake would be {}. \
                 /continue resumes with the streak intact, /reset clears it.",
                self.state.total_lost_in_streak,
                self.state.assumed_losses,
                self.state.next_stake,
            ))
            .await;
            self.state.halt(reason);
        } else {
            self.notify(format!(
                "LOSS on round #{} (stake {}). Streak {} / {}, next stake {}.",
                round.id,
                position.stake,
                self.state.consecutive_losses,
                self.settings.max_double_downs,
                self.state.next_stake,
            ))
            .await;
        }
    }

    // -- Operator commands ----------------------------------------------

    /// Handle one chat line and produce the reply. Applied between
    /// ticks, never mid-tick.
    pub async fn handle_command(&mut self, text: &str) -> String {
        let command = match control::parse(text) {
            Ok(c) => c,
            Err(e) => return e.to_string(),
        };

        match command {
            Command::Start => {
                if let Some(reason) = &self.state.halted {
                    format!("Halted: {reason}. Use /continue or /reset first.")
                } else if self.state.running {
                    "Already running.".to_string()
                } else {
                    self.state.running = true;
                    info!("Engine started by operator");
                    "Started.".to_string()
                }
            }
            Command::Stop => {
                if !self.state.running {
                    "Not running.".to_string()
                } else {
                    self.state.running = false;
                    info!("Engine stopped by operator");
                    "Stopped. A submitted wager still settles.".to_string()
                }
            }
            Command::Continue => match self.state.halted.take() {
                Some(reason) => {
                    self.state.running = true;
                    info!(%reason, "Engine resumed after halt");
                    format!("Resumed after halt ({reason}). Streak preserved.")
                }
                None => "Not halted.".to_string(),
            },
            Command::Reset => {
                self.state.reset_streak(self.settings.base_stake);
                self.state.conjecture = None;
                self.state.skip_round = None;
                self.state.awaiting_resolution = false;
                self.state.last_wagered_round = None;
                self.state.halted = None;
                info!("Betting sequence reset by operator");
                "Sequence reset: streak cleared, counters kept.".to_string()
            }
            Command::Status => format!(
                "Phase: {}. Streak: {} losses ({} real, {} assumed). Next stake: {}. Last round: {}.",
                self.state.phase(),
                self.state.consecutive_losses,
                self.state.total_lost_in_streak,
                self.state.assumed_losses,
                self.state.next_stake,
                self.state
                    .last_wagered_round
                    .map(|id| format!("#{id}"))
                    .unwrap_or_else(|| "none".to_string()),
            ),
            Command::Balance => match self.gateway.wallet_balance().await {
                Ok(balance) => format!("Balance: {balance}"),
                Err(e) => format!("Balance unavailable: {e}"),
            },
            Command::Stats => format!(
                "Bets: {} | Wins: {} | Losses: {} | Win rate: {:.1}% | Total wagered: {}",
                self.state.total_bets,
                self.state.wins,
                self.state.losses,
                self.state.win_rate() * Decimal::from(100),
                self.state.total_wagered,
            ),
            Command::ShowSettings => self.settings.to_string(),
            Command::Help => control::help_text().to_string(),
            setter => self.apply_setting(setter),
        }
    }

    fn apply_setting(&mut self, command: Command) -> String {
        if self.state.running {
            return "Stop the engine before changing settings (/stop).".to_string();
        }
        match command {
            Command::SetBaseStake(value) => {
                self.settings.base_stake = value;
                if self.state.consecutive_losses == 0 {
                    self.state.next_stake = value;
                }
                format!("Base stake set to {value}.")
            }
            Command::SetMaxDoubleDowns(n) => {
                self.settings.max_double_downs = n;
                format!("Max double-downs set to {n}.")
            }
            Command::SetSide(mode) => {
                self.settings.side = mode;
                format!("Side set to {mode}.")
            }
            Command::SetPrediction(enabled) => {
                self.settings.prediction_enabled = enabled;
                format!("Early prediction {}.", if enabled { "on" } else { "off" })
            }
            Command::SetThreshold(value) => {
                self.settings.prediction_threshold = value;
                format!("Prediction threshold set to {value}.")
            }
            Command::SetMaxEarlyStake(value) => {
                self.settings.max_early_stake = value;
                format!("Max early stake set to {value}.")
            }
            _ => unreachable!("non-setter commands handled above"),
        }
    }

    async fn notify(&self, text: String) {
        if let Err(e) = self.notifier.send(&text).await {
            warn!(error = %e, "Notification failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
