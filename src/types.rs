//! Shared types for the ROUNDBET agent.
//!
//! The data model used across all modules: round and position snapshots
//! read from the chain, the engine-owned betting state with its pure
//! transition helpers, and the conjecture bookkeeping for early
//! prediction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Stakes are settled in an 18-decimal native currency, but the minimum
/// unit the contract meaningfully distinguishes is 1e-6. Every stake the
/// engine produces is truncated to this precision.
pub const STAKE_DECIMALS: u32 = 6;

/// How many already-reconciled round ids are remembered for duplicate
/// suppression. Oldest evicted first.
pub const RECONCILED_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Direction of a wager within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Up => write!(f, "UP"),
            Side::Down => write!(f, "DOWN"),
        }
    }
}

/// Operator-configured side selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideMode {
    Up,
    Down,
    Random,
}

impl SideMode {
    /// Resolve the mode to a concrete side for the next wager.
    pub fn pick(&self) -> Side {
        match self {
            SideMode::Up => Side::Up,
            SideMode::Down => Side::Down,
            SideMode::Random => {
                if rand::random::<bool>() {
                    Side::Up
                } else {
                    Side::Down
                }
            }
        }
    }
}

impl fmt::Display for SideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideMode::Up => write!(f, "up"),
            SideMode::Down => write!(f, "down"),
            SideMode::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for SideMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "bull" => Ok(SideMode::Up),
            "down" | "bear" => Ok(SideMode::Down),
            "random" | "rand" => Ok(SideMode::Random),
            _ => Err(anyhow::anyhow!("Unknown side mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Round & position (chain snapshots, read-only to the engine)
// ---------------------------------------------------------------------------

/// One betting round as reported by the prediction contract.
///
/// `close_price` is zero until the oracle finalises the round.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub id: u64,
    pub lock_timestamp: DateTime<Utc>,
    pub close_timestamp: DateTime<Utc>,
    pub lock_price: Decimal,
    pub close_price: Decimal,
}

impl Round {
    /// A round is finalized once the oracle has written a close price.
    pub fn is_finalized(&self) -> bool {
        !self.close_price.is_zero()
    }

    /// Whole seconds until the round locks (negative once locked).
    pub fn seconds_until_lock(&self, now: DateTime<Utc>) -> i64 {
        (self.lock_timestamp - now).num_seconds()
    }

    /// Whole seconds until the round closes (negative once closed).
    pub fn seconds_until_close(&self, now: DateTime<Utc>) -> i64 {
        (self.close_timestamp - now).num_seconds()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round #{} (lock {} close {})",
            self.id, self.lock_price, self.close_price
        )
    }
}

/// The wallet's position in one round, as recorded in the contract ledger.
/// The contract enforces at most one position per round per wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundPosition {
    pub side: Side,
    pub stake: Decimal,
    pub claimed: bool,
}

impl RoundPosition {
    /// Whether the position wins against a finalized round.
    pub fn wins(&self, round: &Round) -> bool {
        match self.side {
            Side::Up => round.close_price > round.lock_price,
            Side::Down => round.close_price < round.lock_price,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime settings (operator-tunable between runs)
// ---------------------------------------------------------------------------

/// Strategy parameters the operator may change while the engine is stopped.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Stake placed at the start of a streak.
    pub base_stake: Decimal,
    /// How many consecutive losses the doubling scheme will chase (1–15).
    pub max_double_downs: u32,
    pub side: SideMode,
    /// Early-prediction mode on/off.
    pub prediction_enabled: bool,
    /// Noise band for the predictor: price moves smaller than this are
    /// treated as uncertain (0.05–2.0).
    pub prediction_threshold: Decimal,
    /// Ceiling for a stake sized from an assumed (unverified) loss.
    pub max_early_stake: Decimal,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base stake: {} | max double-downs: {} | side: {} | prediction: {} | threshold: {} | max early stake: {}",
            self.base_stake,
            self.max_double_downs,
            self.side,
            if self.prediction_enabled { "on" } else { "off" },
            self.prediction_threshold,
            self.max_early_stake,
        )
    }
}

// ---------------------------------------------------------------------------
// Conjecture (early-prediction bookkeeping)
// ---------------------------------------------------------------------------

/// What the predictor assumed about a not-yet-finalized round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssumedOutcome {
    Win,
    Loss,
}

impl fmt::Display for AssumedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssumedOutcome::Win => write!(f, "win"),
            AssumedOutcome::Loss => write!(f, "loss"),
        }
    }
}

/// An unverified early guess about a round still awaiting finalization.
///
/// At most one conjecture is live at a time; it is discarded after a
/// single verification against the real outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Conjecture {
    pub round_id: u64,
    pub assumed: AssumedOutcome,
    /// The stake that was at risk in the conjectured round. When the
    /// assumption is a loss this amount is carried in
    /// `BettingState::assumed_losses` until verification.
    pub stake_at_risk: Decimal,
    pub verified: bool,
}

// ---------------------------------------------------------------------------
// Recency set of reconciled rounds
// ---------------------------------------------------------------------------

/// Bounded recency set of round ids whose outcome has already been
/// applied. Guarantees each round is reconciled at most once even if
/// ticks race ahead of confirmation.
#[derive(Debug, Clone, Default)]
pub struct ReconciledRounds {
    ids: VecDeque<u64>,
}

impl ReconciledRounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Record a round id. Returns false if it was already present
    /// (i.e. the round must not be reconciled again).
    pub fn insert(&mut self, id: u64) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push_back(id);
        while self.ids.len() > RECONCILED_CAPACITY {
            self.ids.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Halt reasons & engine phase
// ---------------------------------------------------------------------------

/// Why the engine stopped itself. Requires operator action to resume.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    /// Wallet balance below the required stake.
    InsufficientFunds { balance: Decimal, required: Decimal },
    /// Loss streak exceeded the configured double-down budget.
    LossCapExceeded { consecutive_losses: u32 },
    /// A stake sized from an assumed loss would exceed the early ceiling.
    EarlyStakeCeiling { projected: Decimal, ceiling: Decimal },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::InsufficientFunds { balance, required } => {
                write!(f, "insufficient funds (balance {balance}, required {required})")
            }
            HaltReason::LossCapExceeded { consecutive_losses } => {
                write!(f, "loss cap exceeded ({consecutive_losses} consecutive losses)")
            }
            HaltReason::EarlyStakeCeiling { projected, ceiling } => {
                write!(f, "early stake {projected} above ceiling {ceiling}")
            }
        }
    }
}

/// The conceptual state of the engine, derived from `BettingState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    ReadyToWager,
    AwaitingResolution,
    HoldingConjecture,
    Halted,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePhase::Idle => write!(f, "idle"),
            EnginePhase::ReadyToWager => write!(f, "ready to wager"),
            EnginePhase::AwaitingResolution => write!(f, "awaiting resolution"),
            EnginePhase::HoldingConjecture => write!(f, "holding conjecture"),
            EnginePhase::Halted => write!(f, "halted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Betting state
// ---------------------------------------------------------------------------

/// The engine-owned operating state. Mutated only between suspension
/// points of a single in-flight tick; no locking needed.
#[derive(Debug, Clone)]
pub struct BettingState {
    pub running: bool,
    pub halted: Option<HaltReason>,
    /// True between placing a wager and reconciling that round's outcome.
    /// A live conjecture takes over tracking its round, so the two are
    /// never both set for the same round.
    pub awaiting_resolution: bool,
    /// Most recent round this wallet wagered on. Only ever advances, or
    /// is cleared by an explicit reset.
    pub last_wagered_round: Option<u64>,
    pub consecutive_losses: u32,
    /// Stake lost to confirmed outcomes in the current streak.
    pub total_lost_in_streak: Decimal,
    /// Stake presumed lost by an unverified conjecture. Folded into the
    /// real streak (or cleared) at verification, never counted twice.
    pub assumed_losses: Decimal,
    /// Stake for the next wager. Derived by the staking policy only.
    pub next_stake: Decimal,
    pub conjecture: Option<Conjecture>,
    /// Round id whose wager is suppressed after an uncertain prediction.
    pub skip_round: Option<u64>,
    pub reconciled: ReconciledRounds,

    // Cumulative counters: persist across streak resets.
    pub total_bets: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_wagered: Decimal,
}

impl BettingState {
    pub fn new(base_stake: Decimal) -> Self {
        Self {
            running: false,
            halted: None,
            awaiting_resolution: false,
            last_wagered_round: None,
            consecutive_losses: 0,
            total_lost_in_streak: Decimal::ZERO,
            assumed_losses: Decimal::ZERO,
            next_stake: base_stake,
            conjecture: None,
            skip_round: None,
            reconciled: ReconciledRounds::new(),
            total_bets: 0,
            wins: 0,
            losses: 0,
            total_wagered: Decimal::ZERO,
        }
    }

    /// Derive the conceptual engine phase from the state flags.
    pub fn phase(&self) -> EnginePhase {
        if self.halted.is_some() {
            EnginePhase::Halted
        } else if !self.running {
            EnginePhase::Idle
        } else if self.conjecture.is_some() {
            EnginePhase::HoldingConjecture
        } else if self.awaiting_resolution {
            EnginePhase::AwaitingResolution
        } else {
            EnginePhase::ReadyToWager
        }
    }

    /// Clear the loss streak after a confirmed win or operator reset.
    /// Counters are untouched.
    pub fn reset_streak(&mut self, base_stake: Decimal) {
        self.consecutive_losses = 0;
        self.total_lost_in_streak = Decimal::ZERO;
        self.assumed_losses = Decimal::ZERO;
        self.next_stake = base_stake;
    }

    /// Record a placed wager.
    pub fn record_wager(&mut self, round_id: u64, stake: Decimal) {
        self.awaiting_resolution = true;
        self.last_wagered_round = Some(round_id);
        self.total_bets += 1;
        self.total_wagered += stake;
    }

    pub fn halt(&mut self, reason: HaltReason) {
        self.running = false;
        self.halted = Some(reason);
    }

    /// Win rate over all reconciled wagers, as a fraction.
    pub fn win_rate(&self) -> Decimal {
        let settled = self.wins + self.losses;
        if settled == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(settled)
    }
}

/// Truncate an amount to the settlement currency's minimum unit.
pub fn round_stake(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(STAKE_DECIMALS, rust_decimal::RoundingStrategy::ToZero)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
