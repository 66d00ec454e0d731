//! End-to-end engine simulations against an in-memory chain.
//!
//! Each test drives the engine tick by tick through a scripted sequence
//! of rounds and verifies the stake progression, halts, and recovery
//! behaviour over the whole sequence rather than a single transition.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use roundbet::chain::{ChainGateway, WagerReceipt};
use roundbet::engine::betting::BettingEngine;
use roundbet::feed::PriceFeed;
use roundbet::telegram::Notifier;
use roundbet::types::{
    EnginePhase, HaltReason, Round, RoundPosition, Settings, Side, SideMode,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChainInner {
    current: u64,
    rounds: HashMap<u64, Round>,
    positions: HashMap<u64, RoundPosition>,
    balance: Decimal,
    wagers: Vec<(u64, Side, Decimal)>,
    claims: Vec<u64>,
}

/// In-memory prediction chain scriptable from test code.
#[derive(Clone, Default)]
struct ScriptedChain(Arc<Mutex<ChainInner>>);

impl ScriptedChain {
    fn new(balance: Decimal) -> Self {
        let chain = Self::default();
        chain.0.lock().unwrap().balance = balance;
        chain
    }

    /// Make `id` the current round, locking in `secs_to_lock` seconds.
    fn open_round(&self, id: u64, secs_to_lock: i64, lock_price: Decimal) {
        let now = Utc::now();
        let mut inner = self.0.lock().unwrap();
        inner.current = id;
        inner.rounds.insert(
            id,
            Round {
                id,
                lock_timestamp: now + ChronoDuration::seconds(secs_to_lock),
                close_timestamp: now + ChronoDuration::seconds(secs_to_lock + 300),
                lock_price,
                close_price: Decimal::ZERO,
            },
        );
    }

    /// Finalize a round with the given close price.
    fn finalize(&self, id: u64, lock_price: Decimal, close_price: Decimal) {
        let now = Utc::now();
        self.0.lock().unwrap().rounds.insert(
            id,
            Round {
                id,
                lock_timestamp: now - ChronoDuration::seconds(600),
                close_timestamp: now - ChronoDuration::seconds(300),
                lock_price,
                close_price,
            },
        );
    }

    /// Re-time a round so it is locked and closes in `secs_to_close`
    /// seconds (the early-prediction window is measured from close).
    fn closing_soon(&self, id: u64, secs_to_close: i64, lock_price: Decimal) {
        let now = Utc::now();
        let mut inner = self.0.lock().unwrap();
        inner.rounds.insert(
            id,
            Round {
                id,
                lock_timestamp: now - ChronoDuration::seconds(300 - secs_to_close),
                close_timestamp: now + ChronoDuration::seconds(secs_to_close),
                lock_price,
                close_price: Decimal::ZERO,
            },
        );
    }

    fn wagers(&self) -> Vec<(u64, Side, Decimal)> {
        self.0.lock().unwrap().wagers.clone()
    }

    fn claims(&self) -> Vec<u64> {
        self.0.lock().unwrap().claims.clone()
    }

    fn balance(&self) -> Decimal {
        self.0.lock().unwrap().balance
    }
}

#[async_trait]
impl ChainGateway for ScriptedChain {
    async fn current_round_id(&self) -> Result<u64> {
        Ok(self.0.lock().unwrap().current)
    }

    async fn round_info(&self, round_id: u64) -> Result<Round> {
        self.0
            .lock()
            .unwrap()
            .rounds
            .get(&round_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown round {round_id}"))
    }

    async fn position(&self, round_id: u64) -> Result<Option<RoundPosition>> {
        Ok(self.0.lock().unwrap().positions.get(&round_id).cloned())
    }

    async fn wager(&self, round_id: u64, side: Side, amount: Decimal) -> Result<WagerReceipt> {
        let mut inner = self.0.lock().unwrap();
        inner.wagers.push((round_id, side, amount));
        inner.balance -= amount;
        inner
            .positions
            .insert(round_id, RoundPosition { side, stake: amount, claimed: false });
        Ok(WagerReceipt {
            round_id,
            side,
            amount,
            tx_hash: format!("0xsim{round_id}"),
            timestamp: Utc::now(),
        })
    }

    async fn claim(&self, round_ids: &[u64]) -> Result<String> {
        self.0.lock().unwrap().claims.extend_from_slice(round_ids);
        Ok("0xclaim".to_string())
    }

    async fn wallet_balance(&self) -> Result<Decimal> {
        Ok(self.0.lock().unwrap().balance)
    }
}

/// Price feed returning whatever the test last set.
#[derive(Clone)]
struct ScriptedFeed(Arc<Mutex<Decimal>>);

impl ScriptedFeed {
    fn new(price: Decimal) -> Self {
        Self(Arc::new(Mutex::new(price)))
    }

    fn set(&self, price: Decimal) {
        *self.0.lock().unwrap() = price;
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn spot_price(&self) -> Result<Decimal> {
        Ok(*self.0.lock().unwrap())
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<String>>);

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn settings(prediction: bool) -> Settings {
    Settings {
        base_stake: dec!(0.003),
        max_double_downs: 3,
        side: SideMode::Up,
        prediction_enabled: prediction,
        prediction_threshold: dec!(0.20),
        max_early_stake: dec!(0.5),
    }
}

type SimEngine = BettingEngine<ScriptedChain, ScriptedFeed>;

fn build(
    balance: Decimal,
    prediction: bool,
) -> (ScriptedChain, ScriptedFeed, Arc<RecordingNotifier>, SimEngine) {
    let chain = ScriptedChain::new(balance);
    let feed = ScriptedFeed::new(dec!(600));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = BettingEngine::new(
        chain.clone(),
        feed.clone(),
        notifier.clone(),
        settings(prediction),
    );
    engine.start();
    (chain, feed, notifier, engine)
}

/// Tick until the engine has wagered on `round_id` (panics after a few
/// attempts so a regression fails loudly instead of hanging).
async fn wager_on(engine: &mut SimEngine, chain: &ScriptedChain, round_id: u64) {
    for _ in 0..3 {
        engine.tick().await.unwrap();
        if engine.state().last_wagered_round == Some(round_id) {
            return;
        }
    }
    panic!("engine never wagered on round {round_id}");
}

// ---------------------------------------------------------------------------
// Martingale progression
// ---------------------------------------------------------------------------

/// Losses double the stake up to the cap, then a further loss halts
/// with the streak intact: 0.003, 0.006, 0.012, cap 0.024, halt.
#[tokio::test]
async fn losing_streak_doubles_then_halts_at_cap() {
    let (chain, _, notifier, mut engine) = build(dec!(10), false);
    let mut id = 100;
    let expected = [dec!(0.003), dec!(0.006), dec!(0.012), dec!(0.024)];

    for stake in expected {
        chain.open_round(id, 18, dec!(600));
        wager_on(&mut engine, &chain, id).await;
        assert_eq!(*chain.wagers().last().unwrap(), (id, Side::Up, stake));

        chain.finalize(id, dec!(600), dec!(599));
        chain.open_round(id + 1, 120, dec!(599));
        engine.tick().await.unwrap();
        id += 1;
    }

    // Fourth loss exceeds max_double_downs = 3.
    assert_eq!(engine.state().phase(), EnginePhase::Halted);
    assert_eq!(
        engine.state().halted,
        Some(HaltReason::LossCapExceeded { consecutive_losses: 4 })
    );
    assert_eq!(engine.state().total_lost_in_streak, dec!(0.045));
    // The capped stake is still what a /continue would wager next.
    assert_eq!(engine.state().next_stake, dec!(0.024));
    assert!(notifier.messages().iter().any(|m| m.contains("HALTED")));

    // No further wagers while halted.
    chain.open_round(id, 18, dec!(599));
    engine.tick().await.unwrap();
    assert_eq!(chain.wagers().len(), 4);
}

/// A win mid-streak resets to the base stake and claims the winnings.
#[tokio::test]
async fn win_after_losses_recovers_and_claims() {
    let (chain, _, _, mut engine) = build(dec!(10), false);

    // Two losses.
    for id in [100u64, 101] {
        chain.open_round(id, 18, dec!(600));
        wager_on(&mut engine, &chain, id).await;
        chain.finalize(id, dec!(600), dec!(599));
        chain.open_round(id + 1, 120, dec!(599));
        engine.tick().await.unwrap();
    }
    assert_eq!(engine.state().next_stake, dec!(0.012));

    // Third round wins.
    chain.open_round(102, 18, dec!(599));
    wager_on(&mut engine, &chain, 102).await;
    chain.finalize(102, dec!(599), dec!(600.5));
    chain.open_round(103, 120, dec!(600.5));
    engine.tick().await.unwrap();

    assert_eq!(engine.state().consecutive_losses, 0);
    assert_eq!(engine.state().next_stake, dec!(0.003));
    assert_eq!(engine.state().wins, 1);
    assert_eq!(engine.state().losses, 2);
    assert_eq!(chain.claims(), vec![102]);

    // The next wager starts a fresh streak at the base stake.
    chain.open_round(103, 18, dec!(600.5));
    wager_on(&mut engine, &chain, 103).await;
    assert_eq!(*chain.wagers().last().unwrap(), (103, Side::Up, dec!(0.003)));
}

/// /continue after a halt resumes the sequence with the streak intact,
/// /reset starts over from the base stake.
#[tokio::test]
async fn halt_recovery_commands() {
    let (chain, _, _, mut engine) = build(dec!(10), false);

    // Ride the full losing streak into the halt.
    for id in 100u64..104 {
        chain.open_round(id, 18, dec!(600));
        wager_on(&mut engine, &chain, id).await;
        chain.finalize(id, dec!(600), dec!(599));
        chain.open_round(id + 1, 120, dec!(599));
        engine.tick().await.unwrap();
    }
    assert_eq!(engine.state().phase(), EnginePhase::Halted);

    let reply = engine.handle_command("/continue").await;
    assert!(reply.contains("Streak preserved"));
    assert_eq!(engine.state().consecutive_losses, 4);
    assert_eq!(engine.state().next_stake, dec!(0.024));

    // Resumed engine wagers the capped stake.
    chain.open_round(104, 18, dec!(599));
    wager_on(&mut engine, &chain, 104).await;
    assert_eq!(*chain.wagers().last().unwrap(), (104, Side::Up, dec!(0.024)));

    // A reset clears the streak entirely.
    engine.handle_command("/stop").await;
    engine.handle_command("/reset").await;
    assert_eq!(engine.state().consecutive_losses, 0);
    assert_eq!(engine.state().next_stake, dec!(0.003));
}

/// Running out of funds halts before any transaction is submitted.
#[tokio::test]
async fn insufficient_funds_halts_before_submitting() {
    let (chain, _, _, mut engine) = build(dec!(0.002), false);

    chain.open_round(100, 18, dec!(600));
    engine.tick().await.unwrap();

    assert!(chain.wagers().is_empty());
    assert_eq!(chain.balance(), dec!(0.002));
    assert!(matches!(
        engine.state().halted,
        Some(HaltReason::InsufficientFunds { .. })
    ));
}

// ---------------------------------------------------------------------------
// Early prediction
// ---------------------------------------------------------------------------

/// An assumed loss doubles into the next round before the chain
/// finalizes, and the eventual real loss is not counted twice.
#[tokio::test]
async fn assumed_loss_wagers_early_and_folds_once() {
    let (chain, feed, _, mut engine) = build(dec!(10), true);

    chain.open_round(100, 18, dec!(600));
    wager_on(&mut engine, &chain, 100).await;

    // Round 100 nears its close, clearly against our Up position, while
    // round 101 is current but far from its own lock.
    chain.closing_soon(100, 20, dec!(600));
    chain.open_round(101, 120, dec!(600));
    feed.set(dec!(599.40));
    engine.tick().await.unwrap();

    assert_eq!(engine.state().phase(), EnginePhase::HoldingConjecture);
    assert_eq!(*chain.wagers().last().unwrap(), (101, Side::Up, dec!(0.006)));
    assert_eq!(engine.state().assumed_losses, dec!(0.003));

    // The chain confirms the loss two rounds later.
    chain.finalize(100, dec!(600), dec!(599.45));
    chain.open_round(102, 120, dec!(599.45));
    engine.tick().await.unwrap();

    assert!(engine.state().conjecture.is_none());
    assert_eq!(engine.state().consecutive_losses, 1);
    assert_eq!(engine.state().total_lost_in_streak, dec!(0.003));
    assert_eq!(engine.state().assumed_losses, Decimal::ZERO);
    // Stake for round 102 (if 101 also loses) would cover both.
    assert_eq!(engine.state().last_wagered_round, Some(101));
}

/// An uncertain reading wagers nothing, skips exactly one round, and
/// leaves the staking sequence untouched.
#[tokio::test]
async fn uncertain_prediction_skips_one_round_only() {
    let (chain, feed, _, mut engine) = build(dec!(10), true);

    chain.open_round(100, 18, dec!(600));
    wager_on(&mut engine, &chain, 100).await;
    let stake_before = engine.state().next_stake;

    chain.closing_soon(100, 20, dec!(600));
    chain.open_round(101, 120, dec!(600));
    feed.set(dec!(600.07));
    engine.tick().await.unwrap();

    assert!(engine.state().conjecture.is_none());
    assert_eq!(engine.state().skip_round, Some(101));
    assert_eq!(engine.state().next_stake, stake_before);

    // Round 100 finalizes as a win; round 101 is in window but skipped.
    chain.finalize(100, dec!(600), dec!(600.9));
    chain.open_round(101, 18, dec!(600));
    engine.tick().await.unwrap();
    assert_eq!(chain.wagers().len(), 1);

    // Round 102 is wagered on normally.
    chain.open_round(102, 18, dec!(600));
    wager_on(&mut engine, &chain, 102).await;
    assert_eq!(chain.wagers().len(), 2);
    assert_eq!(engine.state().skip_round, None);
}

/// An assumed win wagered early, later contradicted by the chain,
/// re-enters the doubling sequence from the real outcome.
#[tokio::test]
async fn assumed_win_contradicted_by_chain() {
    let (chain, feed, _, mut engine) = build(dec!(10), true);

    chain.open_round(100, 18, dec!(600));
    wager_on(&mut engine, &chain, 100).await;

    // Looks like a win near the close, so the base stake goes into 101.
    chain.closing_soon(100, 20, dec!(600));
    chain.open_round(101, 120, dec!(600));
    feed.set(dec!(600.55));
    engine.tick().await.unwrap();
    assert_eq!(*chain.wagers().last().unwrap(), (101, Side::Up, dec!(0.003)));

    // A late swing made round 100 a loss after all.
    chain.finalize(100, dec!(600), dec!(599.9));
    chain.open_round(102, 120, dec!(599.9));
    engine.tick().await.unwrap();

    // The streak reflects the real outcome.
    assert_eq!(engine.state().consecutive_losses, 1);
    assert_eq!(engine.state().total_lost_in_streak, dec!(0.003));
    assert_eq!(engine.state().losses, 1);
}

// ---------------------------------------------------------------------------
// Remote control over a live sequence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_lets_pending_round_settle() {
    let (chain, _, _, mut engine) = build(dec!(10), false);

    chain.open_round(100, 18, dec!(600));
    wager_on(&mut engine, &chain, 100).await;

    let reply = engine.handle_command("/stop").await;
    assert!(reply.contains("settles"));

    // While stopped nothing happens, even when the round finalizes.
    chain.finalize(100, dec!(600), dec!(601));
    chain.open_round(101, 18, dec!(601));
    engine.tick().await.unwrap();
    assert_eq!(engine.state().wins, 0);

    // Restarting reconciles the pending win and resumes wagering.
    engine.handle_command("/start").await;
    engine.tick().await.unwrap();
    assert_eq!(engine.state().wins, 1);
    assert_eq!(chain.claims(), vec![100]);
}

#[tokio::test]
async fn settings_change_applies_to_next_streak() {
    let (chain, _, _, mut engine) = build(dec!(10), false);

    engine.handle_command("/stop").await;
    let reply = engine.handle_command("/setbase 0.005").await;
    assert!(reply.contains("0.005"));
    engine.handle_command("/start").await;

    chain.open_round(100, 18, dec!(600));
    wager_on(&mut engine, &chain, 100).await;
    assert_eq!(*chain.wagers().last().unwrap(), (100, Side::Up, dec!(0.005)));
}
