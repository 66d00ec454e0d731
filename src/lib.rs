//! ROUNDBET — Martingale betting agent for on-chain prediction rounds
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod chain;
pub mod config;
pub mod control;
pub mod engine;
pub mod feed;
pub mod strategy;
pub mod telegram;
pub mod types;
