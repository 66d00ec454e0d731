//! Engine.
//!
//! The betting state machine: per-tick wagering decisions, outcome
//! reconciliation, early-prediction bookkeeping, and operator command
//! handling.

pub mod betting;
