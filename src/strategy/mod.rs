//! Strategy layer.
//!
//! Pure decision logic with no I/O: Martingale stake sizing and the
//! early-outcome predictor. The engine owns all state; these modules
//! compute values from what they are handed.

pub mod predictor;
pub mod staking;
