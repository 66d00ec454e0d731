//! Martingale stake sizing.
//!
//! Pure functions: each loss doubles the previous stake, so a win
//! recovers the whole streak plus one base stake in profit. Once the
//! configured double-down budget is exhausted the stake holds at a
//! deterministic ceiling instead of growing further.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::round_stake;

/// Compute the stake for the next wager.
///
/// - No streak: the base stake.
/// - Budget exhausted (`consecutive_losses >= max_double_downs`): a
///   deterministic ceiling from [`capped_stake`], independent of the
///   amounts actually lost.
/// - Otherwise: the base stake doubled once per loss in the streak.
///   With every stake following this progression, a win pays back all
///   prior losses plus one base stake.
///
/// All outputs are truncated to the settlement currency's minimum unit.
pub fn next_stake(
    consecutive_losses: u32,
    total_lost_in_streak: Decimal,
    base_stake: Decimal,
    max_double_downs: u32,
) -> Decimal {
    if consecutive_losses == 0 {
        return round_stake(base_stake);
    }
    if consecutive_losses >= max_double_downs {
        let capped = capped_stake(base_stake, max_double_downs);
        debug!(
            consecutive_losses,
            max_double_downs,
            total_lost = %total_lost_in_streak,
            capped = %capped,
            "Double-down budget exhausted, stake capped"
        );
        return capped;
    }

    let mut stake = base_stake;
    for _ in 0..consecutive_losses {
        stake *= dec!(2);
    }
    round_stake(stake)
}

/// The safety-ceiling stake once the double-down budget is exhausted.
///
/// The base stake doubled `max_double_downs` times; the same value the
/// progression would reach on its final allowed double-down.
/// Deterministic in the base stake and budget alone.
pub fn capped_stake(base_stake: Decimal, max_double_downs: u32) -> Decimal {
    let mut stake = base_stake;
    for _ in 0..max_double_downs {
        stake *= dec!(2);
    }
    round_stake(stake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_streak_returns_base() {
        assert_eq!(next_stake(0, Decimal::ZERO, dec!(0.003), 3), dec!(0.003));
        // The zero-loss branch wins even if a stale loss total is passed in.
        assert_eq!(next_stake(0, dec!(0.5), dec!(0.003), 3), dec!(0.003));
    }

    #[test]
    fn test_doubles_previous_stake_per_loss() {
        assert_eq!(next_stake(1, dec!(0.01), dec!(0.01), 5), dec!(0.02));
        assert_eq!(next_stake(2, dec!(0.03), dec!(0.01), 5), dec!(0.04));
        assert_eq!(next_stake(3, dec!(0.07), dec!(0.01), 5), dec!(0.08));
    }

    #[test]
    fn test_progression_is_geometric_not_loss_sum() {
        // After losses of 0.003 and 0.006 the third stake doubles the
        // previous stake (0.012), not the 0.009 lost so far (0.018).
        assert_eq!(next_stake(2, dec!(0.009), dec!(0.003), 5), dec!(0.012));
        // The loss total never steers the result below the cap either.
        assert_eq!(next_stake(2, dec!(5), dec!(0.003), 5), dec!(0.012));
    }

    #[test]
    fn test_full_recovery_plus_base_profit() {
        // 0.003 + 0.006 lost; the 0.012 stake at even odds pays 0.012,
        // netting the 0.009 streak back plus one base stake.
        let base = dec!(0.003);
        let lost = dec!(0.003) + dec!(0.006);
        let stake = next_stake(2, lost, base, 5);
        assert_eq!(stake - lost, base);
    }

    #[test]
    fn test_cap_formula_deterministic() {
        // 0.003 -> 0.006 -> 0.012 -> 0.024 over three doublings.
        assert_eq!(capped_stake(dec!(0.003), 3), dec!(0.024));
        // The cap ignores the actual loss total.
        assert_eq!(next_stake(3, dec!(0.001), dec!(0.003), 3), dec!(0.024));
        assert_eq!(next_stake(3, dec!(99), dec!(0.003), 3), dec!(0.024));
    }

    #[test]
    fn test_cap_applies_beyond_budget() {
        // Losses past the budget keep returning the same ceiling.
        assert_eq!(next_stake(7, dec!(1.5), dec!(0.003), 3), dec!(0.024));
    }

    #[test]
    fn test_cap_single_double_down() {
        assert_eq!(capped_stake(dec!(0.01), 1), dec!(0.02));
    }

    #[test]
    fn test_output_truncated_to_minimum_unit() {
        // 2 x 0.00000155 = 0.0000031; the seventh fractional digit is cut.
        assert_eq!(next_stake(1, dec!(0.00000155), dec!(0.00000155), 5), dec!(0.000003));
        assert_eq!(capped_stake(dec!(0.00000155), 1), dec!(0.000003));
    }

    #[test]
    fn test_cap_progression_base_001() {
        // baseStake=0.01, maxDoubleDowns=2: 0.01, 0.02, then capped.
        let base = dec!(0.01);
        assert_eq!(next_stake(0, Decimal::ZERO, base, 2), dec!(0.01));
        assert_eq!(next_stake(1, dec!(0.01), base, 2), dec!(0.02));
        assert_eq!(next_stake(2, dec!(0.03), base, 2), capped_stake(base, 2));
        assert_eq!(capped_stake(base, 2), dec!(0.04));
    }
}
