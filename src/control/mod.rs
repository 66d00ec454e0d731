//! Operator command surface.
//!
//! Parses chat text into typed commands and validates every numeric
//! input before it can reach the engine. Invalid input never mutates
//! state; the parse error doubles as the rejection reply.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use thiserror::Error;

use crate::types::SideMode;

/// Bounds for `/setmaxdd`.
pub const MAX_DOUBLE_DOWNS_RANGE: (u32, u32) = (1, 15);
/// Bounds for `/setthreshold`.
pub const THRESHOLD_MIN: Decimal = dec!(0.05);
pub const THRESHOLD_MAX: Decimal = dec!(2.0);

/// A validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Balance,
    Stats,
    Reset,
    Continue,
    ShowSettings,
    SetBaseStake(Decimal),
    SetMaxDoubleDowns(u32),
    SetSide(SideMode),
    SetPrediction(bool),
    SetThreshold(Decimal),
    SetMaxEarlyStake(Decimal),
    Help,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command: {0}. Try /help")]
    Unknown(String),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("max double-downs must be between {} and {}", MAX_DOUBLE_DOWNS_RANGE.0, MAX_DOUBLE_DOWNS_RANGE.1)]
    DoubleDownsOutOfRange,

    #[error("threshold must be between {THRESHOLD_MIN} and {THRESHOLD_MAX}")]
    ThresholdOutOfRange,

    #[error("side must be up, down or random")]
    InvalidSide,

    #[error("prediction mode must be on or off")]
    InvalidToggle,
}

/// Parse one chat line into a command.
pub fn parse(text: &str) -> Result<Command, CommandError> {
    let mut parts = text.split_whitespace();
    let word = parts.next().unwrap_or("");
    // Accept both "/cmd" and "/cmd@botname".
    let name = word.split('@').next().unwrap_or(word).to_lowercase();
    let arg = parts.next();

    match name.as_str() {
        "/start" => Ok(Command::Start),
        "/stop" => Ok(Command::Stop),
        "/status" => Ok(Command::Status),
        "/balance" => Ok(Command::Balance),
        "/stats" => Ok(Command::Stats),
        "/reset" => Ok(Command::Reset),
        "/continue" => Ok(Command::Continue),
        "/settings" => Ok(Command::ShowSettings),
        "/help" => Ok(Command::Help),
        "/setbase" => parse_amount(arg, "/setbase").map(Command::SetBaseStake),
        "/setmaxdd" => {
            let raw = arg.ok_or(CommandError::MissingArgument("/setmaxdd"))?;
            let n: u32 = raw
                .parse()
                .map_err(|_| CommandError::InvalidAmount(raw.to_string()))?;
            let (lo, hi) = MAX_DOUBLE_DOWNS_RANGE;
            if !(lo..=hi).contains(&n) {
                return Err(CommandError::DoubleDownsOutOfRange);
            }
            Ok(Command::SetMaxDoubleDowns(n))
        }
        "/setside" => {
            let raw = arg.ok_or(CommandError::MissingArgument("/setside"))?;
            SideMode::from_str(raw)
                .map(Command::SetSide)
                .map_err(|_| CommandError::InvalidSide)
        }
        "/setprediction" => match arg.map(str::to_lowercase).as_deref() {
            Some("on") => Ok(Command::SetPrediction(true)),
            Some("off") => Ok(Command::SetPrediction(false)),
            Some(_) => Err(CommandError::InvalidToggle),
            None => Err(CommandError::MissingArgument("/setprediction")),
        },
        "/setthreshold" => {
            let value = parse_amount(arg, "/setthreshold")?;
            if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&value) {
                return Err(CommandError::ThresholdOutOfRange);
            }
            Ok(Command::SetThreshold(value))
        }
        "/setmaxearly" => parse_amount(arg, "/setmaxearly").map(Command::SetMaxEarlyStake),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_amount(arg: Option<&str>, command: &'static str) -> Result<Decimal, CommandError> {
    let raw = arg.ok_or(CommandError::MissingArgument(command))?;
    let value =
        Decimal::from_str(raw).map_err(|_| CommandError::InvalidAmount(raw.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(CommandError::NonPositiveAmount);
    }
    Ok(value)
}

/// Reply text for `/help`.
pub fn help_text() -> &'static str {
    "Commands:\n\
     /start /stop /continue /reset\n\
     /status /balance /stats /settings\n\
     /setbase <amount>\n\
     /setmaxdd <1-15>\n\
     /setside <up|down|random>\n\
     /setprediction <on|off>\n\
     /setthreshold <0.05-2.0>\n\
     /setmaxearly <amount>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_commands() {
        assert_eq!(parse("/start"), Ok(Command::Start));
        assert_eq!(parse("/stop"), Ok(Command::Stop));
        assert_eq!(parse("/continue"), Ok(Command::Continue));
        assert_eq!(parse("/settings"), Ok(Command::ShowSettings));
    }

    #[test]
    fn test_botname_suffix_stripped() {
        assert_eq!(parse("/status@roundbet_bot"), Ok(Command::Status));
    }

    #[test]
    fn test_set_base_stake() {
        assert_eq!(parse("/setbase 0.005"), Ok(Command::SetBaseStake(dec!(0.005))));
        assert_eq!(parse("/setbase"), Err(CommandError::MissingArgument("/setbase")));
        assert_eq!(parse("/setbase 0"), Err(CommandError::NonPositiveAmount));
        assert_eq!(parse("/setbase -1"), Err(CommandError::NonPositiveAmount));
        assert_eq!(
            parse("/setbase lots"),
            Err(CommandError::InvalidAmount("lots".to_string()))
        );
    }

    #[test]
    fn test_set_max_double_downs_bounds() {
        assert_eq!(parse("/setmaxdd 1"), Ok(Command::SetMaxDoubleDowns(1)));
        assert_eq!(parse("/setmaxdd 15"), Ok(Command::SetMaxDoubleDowns(15)));
        assert_eq!(parse("/setmaxdd 0"), Err(CommandError::DoubleDownsOutOfRange));
        assert_eq!(parse("/setmaxdd 16"), Err(CommandError::DoubleDownsOutOfRange));
    }

    #[test]
    fn test_set_threshold_bounds() {
        assert_eq!(parse("/setthreshold 0.05"), Ok(Command::SetThreshold(dec!(0.05))));
        assert_eq!(parse("/setthreshold 2.0"), Ok(Command::SetThreshold(dec!(2.0))));
        assert_eq!(parse("/setthreshold 0.04"), Err(CommandError::ThresholdOutOfRange));
        assert_eq!(parse("/setthreshold 2.5"), Err(CommandError::ThresholdOutOfRange));
    }

    #[test]
    fn test_set_side() {
        assert_eq!(parse("/setside up"), Ok(Command::SetSide(SideMode::Up)));
        assert_eq!(parse("/setside Random"), Ok(Command::SetSide(SideMode::Random)));
        assert_eq!(parse("/setside diagonal"), Err(CommandError::InvalidSide));
    }

    #[test]
    fn test_set_prediction_toggle() {
        assert_eq!(parse("/setprediction on"), Ok(Command::SetPrediction(true)));
        assert_eq!(parse("/setprediction off"), Ok(Command::SetPrediction(false)));
        // Case-insensitive, like the other argument parsers.
        assert_eq!(parse("/setprediction ON"), Ok(Command::SetPrediction(true)));
        assert_eq!(parse("/setprediction Off"), Ok(Command::SetPrediction(false)));
        assert_eq!(parse("/setprediction maybe"), Err(CommandError::InvalidToggle));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(parse("/moon"), Err(CommandError::Unknown(_))));
        assert!(matches!(parse("hello"), Err(CommandError::Unknown(_))));
    }
}
