use crate::annotate::Annotator;
use crate::error::EngineError;
use crate::ledger::PositionLedger;
use crate::models::{Bar, ExitReason, Position, TradeIntent};
use crate::series::AssetSeries;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One pluggable trading strategy. `apply` sees the symbol's history up to and
/// including the current bar and the set of open positions; it communicates
/// exclusively through returned intents and must not assume anything about the
/// order in which sibling symbols are evaluated within a tick. "No action" is
/// an empty vector, never an error.
pub trait Strategy: std::fmt::Debug {
    fn id(&self) -> &str;

    /// Bars of history required before `apply` can produce signals.
    fn warmup_bars(&self) -> usize;

    /// Indicator collaborators this strategy reads, in application order.
    fn annotators(&self) -> Vec<Box<dyn Annotator>>;

    fn apply(
        &mut self,
        series: &AssetSeries,
        index: usize,
        bar: &Bar,
        timestamp: DateTime<Utc>,
        ledger: &PositionLedger,
        available_balance: f64,
    ) -> Vec<TradeIntent>;

    /// Take-profit check for an open position during the risk pass. Returning
    /// a price closes at that price; stop-loss checks always run first.
    fn take_profit(
        &self,
        _position: &Position,
        _series: &AssetSeries,
        _index: usize,
        _bar: &Bar,
    ) -> Option<f64> {
        None
    }

    /// Called after a position on `symbol` was closed, with the reason. Lets a
    /// strategy maintain per-symbol state such as re-entry arming.
    fn on_position_closed(&mut self, _symbol: &str, _reason: ExitReason) {}
}

#[path = "strategies/rsi_rebound.rs"]
pub mod rsi_rebound;

pub use rsi_rebound::RsiReboundStrategy;

#[path = "strategies/ha_reversal.rs"]
pub mod ha_reversal;

pub use ha_reversal::HaReversalStrategy;

#[path = "strategies/rsi_range.rs"]
pub mod rsi_range;

pub use rsi_range::RsiRangeStrategy;

/// Resolves a strategy identifier once at configuration time. An unknown
/// identifier is a fatal initialization error, never a per-tick one.
pub fn create_strategy(
    strategy_id: &str,
    parameters: &HashMap<String, f64>,
) -> Result<Box<dyn Strategy>> {
    match strategy_id {
        "rsi_rebound" => Ok(Box::new(RsiReboundStrategy::new(parameters))),
        "ha_reversal" => Ok(Box::new(HaReversalStrategy::new(parameters))),
        "rsi_range" => Ok(Box::new(RsiRangeStrategy::new(parameters))),
        _ => Err(EngineError::UnknownStrategy(strategy_id.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_id_fails_at_construction() {
        let error = create_strategy("momentum_deluxe", &HashMap::new()).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn known_strategies_resolve() {
        for id in ["rsi_rebound", "ha_reversal", "rsi_range"] {
            let strategy = create_strategy(id, &HashMap::new()).unwrap();
            assert_eq!(strategy.id(), id);
        }
    }
}
