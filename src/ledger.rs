use crate::error::EngineError;
use crate::models::{Fill, Position, TradeIntent};
use crate::sink::TradeSink;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::BTreeMap;

/// Owns every open position and is the only place positions are created or
/// destroyed, which keeps the one-open-position-per-symbol invariant checkable
/// in one spot. Keyed sorted by symbol so iteration order is stable across
/// runs.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Removes and returns every open position. Used at a run boundary, when
    /// positions left open by a finished replay are disposed of rather than
    /// closed through a transition.
    pub fn drain(&mut self) -> Vec<Position> {
        std::mem::take(&mut self.positions).into_values().collect()
    }

    /// Runs one intent through the state machine. Rejections for expected
    /// run-time conditions (position already open, insufficient balance,
    /// nothing to close, unconfirmed fill) are logged and return `Ok(None)`;
    /// an invalid entry/exit side pairing is a fatal data error.
    pub fn execute(
        &mut self,
        intent: TradeIntent,
        sink: &mut dyn TradeSink,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Fill>> {
        match intent {
            TradeIntent::Open {
                symbol,
                side,
                price,
                notional,
                stop_loss,
                metadata,
            } => {
                if self.positions.contains_key(&symbol) {
                    warn!("Rejecting OPEN for {}: a position is already open", symbol);
                    return Ok(None);
                }
                if !notional.is_finite() || notional <= 0.0 {
                    warn!("Rejecting OPEN for {}: invalid notional {}", symbol, notional);
                    return Ok(None);
                }
                let available = sink.available_balance();
                if notional > available {
                    warn!(
                        "Rejecting OPEN for {}: notional {:.2} exceeds available balance {:.2}",
                        symbol, notional, available
                    );
                    return Ok(None);
                }

                match sink.open(&symbol, side, notional, price, timestamp)? {
                    Some(execution) => {
                        self.positions.insert(
                            symbol.clone(),
                            Position {
                                symbol,
                                side,
                                entry_price: price,
                                notional,
                                net_notional: execution.net_notional,
                                stop_loss,
                                opened_at: timestamp,
                                metadata,
                            },
                        );
                        Ok(Some(execution.fill))
                    }
                    None => {
                        warn!("OPEN for {} was not confirmed; nothing registered", symbol);
                        Ok(None)
                    }
                }
            }
            TradeIntent::Close {
                symbol,
                exit_side,
                exit_price,
                reason,
            } => {
                let Some(position) = self.positions.get(&symbol) else {
                    warn!("Rejecting CLOSE for {}: no open position", symbol);
                    return Ok(None);
                };
                if exit_side != position.side.required_exit_side() {
                    return Err(EngineError::SidePairing {
                        symbol,
                        entry_side: position.side,
                        exit_side,
                    }
                    .into());
                }

                let Some(position) = self.positions.remove(&symbol) else {
                    return Ok(None);
                };
                match sink.close(&position, exit_price, reason, timestamp, self)? {
                    Some(fill) => Ok(Some(fill)),
                    None => {
                        warn!(
                            "CLOSE for {} was not confirmed; restoring the position",
                            symbol
                        );
                        self.positions.insert(symbol, position);
                        Ok(None)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, FillSide, PositionSide};
    use crate::sink::SimulatedSink;
    use chrono::{Duration, TimeZone, Utc};

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn open_intent(symbol: &str, side: PositionSide, price: f64, notional: f64) -> TradeIntent {
        TradeIntent::Open {
            symbol: symbol.to_string(),
            side,
            price,
            notional,
            stop_loss: price * 0.98,
            metadata: None,
        }
    }

    #[test]
    fn one_open_position_per_symbol() {
        let mut ledger = PositionLedger::new();
        let mut sink = SimulatedSink::new(1000.0, 0.0);

        let first = ledger
            .execute(
                open_intent("SOLUSDC", PositionSide::Long, 100.0, 100.0),
                &mut sink,
                ts(0),
            )
            .unwrap();
        assert!(first.is_some());

        let second = ledger
            .execute(
                open_intent("SOLUSDC", PositionSide::Long, 101.0, 100.0),
                &mut sink,
                ts(1),
            )
            .unwrap();
        assert!(second.is_none());
        assert_eq!(ledger.len(), 1);
        assert_eq!(sink.account().fills().len(), 1);
    }

    #[test]
    fn close_without_position_is_a_no_op() {
        let mut ledger = PositionLedger::new();
        let mut sink = SimulatedSink::new(1000.0, 0.0);

        let result = ledger
            .execute(
                TradeIntent::Close {
                    symbol: "SOLUSDC".to_string(),
                    exit_side: FillSide::SellLong,
                    exit_price: 105.0,
                    reason: ExitReason::Signal,
                },
                &mut sink,
                ts(0),
            )
            .unwrap();

        assert!(result.is_none());
        assert_eq!(sink.account().available_balance(), 1000.0);
        assert!(sink.account().fills().is_empty());
        assert!(sink.account().pnl_log().is_empty());
    }

    #[test]
    fn open_rejected_when_notional_exceeds_balance() {
        let mut ledger = PositionLedger::new();
        let mut sink = SimulatedSink::new(50.0, 0.0);

        let result = ledger
            .execute(
                open_intent("SOLUSDC", PositionSide::Long, 100.0, 100.0),
                &mut sink,
                ts(0),
            )
            .unwrap();

        assert!(result.is_none());
        assert!(ledger.is_empty());
        assert_eq!(sink.account().available_balance(), 50.0);
    }

    #[test]
    fn mismatched_exit_side_is_fatal() {
        let mut ledger = PositionLedger::new();
        let mut sink = SimulatedSink::new(1000.0, 0.0);

        ledger
            .execute(
                open_intent("SOLUSDC", PositionSide::Long, 100.0, 100.0),
                &mut sink,
                ts(0),
            )
            .unwrap();

        let result = ledger.execute(
            TradeIntent::Close {
                symbol: "SOLUSDC".to_string(),
                exit_side: FillSide::BuyShort,
                exit_price: 90.0,
                reason: ExitReason::StopLoss,
            },
            &mut sink,
            ts(1),
        );

        let error = result.unwrap_err();
        assert!(error.downcast_ref::<EngineError>().is_some());
        // The position survives and no PnL was computed.
        assert!(ledger.contains("SOLUSDC"));
        assert!(sink.account().pnl_log().is_empty());
    }

    #[test]
    fn accepted_close_removes_position_and_emits_fill() {
        let mut ledger = PositionLedger::new();
        let mut sink = SimulatedSink::new(1000.0, 0.0);

        ledger
            .execute(
                open_intent("SOLUSDC", PositionSide::Long, 100.0, 100.0),
                &mut sink,
                ts(0),
            )
            .unwrap();
        let fill = ledger
            .execute(
                TradeIntent::Close {
                    symbol: "SOLUSDC".to_string(),
                    exit_side: FillSide::SellLong,
                    exit_price: 110.0,
                    reason: ExitReason::TakeProfit,
                },
                &mut sink,
                ts(5),
            )
            .unwrap()
            .expect("close should fill");

        assert_eq!(fill.side, FillSide::SellLong);
        assert!(ledger.is_empty());
        assert!((sink.account().available_balance() - 1010.0).abs() < 1e-9);
        assert_eq!(sink.account().pnl_log().len(), 1);
    }
}
