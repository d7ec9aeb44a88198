use crate::annotate::{Annotator, RsiAnnotator};
use crate::ledger::PositionLedger;
use crate::models::{Bar, Position, PositionSide, TradeIntent};
use crate::param_utils::{get_param, get_param_clamped, get_param_usize_at_least};
use crate::series::AssetSeries;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const RSI_KEY: &str = "rsi_4h_14";

/// Range-exhaustion strategy: goes long when the slow RSI crosses back above
/// the oversold level after an entire lookback window spent below it, and
/// short on the mirrored condition at the overbought level.
#[derive(Debug)]
pub struct RsiRangeStrategy {
    risk_per_trade: f64,
    min_trade_balance: f64,
    stop_loss_ratio: f64,
    window: usize,
    rsi_period: usize,
    stride: usize,
    oversold: f64,
    overbought: f64,
    take_profit_rsi_long: f64,
    take_profit_rsi_short: f64,
}

impl RsiRangeStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            risk_per_trade: get_param(parameters, "riskPerTrade", 0.1),
            min_trade_balance: get_param(parameters, "minTradeBalance", 10.0),
            stop_loss_ratio: get_param_clamped(parameters, "stopLossRatio", 0.98, 0.5, 1.0),
            window: get_param_usize_at_least(parameters, "window", 50, 2),
            rsi_period: get_param_usize_at_least(parameters, "rsiPeriod", 14, 2),
            stride: get_param_usize_at_least(parameters, "rsiStride", 240, 1),
            oversold: get_param(parameters, "oversold", 30.0),
            overbought: get_param(parameters, "overbought", 70.0),
            take_profit_rsi_long: get_param(parameters, "takeProfitRsiLong", 65.0),
            take_profit_rsi_short: get_param(parameters, "takeProfitRsiShort", 40.0),
        }
    }
}

impl super::Strategy for RsiRangeStrategy {
    fn id(&self) -> &str {
        "rsi_range"
    }

    fn warmup_bars(&self) -> usize {
        self.window.max(self.rsi_period + 1)
    }

    fn annotators(&self) -> Vec<Box<dyn Annotator>> {
        vec![Box::new(RsiAnnotator::new(
            self.rsi_period,
            self.stride,
            RSI_KEY,
        ))]
    }

    fn apply(
        &mut self,
        series: &AssetSeries,
        index: usize,
        bar: &Bar,
        _timestamp: DateTime<Utc>,
        ledger: &PositionLedger,
        available_balance: f64,
    ) -> Vec<TradeIntent> {
        if index < self.window || ledger.get(&bar.symbol).is_some() {
            return Vec::new();
        }
        if available_balance <= self.min_trade_balance {
            return Vec::new();
        }
        let Some(current) = bar.column(RSI_KEY) else {
            return Vec::new();
        };

        let window = &series.bars()[index - self.window..index];
        let mut all_below = true;
        let mut all_above = true;
        for past in window {
            let Some(value) = past.column(RSI_KEY) else {
                return Vec::new();
            };
            all_below &= value < self.oversold;
            all_above &= value > self.overbought;
        }

        let notional = available_balance * self.risk_per_trade;
        if current > self.oversold && all_below {
            return vec![TradeIntent::Open {
                symbol: bar.symbol.clone(),
                side: PositionSide::Long,
                price: bar.close,
                notional,
                stop_loss: bar.close * self.stop_loss_ratio,
                metadata: None,
            }];
        }
        if current < self.overbought && all_above {
            return vec![TradeIntent::Open {
                symbol: bar.symbol.clone(),
                side: PositionSide::Short,
                price: bar.close,
                notional,
                stop_loss: bar.close * (2.0 - self.stop_loss_ratio),
                metadata: None,
            }];
        }

        Vec::new()
    }

    fn take_profit(
        &self,
        position: &Position,
        _series: &AssetSeries,
        _index: usize,
        bar: &Bar,
    ) -> Option<f64> {
        let rsi = bar.column(RSI_KEY)?;
        let hit = match position.side {
            PositionSide::Long => rsi >= self.take_profit_rsi_long,
            PositionSide::Short => rsi <= self.take_profit_rsi_short,
        };
        hit.then_some(bar.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn series_with_rsi(values: &[f64]) -> AssetSeries {
        let bars = values
            .iter()
            .enumerate()
            .map(|(i, &rsi)| {
                let mut bar =
                    Bar::new("SHIBUSDC", ts(i as i64), 100.0, 100.5, 99.5, 100.0, 10.0);
                bar.set_column(RSI_KEY, rsi);
                bar
            })
            .collect();
        AssetSeries::from_bars("SHIBUSDC", bars).unwrap()
    }

    fn small_window_params() -> HashMap<String, f64> {
        let mut params = HashMap::new();
        params.insert("window".to_string(), 5.0);
        params
    }

    #[test]
    fn long_after_window_entirely_oversold() {
        let mut strategy = RsiRangeStrategy::new(&small_window_params());
        let mut values = vec![25.0; 5];
        values.push(32.0);
        let series = series_with_rsi(&values);
        let bar = series.bars()[5].clone();

        let ledger = PositionLedger::new();
        let intents = strategy.apply(&series, 5, &bar, ts(5), &ledger, 1000.0);
        assert!(matches!(
            intents.as_slice(),
            [TradeIntent::Open {
                side: PositionSide::Long,
                ..
            }]
        ));
    }

    #[test]
    fn no_entry_when_window_is_mixed() {
        let mut strategy = RsiRangeStrategy::new(&small_window_params());
        let mut values = vec![25.0; 4];
        values.push(45.0);
        values.push(32.0);
        let series = series_with_rsi(&values);
        let bar = series.bars()[5].clone();

        let ledger = PositionLedger::new();
        assert!(strategy
            .apply(&series, 5, &bar, ts(5), &ledger, 1000.0)
            .is_empty());
    }

    #[test]
    fn short_after_window_entirely_overbought() {
        let mut strategy = RsiRangeStrategy::new(&small_window_params());
        let mut values = vec![80.0; 5];
        values.push(65.0);
        let series = series_with_rsi(&values);
        let bar = series.bars()[5].clone();

        let ledger = PositionLedger::new();
        let intents = strategy.apply(&series, 5, &bar, ts(5), &ledger, 1000.0);
        match intents.as_slice() {
            [TradeIntent::Open {
                side, stop_loss, ..
            }] => {
                assert_eq!(*side, PositionSide::Short);
                assert!((stop_loss - bar.close * 1.02).abs() < 1e-9);
            }
            other => panic!("unexpected intents {:?}", other),
        }
    }
}
