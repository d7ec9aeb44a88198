use crate::annotate::{Annotator, HeikinAshiAnnotator, RsiAnnotator};
use crate::ledger::PositionLedger;
use crate::models::{Bar, ExitReason, Position, PositionSide, TradeIntent};
use crate::param_utils::{get_param, get_param_clamped, get_param_usize_at_least};
use crate::series::AssetSeries;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

const HA_KEY: &str = "ha_close_4h";
const RSI_KEY: &str = "rsi_4h_14";

/// Trend-reversal strategy on a resampled Heikin-Ashi close: four consecutive
/// resample steps moving one way plus a reversal of the latest step opens
/// against the prior trend when the slow RSI confirms an extreme. An open
/// position is closed on the opposite reversal once a minimum holding period
/// has passed.
#[derive(Debug)]
pub struct HaReversalStrategy {
    risk_per_trade: f64,
    min_trade_balance: f64,
    stop_loss_ratio: f64,
    stride: usize,
    rsi_period: usize,
    rsi_low: f64,
    rsi_high: f64,
    take_profit_rsi_long: f64,
    take_profit_rsi_short: f64,
    min_hold_minutes: i64,
}

impl HaReversalStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            risk_per_trade: get_param(parameters, "riskPerTrade", 0.1),
            min_trade_balance: get_param(parameters, "minTradeBalance", 10.0),
            stop_loss_ratio: get_param_clamped(parameters, "stopLossRatio", 0.98, 0.5, 1.0),
            stride: get_param_usize_at_least(parameters, "haStride", 240, 1),
            rsi_period: get_param_usize_at_least(parameters, "rsiPeriod", 14, 2),
            rsi_low: get_param(parameters, "rsiLow", 30.0),
            rsi_high: get_param(parameters, "rsiHigh", 70.0),
            take_profit_rsi_long: get_param(parameters, "takeProfitRsiLong", 65.0),
            take_profit_rsi_short: get_param(parameters, "takeProfitRsiShort", 40.0),
            min_hold_minutes: get_param(parameters, "minHoldMinutes", 240.0) as i64,
        }
    }

    /// Heikin-Ashi close one..four resample steps back from `index`.
    fn past_steps(&self, series: &AssetSeries, index: usize) -> Option<[f64; 4]> {
        let mut past = [0.0; 4];
        for (j, slot) in past.iter_mut().enumerate() {
            *slot = series
                .get(index - self.stride * (j + 1))?
                .column(HA_KEY)?;
        }
        Some(past)
    }
}

impl super::Strategy for HaReversalStrategy {
    fn id(&self) -> &str {
        "ha_reversal"
    }

    fn warmup_bars(&self) -> usize {
        self.stride * 4
    }

    fn annotators(&self) -> Vec<Box<dyn Annotator>> {
        vec![
            Box::new(RsiAnnotator::new(self.rsi_period, self.stride, RSI_KEY)),
            Box::new(HeikinAshiAnnotator::new(self.stride, HA_KEY)),
        ]
    }

    fn apply(
        &mut self,
        series: &AssetSeries,
        index: usize,
        bar: &Bar,
        timestamp: DateTime<Utc>,
        ledger: &PositionLedger,
        available_balance: f64,
    ) -> Vec<TradeIntent> {
        if index < self.stride * 4 {
            return Vec::new();
        }
        let (Some(ha), Some(rsi)) = (bar.column(HA_KEY), bar.column(RSI_KEY)) else {
            return Vec::new();
        };
        let Some(past) = self.past_steps(series, index) else {
            return Vec::new();
        };

        if let Some(position) = ledger.get(&bar.symbol) {
            let held = timestamp - position.opened_at;
            if held < Duration::minutes(self.min_hold_minutes) {
                return Vec::new();
            }
            let reverse = match position.side {
                PositionSide::Short => ha > past[0],
                PositionSide::Long => ha < past[0],
            };
            if reverse {
                return vec![TradeIntent::Close {
                    symbol: bar.symbol.clone(),
                    exit_side: position.side.required_exit_side(),
                    exit_price: bar.close,
                    reason: ExitReason::Reversal,
                }];
            }
            return Vec::new();
        }

        if available_balance <= self.min_trade_balance {
            return Vec::new();
        }
        let notional = available_balance * self.risk_per_trade;

        let rising_run = past[0] < past[1] && past[1] < past[2] && past[2] < past[3];
        let falling_run = past[0] > past[1] && past[1] > past[2] && past[2] > past[3];

        if ha > past[0] && rising_run && rsi < self.rsi_low {
            return vec![TradeIntent::Open {
                symbol: bar.symbol.clone(),
                side: PositionSide::Long,
                price: bar.close,
                notional,
                stop_loss: bar.close * self.stop_loss_ratio,
                metadata: None,
            }];
        }
        if ha < past[0] && falling_run && rsi > self.rsi_high {
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
