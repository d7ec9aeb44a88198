use crate::annotate::{Annotator, MeanPriceAnnotator, RsiAnnotator, RsiReboundAnnotator};
use crate::ledger::PositionLedger;
use crate::models::{Bar, ExitReason, Position, PositionSide, TradeIntent};
use crate::param_utils::{get_param, get_param_usize_at_least};
use crate::series::AssetSeries;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;

const RSI_KEY: &str = "rsi_14";
const SLOW_RSI_KEY: &str = "rsi_4h_14";
const MEAN_PRICE_KEY: &str = "mean_price";
const REBOUND_KEY: &str = "rsi_rebound_price";

/// Per-symbol re-entry state: a stop-loss close arms the symbol for one
/// qualifying rebound re-entry; opening on that rebound disarms it. Closes for
/// any other reason leave the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReentryState {
    Normal,
    AwaitingReentry,
}

/// Long-only dip-rebound strategy: opens when the rebound annotator marked the
/// current bar, with the stop at the rolling minimum of the smoothed price.
/// After a stop-out it watches for the RSI to recover by a percentage over a
/// short lookback and re-enters once.
#[derive(Debug)]
pub struct RsiReboundStrategy {
    risk_per_trade: f64,
    min_trade_balance: f64,
    stop_window: usize,
    take_profit_rsi: f64,
    reentry_lookback: usize,
    reentry_delta_pct: f64,
    rsi_period: usize,
    slow_stride: usize,
    oversold: f64,
    slow_max: f64,
    rebound_step: usize,
    rebound_delta: f64,
    states: HashMap<String, ReentryState>,
}

impl RsiReboundStrategy {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            risk_per_trade: get_param(parameters, "riskPerTrade", 0.1),
            min_trade_balance: get_param(parameters, "minTradeBalance", 10.0),
            stop_window: get_param_usize_at_least(parameters, "stopWindow", 30, 2),
            take_profit_rsi: get_param(parameters, "takeProfitRsi", 65.0),
            reentry_lookback: get_param_usize_at_least(parameters, "reentryLookback", 10, 1),
            reentry_delta_pct: get_param(parameters, "reentryDeltaPct", 3.0),
            rsi_period: get_param_usize_at_least(parameters, "rsiPeriod", 14, 2),
            slow_stride: get_param_usize_at_least(parameters, "slowStride", 240, 1),
            oversold: get_param(parameters, "oversold", 30.0),
            slow_max: get_param(parameters, "slowRsiMax", 35.0),
            rebound_step: get_param_usize_at_least(parameters, "reboundStep", 10, 1),
            rebound_delta: get_param(parameters, "reboundDelta", 3.0),
            states: HashMap::new(),
        }
    }

    pub fn state(&self, symbol: &str) -> ReentryState {
        self.states
            .get(symbol)
            .copied()
            .unwrap_or(ReentryState::Normal)
    }

    fn open_long(
        &self,
        series: &AssetSeries,
        index: usize,
        bar: &Bar,
        available_balance: f64,
        reason: &str,
    ) -> Option<TradeIntent> {
        if available_balance <= self.min_trade_balance {
            return None;
        }

        // Stop at the lowest smoothed price over the window preceding entry.
        let stop_loss = series.bars()[index - self.stop_window..index]
            .iter()
            .filter_map(|b| b.column(MEAN_PRICE_KEY))
            .fold(f64::MAX, f64::min);
        if stop_loss == f64::MAX {
            return None;
        }

        Some(TradeIntent::Open {
            symbol: bar.symbol.clone(),
            side: PositionSide::Long,
            price: bar.close,
            notional: available_balance * self.risk_per_trade,
            stop_loss,
            metadata: Some(json!({ "reason": reason })),
        })
    }
}

impl super::Strategy for RsiReboundStrategy {
    fn id(&self) -> &str {
        "rsi_rebound"
    }

    fn warmup_bars(&self) -> usize {
        self.stop_window.max(self.rsi_period + 1)
    }

    fn annotators(&self) -> Vec<Box<dyn Annotator>> {
        vec![
            Box::new(MeanPriceAnnotator::new(MEAN_PRICE_KEY)),
            Box::new(RsiAnnotator::new(self.rsi_period, 1, RSI_KEY)),
            Box::new(RsiAnnotator::new(
                self.rsi_period,
                self.slow_stride,
                SLOW_RSI_KEY,
            )),
            Box::new(RsiReboundAnnotator::new(
                RSI_KEY,
                Some(SLOW_RSI_KEY.to_string()),
                self.slow_max,
                MEAN_PRICE_KEY,
                REBOUND_KEY,
                self.oversold,
                self.rebound_step,
                self.rebound_delta,
            )),
        ]
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
        if index < self.stop_window || index < 2 {
            return Vec::new();
        }
        if ledger.get(&bar.symbol).is_some() {
            // Exits are handled by the risk pass.
            return Vec::new();
        }

        if self.state(&bar.symbol) == ReentryState::AwaitingReentry
            && index >= self.reentry_lookback
        {
            let current = bar.column(RSI_KEY);
            let past = series
                .get(index - self.reentry_lookback)
                .and_then(|b| b.column(RSI_KEY));
            if let (Some(current), Some(past)) = (current, past) {
                if past > 0.0 {
                    let delta_pct = 100.0 * (current - past) / past;
                    if delta_pct >= self.reentry_delta_pct {
                        if let Some(intent) = self.open_long(
                            series,
                            index,
                            bar,
                            available_balance,
                            "REENTRY_AFTER_STOP",
                        ) {
                            self.states
                                .insert(bar.symbol.clone(), ReentryState::Normal);
                            return vec![intent];
                        }
                    }
                }
            }
        }

        if bar.column(REBOUND_KEY).is_some() {
            if let Some(intent) =
                self.open_long(series, index, bar, available_balance, "RSI_REBOUND")
            {
                return vec![intent];
            }
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
        if position.side == PositionSide::Long {
            if let Some(rsi) = bar.column(RSI_KEY) {
                if rsi >= self.take_profit_rsi {
                    return Some(bar.close);
                }
            }
        }
        None
    }

    fn on_position_closed(&mut self, symbol: &str, reason: ExitReason) {
        if reason == ExitReason::StopLoss {
            self.states
                .insert(symbol.to_string(), ReentryState::AwaitingReentry);
        }
    }
}
