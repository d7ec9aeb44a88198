use crate::ledger::PositionLedger;
use crate::models::{ExitReason, FillSide, PositionSide, ReplayReport, TradeIntent};
use crate::series::AssetSeries;
use crate::sink::TradeSink;
use crate::strategy::Strategy;
use anyhow::Result;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Replays one or more asset series through a strategy in a single merged
/// chronological order, routing intents through the position ledger into a
/// trade sink. The same per-tick evaluation drives the live loop, so backtest
/// and production run identical logic.
pub struct ReplayEngine {
    strategy: Box<dyn Strategy>,
    ledger: PositionLedger,
    first_tick: Option<DateTime<Utc>>,
    last_tick: Option<DateTime<Utc>>,
}

impl ReplayEngine {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self {
            strategy,
            ledger: PositionLedger::new(),
            first_tick: None,
            last_tick: None,
        }
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Empties the ledger at a run boundary (for example between a warmup
    /// replay and live trading) and hands back whatever was still open.
    pub fn take_open_positions(&mut self) -> Vec<crate::models::Position> {
        self.ledger.drain()
    }

    /// Full backtest replay: walk the union of all timestamps ascending and
    /// evaluate each tick. Deterministic for identical inputs.
    pub fn run(
        &mut self,
        data: &[AssetSeries],
        sink: &mut dyn TradeSink,
        show_progress: bool,
    ) -> Result<ReplayReport> {
        // Stable symbol order within a tick. Strategies must not rely on it,
        // but replay determinism does.
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.sort_by(|&a, &b| data[a].symbol().cmp(data[b].symbol()));

        let timestamps: BTreeSet<DateTime<Utc>> = data
            .iter()
            .flat_map(|series| series.bars().iter().map(|bar| bar.timestamp))
            .collect();

        let progress = if show_progress {
            let pb = ProgressBar::new(timestamps.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut cursors = vec![0usize; data.len()];
        let mut present: Vec<(&AssetSeries, usize)> = Vec::new();
        for &timestamp in &timestamps {
            present.clear();
            for &i in &order {
                let series = &data[i];
                let cursor = &mut cursors[i];
                let bars = series.bars();
                while *cursor < bars.len() && bars[*cursor].timestamp < timestamp {
                    *cursor += 1;
                }
                if *cursor < bars.len() && bars[*cursor].timestamp == timestamp {
                    present.push((series, *cursor));
                }
            }

            self.evaluate_tick(&present, timestamp, sink)?;
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let symbols = data.iter().map(|s| s.symbol().to_string()).collect();
        Ok(self.build_report(sink, symbols))
    }

    /// Evaluates one timestamp: a signal pass over every symbol that has a bar
    /// here (sorted order), then a risk pass over every open position that was
    /// not opened this tick. Positions whose symbol has no bar at this
    /// timestamp carry over unresolved.
    pub fn evaluate_tick(
        &mut self,
        present: &[(&AssetSeries, usize)],
        timestamp: DateTime<Utc>,
        sink: &mut dyn TradeSink,
    ) -> Result<()> {
        for &(series, index) in present {
            let bar = &series.bars()[index];
            sink.mark_price(&bar.symbol, bar.close);

            let intents = self.strategy.apply(
                series,
                index,
                bar,
                timestamp,
                &self.ledger,
                sink.available_balance(),
            );
            for intent in intents {
                self.dispatch(intent, sink, timestamp)?;
            }
        }

        let mut planned: Vec<TradeIntent> = Vec::new();
        for position in self.ledger.iter() {
            if position.opened_at == timestamp {
                // Opened this tick; never evaluated for closure on the same bar.
                continue;
            }
            let Some(&(series, index)) = present
                .iter()
                .find(|(series, _)| series.symbol() == position.symbol)
            else {
                continue;
            };
            let bar = &series.bars()[index];

            let stop_hit = match position.side {
                PositionSide::Long => bar.low <= position.stop_loss,
                PositionSide::Short => bar.high >= position.stop_loss,
            };
            if stop_hit {
                planned.push(TradeIntent::Close {
                    symbol: position.symbol.clone(),
                    exit_side: position.side.required_exit_side(),
                    exit_price: position.stop_loss,
                    reason: ExitReason::StopLoss,
                });
                continue;
            }

            if let Some(exit_price) = self.strategy.take_profit(position, series, index, bar) {
                planned.push(TradeIntent::Close {
                    symbol: position.symbol.clone(),
                    exit_side: position.side.required_exit_side(),
                    exit_price,
                    reason: ExitReason::TakeProfit,
                });
            }
        }
        for intent in planned {
            self.dispatch(intent, sink, timestamp)?;
        }

        if self.first_tick.is_none() {
            self.first_tick = Some(timestamp);
        }
        self.last_tick = Some(timestamp);
        Ok(())
    }

    fn dispatch(
        &mut self,
        intent: TradeIntent,
        sink: &mut dyn TradeSink,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let symbol = intent.symbol().to_string();
        if let Some(fill) = self.ledger.execute(intent, sink, timestamp)? {
            if let Some(reason) = fill.exit_reason {
                self.strategy.on_position_closed(&symbol, reason);
            }
        }
        Ok(())
    }

    pub fn build_report(&self, sink: &dyn TradeSink, symbols: Vec<String>) -> ReplayReport {
        let account = sink.account();
        let final_balance = account.final_balance(self.ledger.iter());
        let (wins, losses) = account.wins_losses();
        let fills = account.fills();

        ReplayReport {
            id: Uuid::new_v4().to_string(),
            strategy_id: self.strategy.id().to_string(),
            symbols,
            start: self.first_tick,
            end: self.last_tick,
            initial_balance: account.initial_balance(),
            final_balance,
            total_pnl: final_balance - account.initial_balance(),
            roi_percent: account.roi_percent(self.ledger.iter()),
            total_fills: fills.len(),
            long_positions: fills.iter().filter(|f| f.side == FillSide::BuyLong).count(),
            short_positions: fills
                .iter()
                .filter(|f| f.side == FillSide::SellShort)
                .count(),
            open_positions: self.ledger.len(),
            wins,
            losses,
            pnl_log: account.pnl_log().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotator;
    use crate::models::{Bar, Position};
    use crate::sink::SimulatedSink;
    use chrono::{Duration, TimeZone, Utc};

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn bar(symbol: &str, offset: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(symbol, ts(offset), open, high, low, close, 100.0)
    }

    /// Opens a long on a scripted bar offset, then stays passive so the risk
    /// pass drives every exit.
    #[derive(Debug)]
    struct ScriptedOpen {
        open_at: DateTime<Utc>,
        stop_loss: f64,
        take_profit_above: Option<f64>,
        closed: Vec<(String, ExitReason)>,
    }

    impl ScriptedOpen {
        fn new(open_at: DateTime<Utc>, stop_loss: f64) -> Self {
            Self {
                open_at,
                stop_loss,
                take_profit_above: None,
                closed: Vec::new(),
            }
        }
    }

    impl Strategy for ScriptedOpen {
        fn id(&self) -> &str {
            "scripted_open"
        }

        fn warmup_bars(&self) -> usize {
            0
        }

        fn annotators(&self) -> Vec<Box<dyn Annotator>> {
            Vec::new()
        }

        fn apply(
            &mut self,
            _series: &AssetSeries,
            _index: usize,
            bar: &Bar,
            timestamp: DateTime<Utc>,
            ledger: &PositionLedger,
            available_balance: f64,
        ) -> Vec<TradeIntent> {
            if timestamp == self.open_at && ledger.get(&bar.symbol).is_none() {
                return vec![TradeIntent::Open {
                    symbol: bar.symbol.clone(),
                    side: PositionSide::Long,
                    price: bar.close,
                    notional: available_balance * 0.1,
                    stop_loss: self.stop_loss,
                    metadata: None,
                }];
            }
            Vec::new()
        }

        fn take_profit(
            &self,
            _position: &Position,
            _series: &AssetSeries,
            _index: usize,
            bar: &Bar,
        ) -> Option<f64> {
            self.take_profit_above
                .filter(|&level| bar.close >= level)
                .map(|_| bar.close)
        }

        fn on_position_closed(&mut self, symbol: &str, reason: ExitReason) {
            self.closed.push((symbol.to_string(), reason));
        }
    }

    fn single_series(bars: Vec<Bar>) -> Vec<AssetSeries> {
        vec![AssetSeries::from_bars("SOLUSDC", bars).unwrap()]
    }

    #[test]
    fn position_is_not_closed_on_its_opening_tick() {
        // The opening bar itself trades through the stop; the position must
        // survive the tick and close on the next bar.
        let data = single_series(vec![
            bar("SOLUSDC", 0, 100.0, 101.0, 80.0, 100.0),
            bar("SOLUSDC", 1, 100.0, 101.0, 80.0, 100.0),
        ]);
        let mut engine = ReplayEngine::new(Box::new(ScriptedOpen::new(ts(0), 90.0)));
        let mut sink = SimulatedSink::new(1000.0, 0.0);
        engine.run(&data, &mut sink, false).unwrap();

        let fills = sink.account().fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].timestamp, ts(0));
        assert_eq!(fills[1].timestamp, ts(1));
        assert_eq!(fills[1].exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(fills[1].price, 90.0);
    }

    #[test]
    fn stop_loss_takes_priority_over_take_profit() {
        let data = single_series(vec![
            bar("SOLUSDC", 0, 100.0, 101.0, 99.0, 100.0),
            // Both conditions true on this bar: low breaches the stop and the
            // close satisfies the take-profit hook.
            bar("SOLUSDC", 1, 100.0, 120.0, 85.0, 115.0),
        ]);
        let mut strategy = ScriptedOpen::new(ts(0), 90.0);
        strategy.take_profit_above = Some(110.0);
        let mut engine = ReplayEngine::new(Box::new(strategy));
        let mut sink = SimulatedSink::new(1000.0, 0.0);
        engine.run(&data, &mut sink, false).unwrap();

        let fills = sink.account().fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].exit_reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn position_carries_over_ticks_without_a_bar() {
        let solana = AssetSeries::from_bars(
            "SOLUSDC",
            vec![
                bar("SOLUSDC", 0, 100.0, 101.0, 99.0, 100.0),
                // No SOLUSDC bar at minute 1; stop would trigger at minute 2.
                bar("SOLUSDC", 2, 100.0, 101.0, 85.0, 95.0),
            ],
        )
        .unwrap();
        let shib = AssetSeries::from_bars(
            "SHIBUSDC",
            vec![bar("SHIBUSDC", 1, 10.0, 10.1, 9.9, 10.0)],
        )
        .unwrap();

        let mut engine = ReplayEngine::new(Box::new(ScriptedOpen::new(ts(0), 90.0)));
        let mut sink = SimulatedSink::new(1000.0, 0.0);
        engine
            .run(&[solana, shib], &mut sink, false)
            .unwrap();

        let fills = sink.account().fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].timestamp, ts(2));
    }

    #[test]
    fn replay_is_deterministic() {
        let build_data = || {
            vec![
                AssetSeries::from_bars(
                    "SOLUSDC",
                    (0..50)
                        .map(|i| {
                            let price = 100.0 + (i % 7) as f64 - (i % 3) as f64;
                            bar("SOLUSDC", i, price, price + 2.0, price - 12.0, price)
                        })
                        .collect(),
                )
                .unwrap(),
                AssetSeries::from_bars(
                    "SHIBUSDC",
                    (0..50)
                        .map(|i| {
                            let price = 50.0 + (i % 5) as f64;
                            bar("SHIBUSDC", i, price, price + 1.0, price - 6.0, price)
                        })
                        .collect(),
                )
                .unwrap(),
            ]
        };

        let run_once = || {
            let mut engine = ReplayEngine::new(Box::new(ScriptedOpen::new(ts(3), 92.0)));
            let mut sink = SimulatedSink::new(1000.0, 0.001);
            engine.run(&build_data(), &mut sink, false).unwrap();
            (
                serde_json::to_string(sink.account().fills()).unwrap(),
                sink.account().available_balance(),
            )
        };

        let (fills_a, balance_a) = run_once();
        let (fills_b, balance_b) = run_once();
        assert_eq!(fills_a, fills_b);
        assert_eq!(balance_a, balance_b);
    }

    #[test]
    fn report_counts_one_round_trip() {
        let data = single_series(vec![
            bar("SOLUSDC", 0, 100.0, 101.0, 99.0, 100.0),
            bar("SOLUSDC", 1, 100.0, 101.0, 85.0, 95.0),
        ]);
        let mut engine = ReplayEngine::new(Box::new(ScriptedOpen::new(ts(0), 90.0)));
        let mut sink = SimulatedSink::new(1000.0, 0.0);
        let report = engine.run(&data, &mut sink, false).unwrap();

        assert_eq!(report.total_fills, 2);
        assert_eq!(report.open_positions, 0);
        assert_eq!(report.long_positions, 1);
    }
}
