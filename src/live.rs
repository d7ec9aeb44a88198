use crate::annotate::Annotator;
use crate::continuity::SymbolWindow;
use crate::engine::ReplayEngine;
use crate::feed::{Interval, MarketDataFeed};
use crate::series::AssetSeries;
use crate::sink::{SimulatedSink, TradeSink};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration as StdDuration;

/// Single-threaded cooperative polling loop. Each cycle sleeps to the next
/// interval boundary, waits a short settle delay for upstream data to publish,
/// then performs one synchronous poll-repair-evaluate-act pass. Cycles never
/// overlap.
pub struct LiveTrader {
    engine: ReplayEngine,
    feed: Box<dyn MarketDataFeed>,
    annotators: Vec<Box<dyn Annotator>>,
    windows: BTreeMap<String, SymbolWindow>,
    symbols: Vec<String>,
    interval: Interval,
    settle: StdDuration,
}

impl LiveTrader {
    /// Fetches history, warms the strategy by replaying it through a
    /// simulation sink (identical logic, no orders placed) and seeds the
    /// per-symbol rolling windows.
    #[allow(clippy::too_many_arguments)]
    pub fn bootstrap(
        mut engine: ReplayEngine,
        feed: Box<dyn MarketDataFeed>,
        mut symbols: Vec<String>,
        interval: Interval,
        history_days: u32,
        window_len: usize,
        settle: StdDuration,
        warmup_balance: f64,
        warmup_fee_rate: f64,
    ) -> Result<Self> {
        symbols.sort();
        symbols.dedup();

        let annotators = engine.strategy().annotators();

        info!(
            "Fetching {} day(s) of {} history for {} symbol(s)",
            history_days,
            interval.as_str(),
            symbols.len()
        );
        let mut history = feed.fetch_historical(&symbols, &interval, history_days)?;
        for series in &mut history {
            for annotator in &annotators {
                annotator.annotate(series);
            }
        }

        let mut warmup_sink = SimulatedSink::new(warmup_balance, warmup_fee_rate);
        let report = engine.run(&history, &mut warmup_sink, true)?;
        info!(
            "Warmup replay done: {} fills, simulated ROI {:.2}%",
            report.total_fills, report.roi_percent
        );

        let abandoned = engine.take_open_positions();
        if !abandoned.is_empty() {
            warn!(
                "Discarding {} simulated position(s) left open by warmup; live starts flat",
                abandoned.len()
            );
        }

        let mut windows = BTreeMap::new();
        for series in &history {
            let mut window =
                SymbolWindow::new(series.symbol(), interval.duration(), window_len);
            window.seed(series.bars().iter().cloned());
            windows.insert(series.symbol().to_string(), window);
        }

        Ok(Self {
            engine,
            feed,
            annotators,
            windows,
            symbols,
            interval,
            settle,
        })
    }

    /// Blocks forever, running one cycle per interval boundary.
    pub fn run(&mut self, sink: &mut dyn TradeSink) -> Result<()> {
        info!(
            "Entering live loop: {} at {} interval",
            self.symbols.join(", "),
            self.interval.as_str()
        );
        loop {
            self.wait_for_boundary();
            thread::sleep(self.settle);
            self.step(sink)?;
        }
    }

    fn wait_for_boundary(&self) {
        let interval_secs = self.interval.duration().num_seconds().max(1);
        let now = Utc::now().timestamp();
        let next = (now / interval_secs + 1) * interval_secs;
        thread::sleep(StdDuration::from_secs((next - now).max(1) as u64));
    }

    /// One poll-repair-evaluate cycle. Returns whether evaluation ran: a cycle
    /// without a fresh bar for every symbol skips evaluation entirely rather
    /// than proceeding on partial data.
    pub fn step(&mut self, sink: &mut dyn TradeSink) -> Result<bool> {
        let latest = self
            .feed
            .fetch_last_complete_bar(&self.symbols, &self.interval)?;

        let mut stale: Vec<&str> = Vec::new();
        for symbol in &self.symbols {
            let fresh = match (latest.get(symbol), self.windows.get(symbol)) {
                (Some(bar), Some(window)) => window
                    .last_timestamp()
                    .map(|last| bar.timestamp > last)
                    .unwrap_or(true),
                _ => false,
            };
            if !fresh {
                stale.push(symbol);
            }
        }
        if !stale.is_empty() {
            warn!(
                "Skipping cycle: no fresh bar for {} (feed lag?)",
                stale.join(", ")
            );
            return Ok(false);
        }

        let mut snapshots: Vec<AssetSeries> = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let (Some(bar), Some(window)) = (latest.get(symbol), self.windows.get_mut(symbol))
            else {
                continue;
            };

            let update = window.integrate(bar.clone());
            if update.fillers > 0 {
                warn!(
                    "Gap for {}: synthesized {} filler bar(s) before {}",
                    symbol, update.fillers, bar.timestamp
                );
            }
            if !update.duplicates.is_empty() {
                warn!(
                    "Duplicate timestamps in {} window: {:?}",
                    symbol, update.duplicates
                );
            }

            let mut series = window.to_series();
            for annotator in &self.annotators {
                annotator.annotate(&mut series);
            }
            snapshots.push(series);
        }

        let timestamps: BTreeSet<DateTime<Utc>> =
            latest.values().map(|bar| bar.timestamp).collect();
        for timestamp in timestamps {
            let mut present: Vec<(&AssetSeries, usize)> = Vec::new();
            for series in &snapshots {
                let index = if series.last().map(|bar| bar.timestamp) == Some(timestamp) {
                    Some(series.len() - 1)
                } else {
                    series.index_of(timestamp)
                };
                if let Some(index) = index {
                    present.push((series, index));
                }
            }
            self.engine.evaluate_tick(&present, timestamp, sink)?;
        }

        Ok(true)
    }

    pub fn engine(&self) -> &ReplayEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionLedger;
    use crate::models::{Bar, PositionSide, TradeIntent};
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn bar(symbol: &str, offset: i64, close: f64) -> Bar {
        Bar::new(symbol, ts(offset), close, close + 1.0, close - 1.0, close, 5.0)
    }

    /// Feed stub: fixed history, scripted poll responses consumed in order.
    struct StubFeed {
        history: Vec<(String, Vec<Bar>)>,
        polls: RefCell<Vec<HashMap<String, Bar>>>,
    }

    impl MarketDataFeed for StubFeed {
        fn fetch_historical(
            &self,
            _symbols: &[String],
            _interval: &Interval,
            _days: u32,
        ) -> Result<Vec<AssetSeries>> {
            self.history
                .iter()
                .map(|(symbol, bars)| {
                    AssetSeries::from_bars(symbol.clone(), bars.clone()).map_err(Into::into)
                })
                .collect()
        }

        fn fetch_last_complete_bar(
            &self,
            _symbols: &[String],
            _interval: &Interval,
        ) -> Result<HashMap<String, Bar>> {
            let mut polls = self.polls.borrow_mut();
            if polls.is_empty() {
                Ok(HashMap::new())
            } else {
                Ok(polls.remove(0))
            }
        }
    }

    /// Buys every symbol on its first evaluated live tick.
    #[derive(Debug)]
    struct AlwaysOpen;

    impl Strategy for AlwaysOpen {
        fn id(&self) -> &str {
            "always_open"
        }

        fn warmup_bars(&self) -> usize {
            0
        }

        fn annotators(&self) -> Vec<Box<dyn crate::annotate::Annotator>> {
            Vec::new()
        }

        fn apply(
            &mut self,
            _series: &AssetSeries,
            _index: usize,
            bar: &Bar,
            _timestamp: DateTime<Utc>,
            ledger: &PositionLedger,
            available_balance: f64,
        ) -> Vec<TradeIntent> {
            if ledger.get(&bar.symbol).is_some() || available_balance < 10.0 {
                return Vec::new();
            }
            vec![TradeIntent::Open {
                symbol: bar.symbol.clone(),
                side: PositionSide::Long,
                price: bar.close,
                notional: available_balance * 0.1,
                stop_loss: bar.close * 0.9,
                metadata: None,
            }]
        }
    }

    fn trader_with_polls(polls: Vec<HashMap<String, Bar>>) -> LiveTrader {
        let feed = StubFeed {
            history: vec![
                ("SOLUSDC".to_string(), vec![bar("SOLUSDC", 0, 100.0)]),
                ("SHIBUSDC".to_string(), vec![bar("SHIBUSDC", 0, 10.0)]),
            ],
            polls: RefCell::new(polls),
        };
        LiveTrader::bootstrap(
            ReplayEngine::new(Box::new(AlwaysOpen)),
            Box::new(feed),
            vec!["SOLUSDC".to_string(), "SHIBUSDC".to_string()],
            Interval::from_str("1m").unwrap(),
            1,
            100,
            StdDuration::from_millis(0),
            1000.0,
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn cycle_skips_when_any_symbol_is_missing() {
        let mut poll = HashMap::new();
        poll.insert("SOLUSDC".to_string(), bar("SOLUSDC", 1, 101.0));
        let mut trader = trader_with_polls(vec![poll]);

        let mut sink = SimulatedSink::new(1000.0, 0.0);
        let evaluated = trader.step(&mut sink).unwrap();
        assert!(!evaluated);
        assert!(sink.account().fills().is_empty());
    }

    #[test]
    fn complete_poll_evaluates_and_trades() {
        let mut poll = HashMap::new();
        poll.insert("SOLUSDC".to_string(), bar("SOLUSDC", 1, 101.0));
        poll.insert("SHIBUSDC".to_string(), bar("SHIBUSDC", 1, 10.1));
        let mut trader = trader_with_polls(vec![poll]);

        let mut sink = SimulatedSink::new(1000.0, 0.0);
        let evaluated = trader.step(&mut sink).unwrap();
        assert!(evaluated);
        // The warmup already opened both symbols in simulation; live starts
        // flat, so the first live tick opens both again.
        assert_eq!(trader.engine().ledger().len(), 2);
        assert_eq!(sink.account().fills().len(), 2);
    }

    #[test]
    fn gap_in_poll_is_repaired_before_evaluation() {
        let mut poll = HashMap::new();
        poll.insert("SOLUSDC".to_string(), bar("SOLUSDC", 5, 101.0));
        poll.insert("SHIBUSDC".to_string(), bar("SHIBUSDC", 5, 10.1));
        let mut trader = trader_with_polls(vec![poll]);

        let mut sink = SimulatedSink::new(1000.0, 0.0);
        trader.step(&mut sink).unwrap();

        let window = trader.windows.get("SOLUSDC").unwrap();
        // Seed bar + 4 fillers + the polled bar.
        assert_eq!(window.len(), 6);
        assert_eq!(window.last_timestamp(), Some(ts(5)));
    }

    #[test]
    fn stale_poll_does_not_reevaluate() {
        let mut poll = HashMap::new();
        poll.insert("SOLUSDC".to_string(), bar("SOLUSDC", 0, 100.0));
        poll.insert("SHIBUSDC".to_string(), bar("SHIBUSDC", 0, 10.0));
        let mut trader = trader_with_polls(vec![poll]);

        let mut sink = SimulatedSink::new(1000.0, 0.0);
        let evaluated = trader.step(&mut sink).unwrap();
        assert!(!evaluated);
    }
}
