use crate::models::Bar;
use crate::series::AssetSeries;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// What one window integration did: how many flat fillers were synthesized
/// and which timestamps now appear more than once. Both are anomalies the
/// caller logs; duplicates are never silently removed here.
#[derive(Debug, Clone, Default)]
pub struct WindowUpdate {
    pub fillers: usize,
    pub duplicates: Vec<DateTime<Utc>>,
}

/// Fixed-length rolling window of bars for one symbol in live mode. Before a
/// freshly polled bar is appended, any missing intervals since the last known
/// bar are filled with flat candles so indicator recomputation always sees a
/// gap-free time index.
#[derive(Debug)]
pub struct SymbolWindow {
    symbol: String,
    interval: Duration,
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl SymbolWindow {
    pub fn new(symbol: impl Into<String>, interval: Duration, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            capacity: capacity.max(1),
            bars: VecDeque::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.back().map(|bar| bar.timestamp)
    }

    /// Seeds the window from history, keeping only the newest `capacity` bars.
    pub fn seed(&mut self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.bars.push_back(bar);
        }
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
    }

    /// Appends a polled bar, synthesizing one flat filler per missing interval
    /// first, then slides the window back to its fixed length.
    pub fn integrate(&mut self, bar: Bar) -> WindowUpdate {
        let mut update = WindowUpdate::default();

        if let Some(last) = self.bars.back() {
            let last_close = last.close;
            let mut expected = last.timestamp + self.interval;
            while expected < bar.timestamp {
                self.bars
                    .push_back(Bar::flat_filler(self.symbol.clone(), expected, last_close));
                update.fillers += 1;
                expected += self.interval;
            }
        }

        self.bars.push_back(bar);
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }

        let mut seen: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
        for bar in &self.bars {
            *seen.entry(bar.timestamp).or_insert(0) += 1;
        }
        update.duplicates = seen
            .into_iter()
            .filter(|&(_, count)| count > 1)
            .map(|(timestamp, _)| timestamp)
            .collect();

        update
    }

    /// Snapshot of the window as a series for annotation and evaluation. Uses
    /// the unchecked constructor: a window containing a duplicate timestamp is
    /// already reported through `integrate` and must still be processable.
    pub fn to_series(&self) -> AssetSeries {
        AssetSeries::assume_ordered(self.symbol.clone(), self.bars.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes)
    }

    fn bar(offset: i64, close: f64) -> Bar {
        Bar::new("SOLUSDC", ts(offset), close, close + 1.0, close - 1.0, close, 5.0)
    }

    fn window(capacity: usize) -> SymbolWindow {
        SymbolWindow::new("SOLUSDC", Duration::minutes(1), capacity)
    }

    #[test]
    fn gap_of_five_intervals_produces_four_fillers() {
        let mut window = window(100);
        window.seed([bar(0, 100.0)]);

        let update = window.integrate(bar(5, 103.0));
        assert_eq!(update.fillers, 4);
        assert!(update.duplicates.is_empty());
        assert_eq!(window.len(), 6);

        let series = window.to_series();
        for (i, filler) in series.bars()[1..5].iter().enumerate() {
            assert_eq!(filler.timestamp, ts(1 + i as i64));
            assert_eq!(filler.open, 100.0);
            assert_eq!(filler.high, 100.0);
            assert_eq!(filler.low, 100.0);
            assert_eq!(filler.close, 100.0);
            assert_eq!(filler.volume, 0.0);
        }
        assert_eq!(series.bars()[5].close, 103.0);
    }

    #[test]
    fn consecutive_bar_needs_no_filler() {
        let mut window = window(100);
        window.seed([bar(0, 100.0)]);
        let update = window.integrate(bar(1, 101.0));
        assert_eq!(update.fillers, 0);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn window_slides_at_fixed_capacity() {
        let mut window = window(3);
        window.seed([bar(0, 100.0), bar(1, 101.0), bar(2, 102.0)]);

        window.integrate(bar(3, 103.0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.to_series().bars()[0].timestamp, ts(1));

        // A gap-filled integration still lands on the fixed length.
        window.integrate(bar(7, 104.0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.last_timestamp(), Some(ts(7)));
    }

    #[test]
    fn duplicate_timestamp_is_reported_not_removed() {
        let mut window = window(100);
        window.seed([bar(0, 100.0), bar(1, 101.0)]);

        let update = window.integrate(bar(1, 99.0));
        assert_eq!(update.duplicates, vec![ts(1)]);
        // Both bars stay in the window.
        assert_eq!(window.len(), 3);
    }
}
