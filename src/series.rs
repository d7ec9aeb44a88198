use crate::error::EngineError;
use crate::models::Bar;

/// Ordered-by-timestamp sequence of bars for one symbol. Construction through
/// `from_bars` guarantees strictly increasing timestamps; a violation in input
/// data aborts the run.
#[derive(Debug, Clone)]
pub struct AssetSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl AssetSeries {
    pub fn from_bars(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, EngineError> {
        let symbol = symbol.into();
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(EngineError::NonChronological {
                    symbol,
                    timestamp: pair[1].timestamp,
                });
            }
        }
        Ok(Self { symbol, bars })
    }

    /// Wraps bars without the chronology check. Used for live rolling windows,
    /// where duplicate timestamps are a logged anomaly that must not stop the
    /// cycle; historical inputs always go through `from_bars`.
    pub fn assume_ordered(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Mutable access for indicator annotators. A slice, so the ordering
    /// established at construction cannot be disturbed.
    pub fn bars_mut(&mut self) -> &mut [Bar] {
        &mut self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn index_of(&self, timestamp: chrono::DateTime<chrono::Utc>) -> Option<usize> {
        self.bars
            .binary_search_by(|bar| bar.timestamp.cmp(&timestamp))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(offset_minutes: i64, close: f64) -> Bar {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Bar::new(
            "SOLUSDC",
            base + Duration::minutes(offset_minutes),
            close,
            close + 1.0,
            close - 1.0,
            close,
            100.0,
        )
    }

    #[test]
    fn from_bars_accepts_strictly_increasing_timestamps() {
        let series = AssetSeries::from_bars("SOLUSDC", vec![bar(0, 10.0), bar(1, 11.0)]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.index_of(series.bars()[1].timestamp), Some(1));
    }

    #[test]
    fn from_bars_rejects_duplicate_timestamps() {
        let result = AssetSeries::from_bars("SOLUSDC", vec![bar(0, 10.0), bar(0, 11.0)]);
        assert!(matches!(
            result,
            Err(EngineError::NonChronological { .. })
        ));
    }

    #[test]
    fn from_bars_rejects_backwards_timestamps() {
        let result = AssetSeries::from_bars("SOLUSDC", vec![bar(5, 10.0), bar(3, 11.0)]);
        assert!(result.is_err());
    }
}
