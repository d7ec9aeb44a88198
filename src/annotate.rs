use crate::series::AssetSeries;

/// Collaborator boundary for indicator computation: a pure per-series column
/// writer. The engine never computes a column itself; strategies declare the
/// annotators they need and the caller runs them over each series before
/// evaluation (and again over every repaired live window).
pub trait Annotator {
    fn annotate(&self, series: &mut AssetSeries);
}

/// Mean of open/high/low/close, used as a smoothed price for stop placement.
pub struct MeanPriceAnnotator {
    key: String,
}

impl MeanPriceAnnotator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Annotator for MeanPriceAnnotator {
    fn annotate(&self, series: &mut AssetSeries) {
        for bar in series.bars_mut() {
            let mean = (bar.open + bar.high + bar.low + bar.close) / 4.0;
            bar.set_column(self.key.clone(), mean);
        }
    }
}

/// Wilder-smoothed RSI over closes sampled every `stride` bars, forward-filled
/// onto every bar. With stride 1 this is a plain per-bar RSI; with stride 240
/// on one-minute bars it reproduces a four-hour RSI.
pub struct RsiAnnotator {
    period: usize,
    stride: usize,
    key: String,
}

impl RsiAnnotator {
    pub fn new(period: usize, stride: usize, key: impl Into<String>) -> Self {
        Self {
            period,
            stride: stride.max(1),
            key: key.into(),
        }
    }
}

impl Annotator for RsiAnnotator {
    fn annotate(&self, series: &mut AssetSeries) {
        let sampled: Vec<f64> = series
            .bars()
            .iter()
            .enumerate()
            .filter(|(i, _)| (i + 1) % self.stride == 0)
            .map(|(_, bar)| bar.close)
            .collect();
        let rsi = calculate_rsi(&sampled, self.period);

        for (i, bar) in series.bars_mut().iter_mut().enumerate() {
            let completed = (i + 1) / self.stride;
            let value = if completed == 0 {
                50.0
            } else {
                rsi[completed - 1]
            };
            bar.set_column(self.key.clone(), value);
        }
    }
}

/// Heikin-Ashi close of candles resampled every `stride` bars, forward-filled.
/// Bars before the first completed resample carry no column.
pub struct HeikinAshiAnnotator {
    stride: usize,
    key: String,
}

impl HeikinAshiAnnotator {
    pub fn new(stride: usize, key: impl Into<String>) -> Self {
        Self {
            stride: stride.max(1),
            key: key.into(),
        }
    }
}

impl Annotator for HeikinAshiAnnotator {
    fn annotate(&self, series: &mut AssetSeries) {
        let mut ha_closes = Vec::new();
        let bars = series.bars();
        let mut chunk_start = 0;
        while chunk_start + self.stride <= bars.len() {
            let chunk = &bars[chunk_start..chunk_start + self.stride];
            let open = chunk[0].open;
            let close = chunk[chunk.len() - 1].close;
            let high = chunk.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let low = chunk.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            ha_closes.push((open + high + low + close) / 4.0);
            chunk_start += self.stride;
        }

        for (i, bar) in series.bars_mut().iter_mut().enumerate() {
            let completed = (i + 1) / self.stride;
            if completed > 0 {
                bar.set_column(self.key.clone(), ha_closes[completed - 1]);
            }
        }
    }
}

/// Detects oversold dips followed by a staged RSI recovery and marks the bar
/// where the recovery qualifies with the smoothed price at that bar. The
/// `rsi_rebound` strategy opens on the presence of the output column.
pub struct RsiReboundAnnotator {
    rsi_key: String,
    slow_rsi_key: Option<String>,
    slow_max: f64,
    price_key: String,
    out_key: String,
    oversold: f64,
    step: usize,
    delta: f64,
}

impl RsiReboundAnnotator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rsi_key: impl Into<String>,
        slow_rsi_key: Option<String>,
        slow_max: f64,
        price_key: impl Into<String>,
        out_key: impl Into<String>,
        oversold: f64,
        step: usize,
        delta: f64,
    ) -> Self {
        Self {
            rsi_key: rsi_key.into(),
            slow_rsi_key,
            slow_max,
            price_key: price_key.into(),
            out_key: out_key.into(),
            oversold,
            step: step.max(1),
            delta,
        }
    }
}

impl Annotator for RsiReboundAnnotator {
    fn annotate(&self, series: &mut AssetSeries) {
        let bars = series.bars();
        let rsi: Vec<Option<f64>> = bars.iter().map(|b| b.column(&self.rsi_key)).collect();

        let mut marks: Vec<Option<f64>> = vec![None; bars.len()];
        for i in 1..bars.len() {
            let (Some(current), Some(previous)) = (rsi[i], rsi[i - 1]) else {
                continue;
            };
            if current >= self.oversold || previous < self.oversold {
                continue;
            }
            if let Some(slow_key) = &self.slow_rsi_key {
                match bars[i].column(slow_key) {
                    Some(slow) if slow < self.slow_max => {}
                    _ => continue,
                }
            }

            // Walk forward in steps until the RSI rises by `delta` over the
            // previous step's reading, then mark the recovery bar.
            let mut reference = current;
            let mut j = i + self.step;
            while j < bars.len() {
                let Some(value) = rsi[j] else {
                    break;
                };
                if value >= reference + self.delta {
                    marks[j] = bars[j].column(&self.price_key);
                    break;
                }
                reference = value;
                j += self.step;
            }
        }

        for (bar, mark) in series.bars_mut().iter_mut().zip(marks) {
            if let Some(price) = mark {
                bar.set_column(self.out_key.clone(), price);
            }
        }
    }
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 || prices.len() < period + 1 {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}
