use crate::error::EngineError;
use crate::models::Bar;
use crate::series::AssetSeries;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

const MARKET_DATA_URL_ENV: &str = "MARKET_DATA_URL";
const DEFAULT_MARKET_DATA_URL: &str = "https://api.binance.com";
const KLINE_PAGE_LIMIT: usize = 1000;
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(20);

/// Bar interval expressed the way kline APIs spell it ("1m", "5m", "1h", ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    spec: String,
    duration: Duration,
}

impl Interval {
    pub fn as_str(&self) -> &str {
        &self.spec
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn minutes(&self) -> i64 {
        self.duration.num_minutes()
    }
}

impl FromStr for Interval {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim().to_lowercase();
        let duration = match spec.as_str() {
            "1m" => Duration::minutes(1),
            "3m" => Duration::minutes(3),
            "5m" => Duration::minutes(5),
            "15m" => Duration::minutes(15),
            "30m" => Duration::minutes(30),
            "1h" => Duration::hours(1),
            "2h" => Duration::hours(2),
            "4h" => Duration::hours(4),
            "1d" => Duration::days(1),
            _ => return Err(EngineError::BadInterval(s.to_string())),
        };
        Ok(Self { spec, duration })
    }
}

/// Market data collaborator. `fetch_last_complete_bar` may omit symbols whose
/// latest candle is not yet published; the live loop treats any omission as
/// "skip this cycle".
pub trait MarketDataFeed {
    fn fetch_historical(
        &self,
        symbols: &[String],
        interval: &Interval,
        days: u32,
    ) -> Result<Vec<AssetSeries>>;

    fn fetch_last_complete_bar(
        &self,
        symbols: &[String],
        interval: &Interval,
    ) -> Result<HashMap<String, Bar>>;
}

/// Kline REST feed (Binance-compatible endpoint shape).
pub struct RestMarketFeed {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl RestMarketFeed {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(MARKET_DATA_URL_ENV)
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MARKET_DATA_URL.to_string());

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build market data HTTP client")?;

        Ok(Self { http, base_url })
    }

    fn fetch_klines(
        &self,
        symbol: &str,
        interval: &Interval,
        start_ms: i64,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.as_str().to_string()),
                ("startTime", start_ms.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .with_context(|| format!("kline request for {} failed", symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "kline request for {} returned HTTP {}",
                symbol,
                response.status()
            ));
        }

        let rows: Vec<Value> = response
            .json()
            .with_context(|| format!("invalid kline payload for {}", symbol))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_kline_row(symbol, &row) {
                Some(bar) => bars.push(bar),
                None => warn!("Skipping malformed kline row for {}: {}", symbol, row),
            }
        }
        Ok(bars)
    }
}

impl MarketDataFeed for RestMarketFeed {
    fn fetch_historical(
        &self,
        symbols: &[String],
        interval: &Interval,
        days: u32,
    ) -> Result<Vec<AssetSeries>> {
        let start = Utc::now() - Duration::days(days as i64);
        let mut series = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let mut bars: Vec<Bar> = Vec::new();
            let mut cursor_ms = start.timestamp_millis();

            loop {
                let page = self.fetch_klines(symbol, interval, cursor_ms, KLINE_PAGE_LIMIT)?;
                let page_len = page.len();
                let Some(last) = page.last() else {
                    break;
                };
                let next_cursor = (last.timestamp + interval.duration()).timestamp_millis();
                bars.extend(page);
                if page_len < KLINE_PAGE_LIMIT || next_cursor <= cursor_ms {
                    break;
                }
                if next_cursor >= Utc::now().timestamp_millis() {
                    break;
                }
                cursor_ms = next_cursor;
            }

            // The newest row is usually the still-forming candle; drop it so
            // history only contains complete bars.
            if let Some(last) = bars.last() {
                if last.timestamp + interval.duration() > Utc::now() {
                    bars.pop();
                }
            }

            series.push(AssetSeries::from_bars(symbol.clone(), bars)?);
        }

        Ok(series)
    }

    fn fetch_last_complete_bar(
        &self,
        symbols: &[String],
        interval: &Interval,
    ) -> Result<HashMap<String, Bar>> {
        let now = Utc::now();
        let start = now - interval.duration() * 3;
        let mut latest = HashMap::new();

        for symbol in symbols {
            let bars =
                self.fetch_klines(symbol, interval, start.timestamp_millis(), 3)?;
            // Last complete candle: the newest one whose interval has elapsed.
            let complete = bars
                .into_iter()
                .filter(|bar| bar.timestamp + interval.duration() <= now)
                .last();
            match complete {
                Some(bar) => {
                    latest.insert(symbol.clone(), bar);
                }
                None => warn!("No complete candle available yet for {}", symbol),
            }
        }

        Ok(latest)
    }
}

fn parse_kline_row(symbol: &str, row: &Value) -> Option<Bar> {
    let fields = row.as_array()?;
    let open_ms = fields.first()?.as_i64()?;
    let timestamp = Utc.timestamp_millis_opt(open_ms).single()?;

    let price = |index: usize| -> Option<f64> {
        let field = fields.get(index)?;
        match field {
            Value::String(text) => text.parse::<f64>().ok(),
            other => other.as_f64(),
        }
    };

    Some(Bar::new(
        symbol,
        timestamp,
        price(1)?,
        price(2)?,
        price(3)?,
        price(4)?,
        price(5)?,
    ))
}
