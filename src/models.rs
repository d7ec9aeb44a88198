use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One OHLCV sample for one asset at one timestamp. `columns` carries named
/// values attached by indicator annotators; the engine only ever reads them
/// back by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub columns: HashMap<String, f64>,
}

impl Bar {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            columns: HashMap::new(),
        }
    }

    /// Flat synthetic candle used by continuity repair: every price equals the
    /// last known close, volume zero, no indicator columns.
    pub fn flat_filler(symbol: impl Into<String>, timestamp: DateTime<Utc>, close: f64) -> Self {
        Self::new(symbol, timestamp, close, close, close, close, 0.0)
    }

    pub fn column(&self, key: &str) -> Option<f64> {
        self.columns.get(key).copied().filter(|v| v.is_finite())
    }

    pub fn set_column(&mut self, key: impl Into<String>, value: f64) {
        self.columns.insert(key.into(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Fill side recorded when a position on this side is opened.
    pub fn entry_fill_side(&self) -> FillSide {
        match self {
            PositionSide::Long => FillSide::BuyLong,
            PositionSide::Short => FillSide::SellShort,
        }
    }

    /// The only fill side that may close a position on this side; any other
    /// pairing is a fatal data error.
    pub fn required_exit_side(&self) -> FillSide {
        match self {
            PositionSide::Long => FillSide::SellLong,
            PositionSide::Short => FillSide::BuyShort,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSide {
    BuyLong,
    SellShort,
    SellLong,
    BuyShort,
}

impl FillSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillSide::BuyLong => "BUY_LONG",
            FillSide::SellShort => "SELL_SHORT",
            FillSide::SellLong => "SELL_LONG",
            FillSide::BuyShort => "BUY_SHORT",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, FillSide::BuyLong | FillSide::SellShort)
    }
}

impl fmt::Display for FillSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Reversal,
    Signal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::Reversal => "REVERSAL",
            ExitReason::Signal => "SIGNAL",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position, owned exclusively by the ledger for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    /// Quote-currency size committed at entry, before fees.
    pub notional: f64,
    /// Working capital after the entry fee; basis for PnL computation.
    pub net_notional: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Transient instruction emitted by a strategy, consumed immediately by the
/// ledger. Closing references the target position by symbol; strategies never
/// mutate positions directly.
#[derive(Debug, Clone)]
pub enum TradeIntent {
    Open {
        symbol: String,
        side: PositionSide,
        price: f64,
        notional: f64,
        stop_loss: f64,
        metadata: Option<serde_json::Value>,
    },
    Close {
        symbol: String,
        exit_side: FillSide,
        exit_price: f64,
        reason: ExitReason,
    },
}

impl TradeIntent {
    pub fn symbol(&self) -> &str {
        match self {
            TradeIntent::Open { symbol, .. } => symbol,
            TradeIntent::Close { symbol, .. } => symbol,
        }
    }
}

/// Append-only record of a confirmed trade effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: FillSide,
    pub price: f64,
    pub notional: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
}

/// Result of a confirmed OPEN through a trade sink: the fill plus the working
/// capital the new position carries after the entry fee.
#[derive(Debug, Clone)]
pub struct OpenExecution {
    pub fill: Fill,
    pub net_notional: f64,
}

/// Summary of one finished replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub id: String,
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_pnl: f64,
    pub roi_percent: f64,
    pub total_fills: usize,
    pub long_positions: usize,
    pub short_positions: usize,
    pub open_positions: usize,
    pub wins: usize,
    pub losses: usize,
    pub pnl_log: Vec<(DateTime<Utc>, f64)>,
}
