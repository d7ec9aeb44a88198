use crate::accounting::AccountState;
use crate::ledger::PositionLedger;
use crate::models::{ExitReason, Fill, FillSide, OpenExecution, Position, PositionSide};
use crate::sink::TradeSink;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;
use uuid::Uuid;

const EXCHANGE_URL_ENV: &str = "EXCHANGE_API_URL";
const EXCHANGE_KEY_ENV: &str = "EXCHANGE_API_KEY";
const EXCHANGE_SECRET_ENV: &str = "EXCHANGE_API_SECRET";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Gateway order acknowledgement. Only `closed`/`filled` with a positive
/// filled quantity counts as a confirmed immediate fill.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderReceipt {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub filled_qty: f64,
}

impl OrderReceipt {
    pub fn is_filled(&self) -> bool {
        matches!(self.status.trim().to_lowercase().as_str(), "closed" | "filled")
            && self.filled_qty > 0.0
    }
}

/// External order-execution collaborator, live mode only.
pub trait ExecutionGateway {
    /// Opens exposure: `base_amount` is in the base asset.
    fn place_order(
        &self,
        symbol: &str,
        side: FillSide,
        base_amount: f64,
        price: Option<f64>,
    ) -> Result<OrderReceipt>;

    /// Reduce-only order closing existing exposure.
    fn close_order(
        &self,
        symbol: &str,
        side: FillSide,
        base_amount: f64,
        price: Option<f64>,
    ) -> Result<OrderReceipt>;

    fn last_price(&self, symbol: &str) -> Result<f64>;

    fn available_balance(&self) -> Result<f64>;
}

fn order_direction(side: FillSide) -> &'static str {
    match side {
        FillSide::BuyLong | FillSide::BuyShort => "buy",
        FillSide::SellShort | FillSide::SellLong => "sell",
    }
}

/// Quote amount to base-asset size at the given price, rounded the way the
/// venue accepts it.
fn quote_to_base(quote_amount: f64, price: f64) -> f64 {
    let amount = quote_amount / price;
    (amount * 1e6).round() / 1e6
}

/// REST execution gateway authenticated with API-key headers.
pub struct RestExecutionGateway {
    http: reqwest::blocking::Client,
    base_url: String,
    headers: HeaderMap,
}

impl RestExecutionGateway {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(EXCHANGE_URL_ENV)
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("{} must be set for live trading", EXCHANGE_URL_ENV))?;
        let api_key =
            env::var(EXCHANGE_KEY_ENV).with_context(|| format!("{} must be set", EXCHANGE_KEY_ENV))?;
        let api_secret = env::var(EXCHANGE_SECRET_ENV)
            .with_context(|| format!("{} must be set", EXCHANGE_SECRET_ENV))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-API-KEY",
            HeaderValue::from_str(api_key.trim()).context("invalid exchange API key")?,
        );
        headers.insert(
            "X-API-SECRET",
            HeaderValue::from_str(api_secret.trim()).context("invalid exchange API secret")?,
        );

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build exchange HTTP client")?;

        Ok(Self {
            http,
            base_url,
            headers,
        })
    }

    fn submit(&self, symbol: &str, side: FillSide, base_amount: f64, price: Option<f64>, reduce_only: bool) -> Result<OrderReceipt> {
        let body = json!({
            "clientOrderId": Uuid::new_v4().to_string(),
            "symbol": symbol,
            "side": order_direction(side),
            "type": if price.is_some() { "limit" } else { "market" },
            "amount": base_amount,
            "price": price,
            "reduceOnly": reduce_only,
        });

        let url = format!("{}/orders", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .with_context(|| format!("order submission for {} failed", symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "order for {} rejected with HTTP {}",
                symbol,
                response.status()
            ));
        }

        let receipt: OrderReceipt = response
            .json()
            .with_context(|| format!("invalid order response for {}", symbol))?;
        info!(
            "Order {} on {}: {} (filled {})",
            receipt.id, symbol, receipt.status, receipt.filled_qty
        );
        Ok(receipt)
    }
}

impl ExecutionGateway for RestExecutionGateway {
    fn place_order(
        &self,
        symbol: &str,
        side: FillSide,
        base_amount: f64,
        price: Option<f64>,
    ) -> Result<OrderReceipt> {
        self.submit(symbol, side, base_amount, price, false)
    }

    fn close_order(
        &self,
        symbol: &str,
        side: FillSide,
        base_amount: f64,
        price: Option<f64>,
    ) -> Result<OrderReceipt> {
        self.submit(symbol, side, base_amount, price, true)
    }

    fn last_price(&self, symbol: &str) -> Result<f64> {
        #[derive(Deserialize)]
        struct Ticker {
            last: f64,
        }

        let url = format!("{}/ticker", self.base_url);
        let ticker: Ticker = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(&[("symbol", symbol)])
            .send()
            .with_context(|| format!("ticker request for {} failed", symbol))?
            .json()
            .with_context(|| format!("invalid ticker payload for {}", symbol))?;
        Ok(ticker.last)
    }

    fn available_balance(&self) -> Result<f64> {
        #[derive(Deserialize)]
        struct Balance {
            free: f64,
        }

        let url = format!("{}/balance", self.base_url);
        let balance: Balance = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .context("balance request failed")?
            .json()
            .context("invalid balance payload")?;
        Ok(balance.free)
    }
}

/// Live trade sink: routes intents through the gateway and mirrors only
/// confirmed fills into local accounting, so local bookkeeping never diverges
/// from confirmed external state.
pub struct GatewaySink {
    gateway: Box<dyn ExecutionGateway>,
    account: AccountState,
}

impl GatewaySink {
    pub fn new(gateway: Box<dyn ExecutionGateway>, initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            gateway,
            account: AccountState::new(initial_balance, fee_rate),
        }
    }
}

impl TradeSink for GatewaySink {
    fn open(
        &mut self,
        symbol: &str,
        side: PositionSide,
        notional: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<OpenExecution>> {
        let base_amount = quote_to_base(notional, price);
        let receipt =
            match self
                .gateway
                .place_order(symbol, side.entry_fill_side(), base_amount, None)
            {
                Ok(receipt) => receipt,
                Err(error) => {
                    warn!("OPEN order for {} failed: {}", symbol, error);
                    return Ok(None);
                }
            };
        if !receipt.is_filled() {
            warn!(
                "OPEN order {} for {} not immediately filled (status {})",
                receipt.id, symbol, receipt.status
            );
            return Ok(None);
        }

        Ok(Some(
            self.account.apply_open(symbol, side, notional, price, timestamp),
        ))
    }

    fn close(
        &mut self,
        position: &Position,
        exit_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
        remaining: &PositionLedger,
    ) -> Result<Option<Fill>> {
        let base_amount = quote_to_base(position.net_notional, exit_price);
        let receipt = match self.gateway.close_order(
            &position.symbol,
            position.side.required_exit_side(),
            base_amount,
            None,
        ) {
            Ok(receipt) => receipt,
            Err(error) => {
                warn!("CLOSE order for {} failed: {}", position.symbol, error);
                return Ok(None);
            }
        };
        if !receipt.is_filled() {
            warn!(
                "CLOSE order {} for {} not immediately filled (status {})",
                receipt.id, position.symbol, receipt.status
            );
            return Ok(None);
        }

        Ok(Some(self.account.apply_close(
            position,
            exit_price,
            reason,
            timestamp,
            remaining.iter(),
        )))
    }

    fn mark_price(&mut self, symbol: &str, price: f64) {
        self.account.record_mark(symbol, price);
    }

    fn available_balance(&self) -> f64 {
        match self.gateway.available_balance() {
            Ok(balance) => balance,
            Err(error) => {
                warn!(
                    "Gateway balance unavailable ({}); using local accounting value",
                    error
                );
                self.account.available_balance()
            }
        }
    }

    fn account(&self) -> &AccountState {
        &self.account
    }
}
