use crate::accounting::AccountState;
use crate::ledger::PositionLedger;
use crate::models::{ExitReason, Fill, OpenExecution, Position, PositionSide};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Turns an accepted trade intent into an effect. The simulation variant is
/// pure bookkeeping; the live variant first routes an order through an
/// execution gateway and only touches local state once the gateway confirms
/// an immediate fill. `Ok(None)` means "not filled, local state untouched" and
/// is an ordinary per-tick outcome, not an error.
pub trait TradeSink {
    fn open(
        &mut self,
        symbol: &str,
        side: PositionSide,
        notional: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<OpenExecution>>;

    fn close(
        &mut self,
        position: &Position,
        exit_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
        remaining: &PositionLedger,
    ) -> Result<Option<Fill>>;

    /// Latest observed price for a symbol, fed from bar closes.
    fn mark_price(&mut self, symbol: &str, price: f64);

    fn available_balance(&self) -> f64;

    fn account(&self) -> &AccountState;
}

/// Backtesting sink: every accepted intent fills instantly at the requested
/// price and only the account state changes.
#[derive(Debug)]
pub struct SimulatedSink {
    account: AccountState,
}

impl SimulatedSink {
    pub fn new(initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            account: AccountState::new(initial_balance, fee_rate),
        }
    }

    pub fn into_account(self) -> AccountState {
        self.account
    }
}

impl TradeSink for SimulatedSink {
    fn open(
        &mut self,
        symbol: &str,
        side: PositionSide,
        notional: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<OpenExecution>> {
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
        self.account.available_balance()
    }

    fn account(&self) -> &AccountState {
        &self.account
    }
}
