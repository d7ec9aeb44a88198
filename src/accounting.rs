use crate::models::{ExitReason, Fill, OpenExecution, Position, PositionSide};
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;

/// Fee-aware balance and PnL tracking. `available_balance` only ever reflects
/// realized capital; open positions are valued on demand from the last
/// observed mark per symbol.
#[derive(Debug, Clone)]
pub struct AccountState {
    initial_balance: f64,
    available_balance: f64,
    fee_rate: f64,
    fills: Vec<Fill>,
    /// (timestamp, cumulative total PnL at that instant), appended exactly
    /// once per successful close.
    pnl_log: Vec<(DateTime<Utc>, f64)>,
    marks: HashMap<String, f64>,
}

impl AccountState {
    pub fn new(initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            initial_balance,
            available_balance: initial_balance,
            fee_rate,
            fills: Vec::new(),
            pnl_log: Vec::new(),
            marks: HashMap::new(),
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn available_balance(&self) -> f64 {
        self.available_balance
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn pnl_log(&self) -> &[(DateTime<Utc>, f64)] {
        &self.pnl_log
    }

    /// Record the latest observed price for a symbol. Ticks feed bar closes in
    /// here; fills do not update marks.
    pub fn record_mark(&mut self, symbol: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.marks.insert(symbol.to_string(), price);
        }
    }

    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    /// Confirmed OPEN: the gross notional leaves the balance, the entry fee is
    /// taken out of it and the remainder becomes the position's working
    /// capital.
    pub fn apply_open(
        &mut self,
        symbol: &str,
        side: PositionSide,
        notional: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> OpenExecution {
        let fee = notional * self.fee_rate;
        let net_notional = notional - fee;
        self.available_balance -= notional;

        let fill = Fill {
            symbol: symbol.to_string(),
            side: side.entry_fill_side(),
            price,
            notional,
            timestamp,
            exit_reason: None,
        };
        self.fills.push(fill.clone());

        OpenExecution { fill, net_notional }
    }

    /// Confirmed CLOSE: realizes PnL on the position's net notional, charges
    /// the exit fee and appends the cumulative total PnL (realized plus
    /// unrealized over `remaining_open`) to the log.
    pub fn apply_close<'a>(
        &mut self,
        position: &Position,
        exit_price: f64,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
        remaining_open: impl Iterator<Item = &'a Position>,
    ) -> Fill {
        let net = position.net_notional;
        let pnl = match position.side {
            PositionSide::Long => net * (exit_price / position.entry_price - 1.0),
            PositionSide::Short => net * (position.entry_price / exit_price - 1.0),
        };
        let exit_fee = net * self.fee_rate;
        self.available_balance += net + pnl - exit_fee;

        let fill = Fill {
            symbol: position.symbol.clone(),
            side: position.side.required_exit_side(),
            price: exit_price,
            notional: net,
            timestamp,
            exit_reason: Some(reason),
        };
        self.fills.push(fill.clone());

        let total_pnl = self.final_balance(remaining_open) - self.initial_balance;
        self.pnl_log.push((timestamp, total_pnl));

        fill
    }

    /// Realized balance plus mark-to-market value of the given open positions.
    /// Positions whose symbol has no recorded mark are skipped, not zeroed.
    pub fn final_balance<'a>(&self, open: impl Iterator<Item = &'a Position>) -> f64 {
        let mut balance = self.available_balance;
        for position in open {
            let Some(mark) = self.mark(&position.symbol) else {
                warn!(
                    "No observed price for {}; skipping it in unrealized valuation",
                    position.symbol
                );
                continue;
            };
            let gain = match position.side {
                PositionSide::Long => mark / position.entry_price,
                PositionSide::Short => position.entry_price / mark,
            };
            balance += position.net_notional * gain;
        }
        balance
    }

    pub fn roi_percent<'a>(&self, open: impl Iterator<Item = &'a Position>) -> f64 {
        (self.final_balance(open) - self.initial_balance) / self.initial_balance * 100.0
    }

    /// Win/loss tally from the direction of the cumulative-PnL curve: an entry
    /// above its predecessor counts as a win, anything else as a loss. A small
    /// losing trade after a larger winning one can therefore be misclassified;
    /// this matches the reporting semantics the log was designed for.
    pub fn wins_losses(&self) -> (usize, usize) {
        let mut wins = 0;
        let mut losses = 0;
        for pair in self.pnl_log.windows(2) {
            if pair[1].1 > pair[0].1 {
                wins += 1;
            } else {
                losses += 1;
            }
        }
        (wins, losses)
    }
}
