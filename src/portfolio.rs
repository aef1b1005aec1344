//! Per-actor balances and open positions.
//!
//! Cash is never stored. It is always derived as
//! `initial_capital + realized_pnl - margin_used`, so the only ways money
//! moves are booking realized P&L (fees included) and locking or releasing
//! margin. That keeps the accounting identity impossible to drift.

use crate::position::{Position, PositionKey};
use crate::types::{Instrument, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    // Fixed at creation, never mutated.
    pub initial_capital: Quote,
    // Accumulates on every close and every fee charge.
    pub realized_pnl: Quote,
    // Sum of margin locked by open positions.
    pub margin_used: Quote,
    pub positions: HashMap<PositionKey, Position>,
    // Set when a post-commit invariant check fails. A halted book refuses
    // further mutation until someone investigates.
    pub halted: bool,
    pub created_at: Timestamp,
}

impl Portfolio {
    pub fn new(initial_capital: Quote, timestamp: Timestamp) -> Self {
        Self {
            initial_capital,
            realized_pnl: Quote::zero(),
            margin_used: Quote::zero(),
            positions: HashMap::new(),
            halted: false,
            created_at: timestamp,
        }
    }

    pub fn cash(&self) -> Quote {
        self.initial_capital
            .add(self.realized_pnl)
            .sub(self.margin_used)
    }

    pub fn unrealized_pnl(&self, prices: &HashMap<Instrument, Price>) -> Quote {
        self.positions
            .values()
            .map(|p| {
                // A missing price marks the position at entry: zero
                // contribution rather than a failed snapshot.
                let mark = prices.get(&p.instrument).copied().unwrap_or(p.entry_price);
                p.unrealized_pnl(mark)
            })
            .sum()
    }

    pub fn total_value(&self, prices: &HashMap<Instrument, Price>) -> Quote {
        self.cash()
            .add(self.margin_used)
            .add(self.unrealized_pnl(prices))
    }

    pub fn book_realized(&mut self, delta: Quote) {
        self.realized_pnl = self.realized_pnl.add(delta);
    }

    pub fn lock_margin(&mut self, amount: Quote) {
        self.margin_used = self.margin_used.add(amount);
    }

    pub fn release_margin(&mut self, amount: Quote) {
        self.margin_used = self.margin_used.sub(amount);
    }

    // Post-commit consistency check. A failure here is a programming error,
    // not an expected external condition: the caller halts the book.
    pub fn verify_invariants(&self) -> Result<(), InvariantViolation> {
        if self.cash().is_negative() {
            return Err(InvariantViolation::NegativeCash { cash: self.cash() });
        }

        let mut expected_margin = Decimal::ZERO;
        for position in self.positions.values() {
            if !position.margin_is_exact() {
                return Err(InvariantViolation::MarginDrift {
                    instrument: position.instrument.clone(),
                });
            }
            expected_margin += position.margin.value();
        }
        if self.margin_used.value() != expected_margin {
            return Err(InvariantViolation::MarginSumMismatch {
                tracked: self.margin_used,
                computed: Quote::new(expected_margin),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InvariantViolation {
    #[error("cash went negative after commit: {cash}")]
    NegativeCash { cash: Quote },

    #[error("margin does not match quantity * entry / leverage for {instrument}")]
    MarginDrift { instrument: Instrument },

    #[error("margin_used {tracked} disagrees with summed position margin {computed}")]
    MarginSumMismatch { tracked: Quote, computed: Quote },
}
