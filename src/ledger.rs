// 6.0 ledger.rs: the position ledger. sole owner of portfolios and open
// positions, and the only mutation boundary in the engine.
//
// Every operation is atomic with respect to one actor's book: a per-actor
// mutex serializes open/adjust/close, and snapshot/view take the same lock
// so a reader can never observe a half-applied operation. The outer RwLock
// only guards actor registration. No lock is ever held across an await;
// callers read a view, go do their slow external work, then re-enter here
// where existence and capital are re-validated against current state.

use crate::fees;
use crate::portfolio::{InvariantViolation, Portfolio};
use crate::position::{self, Position, PositionKey};
use crate::records::{AccountSnapshot, TradeAction, TradeRecord};
use crate::types::{
    ActorId, Instrument, Leverage, LeverageBounds, Price, Qty, Quote, Side, Timestamp,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("actor {0} not found")]
    ActorNotFound(ActorId),

    #[error("actor {0} already registered")]
    ActorAlreadyExists(ActorId),

    #[error("actor {0} is halted after an invariant violation")]
    ActorHalted(ActorId),

    #[error("leverage {leverage} outside allowed range [{}, {}]", .bounds.min, .bounds.max)]
    InvalidLeverage {
        leverage: Leverage,
        bounds: LeverageBounds,
    },

    #[error("insufficient capital: required {required}, available {available}")]
    InsufficientCapital { required: Quote, available: Quote },

    #[error("position already open for {instrument} {side}, use adjust or close")]
    PositionAlreadyOpen { instrument: Instrument, side: Side },

    #[error("no open position for {instrument} {side}")]
    PositionNotFound { instrument: Instrument, side: Side },

    #[error("invariant violation, book halted: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Immutable view of one actor's book, taken under the lock. What the
/// orchestrator ships to the decision service and the interpreter.
#[derive(Debug, Clone)]
pub struct ActorView {
    pub actor_id: ActorId,
    pub cash: Quote,
    pub realized_pnl: Quote,
    pub margin_used: Quote,
    pub positions: Vec<Position>,
}

impl ActorView {
    pub fn position(&self, instrument: &Instrument, side: Side) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| &p.instrument == instrument && p.side == side)
    }

    pub fn open_side(&self, instrument: &Instrument) -> Option<Side> {
        // Long resolves first when both sides are somehow open.
        [Side::Long, Side::Short]
            .into_iter()
            .find(|side| self.position(instrument, *side).is_some())
    }
}

#[derive(Debug)]
pub struct PositionLedger {
    leverage_bounds: LeverageBounds,
    books: RwLock<HashMap<ActorId, Arc<Mutex<Portfolio>>>>,
}

impl PositionLedger {
    pub fn new(leverage_bounds: LeverageBounds) -> Self {
        Self {
            leverage_bounds,
            books: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_actor(
        &self,
        actor_id: &ActorId,
        initial_capital: Quote,
        timestamp: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut books = self
            .books
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if books.contains_key(actor_id) {
            return Err(LedgerError::ActorAlreadyExists(actor_id.clone()));
        }
        books.insert(
            actor_id.clone(),
            Arc::new(Mutex::new(Portfolio::new(initial_capital, timestamp))),
        );
        Ok(())
    }

    pub fn actors(&self) -> Vec<ActorId> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    // 6.1: open a fresh position. rejects before any mutation: leverage out
    // of policy, key already live, or cash short of margin + entry fee.
    pub fn open(
        &self,
        actor_id: &ActorId,
        instrument: Instrument,
        side: Side,
        quantity: Qty,
        price: Price,
        leverage: Leverage,
        fee_rate: Decimal,
        timestamp: Timestamp,
    ) -> Result<TradeRecord, LedgerError> {
        if !self.leverage_bounds.contains(leverage) {
            return Err(LedgerError::InvalidLeverage {
                leverage,
                bounds: self.leverage_bounds,
            });
        }

        self.mutate(actor_id, |book| {
            let key = PositionKey::new(instrument.clone(), side);
            if book.positions.contains_key(&key) {
                return Err(LedgerError::PositionAlreadyOpen { instrument, side });
            }

            let required = fees::required_capital(quantity, price, leverage, fee_rate);
            let available = book.cash();
            if available < required {
                return Err(LedgerError::InsufficientCapital {
                    required,
                    available,
                });
            }

            let entry_fee = fees::fee(quantity, price, fee_rate);
            let pos = Position::open(instrument.clone(), side, quantity, price, leverage, timestamp);
            book.lock_margin(pos.margin);
            book.book_realized(entry_fee.negate());
            book.positions.insert(key, pos);

            Ok(TradeRecord {
                actor_id: actor_id.clone(),
                instrument,
                side,
                action: TradeAction::Open,
                quantity,
                price,
                leverage,
                fee: entry_fee,
                realized_pnl_delta: entry_fee.negate(),
                timestamp,
            })
        })
    }

    // 6.2: grow an existing position at a new fill price. entry becomes the
    // quantity-weighted average; leverage stays what the position opened
    // with. the added margin plus entry fee must fit in cash.
    pub fn adjust(
        &self,
        actor_id: &ActorId,
        instrument: Instrument,
        side: Side,
        added_quantity: Qty,
        price: Price,
        fee_rate: Decimal,
        timestamp: Timestamp,
    ) -> Result<TradeRecord, LedgerError> {
        self.mutate(actor_id, |book| {
            let key = PositionKey::new(instrument.clone(), side);
            let existing = book
                .positions
                .get(&key)
                .ok_or_else(|| LedgerError::PositionNotFound {
                    instrument: instrument.clone(),
                    side,
                })?
                .clone();

            let grown = position::increase_position(&existing, added_quantity, price, timestamp);
            let added_margin = grown.margin.sub(existing.margin);
            let entry_fee = fees::fee(added_quantity, price, fee_rate);
            let required = added_margin.add(entry_fee);
            let available = book.cash();
            if available < required {
                return Err(LedgerError::InsufficientCapital {
                    required,
                    available,
                });
            }

            let leverage = grown.leverage;
            book.lock_margin(added_margin);
            book.book_realized(entry_fee.negate());
            book.positions.insert(key, grown);

            Ok(TradeRecord {
                actor_id: actor_id.clone(),
                instrument,
                side,
                action: TradeAction::Increase,
                quantity: added_quantity,
                price,
                leverage,
                fee: entry_fee,
                realized_pnl_delta: entry_fee.negate(),
                timestamp,
            })
        })
    }

    // 6.3: close all or part of a position. realized pnl (net of exit fee)
    // books into the portfolio and the proportional margin is released.
    // closing an absent key is an error so duplicate signals are detectable.
    pub fn close(
        &self,
        actor_id: &ActorId,
        instrument: Instrument,
        side: Side,
        exit_price: Price,
        fee_rate: Decimal,
        quantity: Option<Qty>,
        timestamp: Timestamp,
    ) -> Result<TradeRecord, LedgerError> {
        self.mutate(actor_id, |book| {
            let key = PositionKey::new(instrument.clone(), side);
            let existing = book
                .positions
                .get(&key)
                .ok_or_else(|| LedgerError::PositionNotFound {
                    instrument: instrument.clone(),
                    side,
                })?
                .clone();

            let requested = quantity.unwrap_or(existing.quantity);
            let reduction =
                position::reduce_position(&existing, requested, exit_price, timestamp);

            let exit_fee = fees::fee(reduction.closed_quantity, exit_price, fee_rate);
            let booked = reduction.gross_pnl.sub(exit_fee);

            book.release_margin(reduction.margin_released);
            book.book_realized(booked);

            let action = match &reduction.remaining {
                Some(remaining) => {
                    book.positions.insert(key, remaining.clone());
                    TradeAction::Decrease
                }
                None => {
                    book.positions.remove(&key);
                    TradeAction::Close
                }
            };

            Ok(TradeRecord {
                actor_id: actor_id.clone(),
                instrument,
                side,
                action,
                quantity: reduction.closed_quantity,
                price: exit_price,
                leverage: existing.leverage,
                fee: exit_fee,
                realized_pnl_delta: booked,
                timestamp,
            })
        })
    }

    // 6.4: consistent read of one actor's book, priced at the supplied marks.
    pub fn snapshot(
        &self,
        actor_id: &ActorId,
        prices: &HashMap<Instrument, Price>,
        timestamp: Timestamp,
    ) -> Result<AccountSnapshot, LedgerError> {
        self.read(actor_id, |book| AccountSnapshot {
            actor_id: actor_id.clone(),
            timestamp,
            cash: book.cash(),
            margin_used: book.margin_used,
            unrealized_pnl: book.unrealized_pnl(prices),
            realized_pnl: book.realized_pnl,
            total_value: book.total_value(prices),
            open_positions: book.positions.len(),
        })
    }

    pub fn view(&self, actor_id: &ActorId) -> Result<ActorView, LedgerError> {
        self.read(actor_id, |book| ActorView {
            actor_id: actor_id.clone(),
            cash: book.cash(),
            realized_pnl: book.realized_pnl,
            margin_used: book.margin_used,
            positions: book.positions.values().cloned().collect(),
        })
    }

    pub fn is_halted(&self, actor_id: &ActorId) -> Result<bool, LedgerError> {
        self.read(actor_id, |book| book.halted)
    }

    fn book(&self, actor_id: &ActorId) -> Result<Arc<Mutex<Portfolio>>, LedgerError> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(actor_id)
            .cloned()
            .ok_or_else(|| LedgerError::ActorNotFound(actor_id.clone()))
    }

    // Runs a mutation under the actor lock, then verifies invariants. On a
    // violation the book is halted and stays halted; reads still work.
    fn mutate<T>(
        &self,
        actor_id: &ActorId,
        op: impl FnOnce(&mut Portfolio) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let book = self.book(actor_id)?;
        let mut book = book.lock().unwrap_or_else(PoisonError::into_inner);
        if book.halted {
            return Err(LedgerError::ActorHalted(actor_id.clone()));
        }

        let result = op(&mut book)?;

        if let Err(violation) = book.verify_invariants() {
            book.halted = true;
            tracing::error!(actor = %actor_id, %violation, "ledger invariant violated, halting book");
            return Err(LedgerError::Invariant(violation));
        }

        Ok(result)
    }

    fn read<T>(
        &self,
        actor_id: &ActorId,
        op: impl FnOnce(&Portfolio) -> T,
    ) -> Result<T, LedgerError> {
        let book = self.book(actor_id)?;
        let book = book.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(op(&book))
    }
}
