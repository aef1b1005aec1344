// 3.0: open position tracking. keyed by (actor, instrument, side) in the
// ledger; at most one position per key. re-opening a live key is an
// adjustment with quantity-weighted entry averaging, never a second position.
// 3.1 has increase/reduce logic at the bottom.

use crate::fees;
use crate::types::{Instrument, Leverage, Price, Qty, Quote, Side, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub instrument: Instrument,
    pub side: Side,
}

impl PositionKey {
    pub fn new(instrument: Instrument, side: Side) -> Self {
        Self { instrument, side }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Qty,
    pub entry_price: Price,
    pub leverage: Leverage,
    // Always equals quantity * entry_price / leverage. Recomputed from the
    // formula on every quantity or price change; the ledger verifies this
    // after each commit.
    pub margin: Quote,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn open(
        instrument: Instrument,
        side: Side,
        quantity: Qty,
        entry_price: Price,
        leverage: Leverage,
        timestamp: Timestamp,
    ) -> Self {
        let margin = fees::margin(quantity, entry_price, leverage);
        Self {
            instrument,
            side,
            quantity,
            entry_price,
            leverage,
            margin,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.instrument.clone(), self.side)
    }

    pub fn unrealized_pnl(&self, mark_price: Price) -> Quote {
        fees::unrealized_pnl(self.side, self.quantity, self.entry_price, mark_price)
    }

    pub fn notional(&self, mark_price: Price) -> Quote {
        Quote::new(self.quantity.value() * mark_price.value())
    }

    // Margin drifts only if someone mutates fields without the formula.
    pub fn margin_is_exact(&self) -> bool {
        self.margin == fees::margin(self.quantity, self.entry_price, self.leverage)
    }
}

// 3.1: adds quantity to an existing position at a new fill price. entry price
// becomes the quantity-weighted average; leverage is unchanged; margin is
// recomputed from the formula on the new totals.
pub fn increase_position(
    position: &Position,
    added_quantity: Qty,
    fill_price: Price,
    timestamp: Timestamp,
) -> Position {
    let old_qty = position.quantity.value();
    let add_qty = added_quantity.value();
    let new_qty = old_qty + add_qty;

    let weighted =
        (old_qty * position.entry_price.value() + add_qty * fill_price.value()) / new_qty;
    let new_entry = Price::new_unchecked(weighted);
    let new_quantity = Qty::new_unchecked(new_qty);
    let new_margin = fees::margin(new_quantity, new_entry, position.leverage);

    Position {
        instrument: position.instrument.clone(),
        side: position.side,
        quantity: new_quantity,
        entry_price: new_entry,
        leverage: position.leverage,
        margin: new_margin,
        opened_at: position.opened_at,
        updated_at: timestamp,
    }
}

#[derive(Debug, Clone)]
pub struct PositionReduction {
    // None when the position closed out entirely.
    pub remaining: Option<Position>,
    pub closed_quantity: Qty,
    // Margin released back to the portfolio: the full margin on a close,
    // old margin minus recomputed margin on a partial reduce.
    pub margin_released: Quote,
    // Price difference * closed quantity, before the exit fee.
    pub gross_pnl: Quote,
}

// 3.2: closes up to `requested` of the position at the exit price. a request
// beyond the open quantity clamps to a full close. entry price and leverage
// never change on a reduction.
pub fn reduce_position(
    position: &Position,
    requested: Qty,
    exit_price: Price,
    timestamp: Timestamp,
) -> PositionReduction {
    let closed = requested.min(position.quantity);
    let gross = fees::unrealized_pnl(position.side, closed, position.entry_price, exit_price);

    let remaining_qty = position.quantity.value() - closed.value();
    if remaining_qty.is_zero() {
        return PositionReduction {
            remaining: None,
            closed_quantity: closed,
            margin_released: position.margin,
            gross_pnl: gross,
        };
    }

    let new_quantity = Qty::new_unchecked(remaining_qty);
    let new_margin = fees::margin(new_quantity, position.entry_price, position.leverage);
    let released = position.margin.sub(new_margin);

    let remaining = Position {
        instrument: position.instrument.clone(),
        side: position.side,
        quantity: new_quantity,
        entry_price: position.entry_price,
        leverage: position.leverage,
        margin: new_margin,
        opened_at: position.opened_at,
        updated_at: timestamp,
    };

    PositionReduction {
        remaining: Some(remaining),
        closed_quantity: closed,
        margin_released: released,
        gross_pnl: gross,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Instrument {
        Instrument::new("BTC")
    }

    fn test_position() -> Position {
        Position::open(
            btc(),
            Side::Long,
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(50000)),
            Leverage::new(10).unwrap(),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn open_computes_margin_from_formula() {
        let pos = test_position();
        assert_eq!(pos.margin.value(), dec!(5000));
        assert!(pos.margin_is_exact());
    }

    #[test]
    fn unrealized_pnl_long() {
        let pos = test_position();
        let pnl = pos.unrealized_pnl(Price::new_unchecked(dec!(52000)));
        assert_eq!(pnl.value(), dec!(2000));
    }

    #[test]
    fn unrealized_pnl_short() {
        let pos = Position::open(
            btc(),
            Side::Short,
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(50000)),
            Leverage::new(10).unwrap(),
            Timestamp::from_millis(0),
        );
        let pnl = pos.unrealized_pnl(Price::new_unchecked(dec!(48000)));
        assert_eq!(pnl.value(), dec!(2000)); // short profits when price drops
    }

    #[test]
    fn increase_averages_entry() {
        let pos = test_position();
        let bigger = increase_position(
            &pos,
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(52000)),
            Timestamp::from_millis(1000),
        );

        assert_eq!(bigger.quantity.value(), dec!(2));
        // (1 * 50000 + 1 * 52000) / 2 = 51000
        assert_eq!(bigger.entry_price.value(), dec!(51000));
        // margin recomputed: 2 * 51000 / 10 = 10200
        assert_eq!(bigger.margin.value(), dec!(10200));
        assert!(bigger.margin_is_exact());
        assert_eq!(bigger.leverage.get(), 10);
    }

    #[test]
    fn reduce_partial_keeps_entry_and_releases_margin() {
        let pos = increase_position(
            &test_position(),
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(50000)),
            Timestamp::from_millis(0),
        ); // 2 BTC @ 50000, margin 10000

        let update = reduce_position(
            &pos,
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(52000)),
            Timestamp::from_millis(1000),
        );

        let remaining = update.remaining.unwrap();
        assert_eq!(remaining.quantity.value(), dec!(1));
        assert_eq!(remaining.entry_price.value(), dec!(50000)); // unchanged
        assert_eq!(remaining.margin.value(), dec!(5000));
        assert!(remaining.margin_is_exact());
        assert_eq!(update.margin_released.value(), dec!(5000));
        assert_eq!(update.gross_pnl.value(), dec!(2000));
    }

    #[test]
    fn reduce_full_close() {
        let pos = test_position();
        let update = reduce_position(
            &pos,
            Qty::new_unchecked(dec!(1)),
            Price::new_unchecked(dec!(51000)),
            Timestamp::from_millis(1000),
        );

        assert!(update.remaining.is_none());
        assert_eq!(update.margin_released.value(), dec!(5000));
        assert_eq!(update.gross_pnl.value(), dec!(1000));
    }

    #[test]
    fn reduce_clamps_to_open_quantity() {
        let pos = test_position();
        let update = reduce_position(
            &pos,
            Qty::new_unchecked(dec!(5)),
            Price::new_unchecked(dec!(50000)),
            Timestamp::from_millis(1000),
        );

        assert!(update.remaining.is_none());
        assert_eq!(update.closed_quantity.value(), dec!(1));
    }
}
