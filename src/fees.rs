//! Margin, fee, and P&L calculation.
//!
//! Pure functions over explicit inputs; the ledger composes these and owns
//! all state. The fee is charged independently on every entry and every
//! exit, so a full round trip pays it twice. That is deliberate policy.

use crate::types::{Leverage, Price, Qty, Quote, Side};
use rust_decimal::Decimal;

// 2.1: capital locked to support a leveraged position.
pub fn margin(quantity: Qty, price: Price, leverage: Leverage) -> Quote {
    Quote::new(quantity.value() * price.value() / leverage.as_decimal())
}

// 2.2: flat fee on notional. same rate for entries and exits.
pub fn fee(quantity: Qty, price: Price, fee_rate: Decimal) -> Quote {
    Quote::new(quantity.value() * price.value() * fee_rate)
}

// 2.3: what an open must reserve from cash: margin plus the entry fee.
pub fn required_capital(
    quantity: Qty,
    price: Price,
    leverage: Leverage,
    fee_rate: Decimal,
) -> Quote {
    margin(quantity, price, leverage).add(fee(quantity, price, fee_rate))
}

// 2.4: mark-to-market gain. long profits when mark > entry, short the inverse.
pub fn unrealized_pnl(side: Side, quantity: Qty, entry_price: Price, mark_price: Price) -> Quote {
    let diff = mark_price.value() - entry_price.value();
    Quote::new(side.sign() * diff * quantity.value())
}

// 2.5: booked gain on close, net of the exit fee, scaled to the closed portion.
pub fn realized_pnl_on_close(
    side: Side,
    exit_quantity: Qty,
    entry_price: Price,
    exit_price: Price,
    fee_rate: Decimal,
) -> Quote {
    let gross = unrealized_pnl(side, exit_quantity, entry_price, exit_price);
    gross.sub(fee(exit_quantity, exit_price, fee_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn qty(v: Decimal) -> Qty {
        Qty::new_unchecked(v)
    }

    fn price(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn lev(v: u32) -> Leverage {
        Leverage::new(v).unwrap()
    }

    #[test]
    fn margin_formula() {
        // 1 BTC * $50,000 / 10x = $5,000
        let m = margin(qty(dec!(1)), price(dec!(50000)), lev(10));
        assert_eq!(m.value(), dec!(5000));
    }

    #[test]
    fn fee_on_notional() {
        let f = fee(qty(dec!(1)), price(dec!(50000)), dec!(0.001));
        assert_eq!(f.value(), dec!(50));
    }

    #[test]
    fn required_capital_is_margin_plus_fee() {
        let r = required_capital(qty(dec!(1)), price(dec!(50000)), lev(10), dec!(0.001));
        assert_eq!(r.value(), dec!(5050));
    }

    #[test]
    fn unrealized_long_profit() {
        let pnl = unrealized_pnl(Side::Long, qty(dec!(1)), price(dec!(50000)), price(dec!(51000)));
        assert_eq!(pnl.value(), dec!(1000));
    }

    #[test]
    fn unrealized_long_loss() {
        let pnl = unrealized_pnl(Side::Long, qty(dec!(2)), price(dec!(50000)), price(dec!(49000)));
        assert_eq!(pnl.value(), dec!(-2000));
    }

    #[test]
    fn unrealized_short_mirrors_long() {
        let up = price(dec!(51000));
        let entry = price(dec!(50000));
        let long = unrealized_pnl(Side::Long, qty(dec!(1)), entry, up);
        let short = unrealized_pnl(Side::Short, qty(dec!(1)), entry, up);
        assert_eq!(long.value(), dec!(1000));
        assert_eq!(short.value(), dec!(-1000));
    }

    #[test]
    fn realized_net_of_exit_fee() {
        // +1000 gross, minus 51 exit fee at 51,000
        let pnl = realized_pnl_on_close(
            Side::Long,
            qty(dec!(1)),
            price(dec!(50000)),
            price(dec!(51000)),
            dec!(0.001),
        );
        assert_eq!(pnl.value(), dec!(949));
    }

    #[test]
    fn realized_scales_to_closed_portion() {
        let pnl = realized_pnl_on_close(
            Side::Short,
            qty(dec!(0.5)),
            price(dec!(50000)),
            price(dec!(48000)),
            dec!(0.001),
        );
        // 0.5 * 2000 gross - 0.5 * 48000 * 0.001 = 1000 - 24
        assert_eq!(pnl.value(), dec!(976));
    }
}
