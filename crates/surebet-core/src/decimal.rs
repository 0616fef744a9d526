//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Every monetary value in
//! the placer (prices, sizes, profit percentages) stays in `Decimal`; floats
//! only appear in log fields.

use crate::order::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to prevent mixing prices with sizes in calculations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to tick size.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).floor() * tick_size.0)
    }

    /// Round up to tick size.
    #[inline]
    pub fn ceil_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).ceil() * tick_size.0)
    }

    /// Quantize a limit price for the given side.
    ///
    /// - Buy: floor, never pays more than the computed price
    /// - Sell: ceil, never receives less than the computed price
    #[inline]
    pub fn quantize(&self, tick_size: Price, side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => self.round_to_tick(tick_size),
            OrderSide::Sell => self.ceil_to_tick(tick_size),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to lot size.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        if lot_size.is_zero() {
            return *self;
        }
        Self((self.0 / lot_size.0).floor() * lot_size.0)
    }

    /// Calculate notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Size {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl Sum for Size {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Size::ZERO, |acc, s| acc + s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_round_to_tick() {
        let price = Price::new(dec!(12345.6789));
        let tick = Price::new(dec!(0.01));

        assert_eq!(price.round_to_tick(tick).0, dec!(12345.67));
        assert_eq!(price.ceil_to_tick(tick).0, dec!(12345.68));
    }

    #[test]
    fn test_quantize_by_side() {
        let price = Price::new(dec!(100.005));
        let tick = Price::new(dec!(0.01));

        assert_eq!(price.quantize(tick, OrderSide::Buy).0, dec!(100.00));
        assert_eq!(price.quantize(tick, OrderSide::Sell).0, dec!(100.01));
    }

    #[test]
    fn test_quantize_on_grid_is_identity() {
        let price = Price::new(dec!(100.25));
        let tick = Price::new(dec!(0.05));

        assert_eq!(price.quantize(tick, OrderSide::Buy), price);
        assert_eq!(price.quantize(tick, OrderSide::Sell), price);
    }

    #[test]
    fn test_zero_tick_is_noop() {
        let price = Price::new(dec!(1.23456));
        assert_eq!(price.quantize(Price::ZERO, OrderSide::Sell), price);
        assert_eq!(Size::new(dec!(1.5)).round_to_lot(Size::ZERO).0, dec!(1.5));
    }

    #[test]
    fn test_size_round_to_lot() {
        let size = Size::new(dec!(1.2345));
        let lot = Size::new(dec!(0.001));

        assert_eq!(size.round_to_lot(lot).0, dec!(1.234));
    }

    #[test]
    fn test_size_sum_and_notional() {
        let total: Size = [dec!(0.5), dec!(1.25), dec!(0.25)]
            .into_iter()
            .map(Size::new)
            .sum();
        assert_eq!(total.0, dec!(2));
        assert_eq!(total.notional(Price::new(dec!(50000))), dec!(100000));
    }

    fn arb_tick() -> impl Strategy<Value = Decimal> {
        (1i64..10_000, 0u32..6).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
    }

    fn arb_price() -> impl Strategy<Value = Decimal> {
        (1i64..1_000_000_000, 0u32..8).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
    }

    proptest! {
        #[test]
        fn prop_buy_never_rounds_up(raw in arb_price(), tick in arb_tick()) {
            let price = Price::new(raw);
            let q = price.quantize(Price::new(tick), OrderSide::Buy);
            prop_assert!(q <= price);
            prop_assert!(price.0 - q.0 < tick);
            prop_assert!((q.0 / tick).fract().is_zero());
        }

        #[test]
        fn prop_sell_never_rounds_down(raw in arb_price(), tick in arb_tick()) {
            let price = Price::new(raw);
            let q = price.quantize(Price::new(tick), OrderSide::Sell);
            prop_assert!(q >= price);
            prop_assert!(q.0 - price.0 < tick);
            prop_assert!((q.0 / tick).fract().is_zero());
        }
    }
}
