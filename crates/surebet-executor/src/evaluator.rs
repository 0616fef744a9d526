//! Hedge decision for a single signal.
//!
//! Pure function of the signal, the balance snapshot, pending exposure and
//! the market's constraints. Lock acquisition, staleness and placement live
//! in [`crate::placer`]; this module only decides.
//!
//! All percentages are in percent units. Intermediate values are rounded
//! half away from zero to the precision noted at each step.

use crate::config::PlacerConfig;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::fmt;
use surebet_core::{MarketInfo, OrderSide, PlaceParams, Price, Size, Surebet};
use surebet_registry::BalanceEntry;

fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// `(ask - bid) * 100 / ask`, 6 dp.
fn spread_pct(bid: Price, ask: Price) -> Decimal {
    round((ask.inner() - bid.inner()) * Decimal::ONE_HUNDRED / ask.inner(), 6)
}

/// Which sizing cap bound the hedge size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCap {
    /// Base total divided by `target_amount`.
    Total,
    MaxStake,
    /// Free quote (buy) or free base (sell).
    Free,
    /// Reference venue quantity divided by `bin_ftx_volume_ratio`.
    BinSize,
}

impl fmt::Display for SizeCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Total => "total",
            Self::MaxStake => "max_stake",
            Self::Free => "free",
            Self::BinSize => "bin_size",
        };
        f.write_str(s)
    }
}

/// Why a signal produced no order.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoMarket(String),
    Stale { age_ms: i64 },
    LockTimeout,
    Cancelled,
    BlankQuote,
    /// Not settlement-quoted and no usable conversion price.
    NoConversionPrice,
    Unprofitable { profit_sub_avg: Decimal, required: Decimal },
    /// Surplus pushed the limit price to zero or below.
    InvalidLimit(Price),
    BelowMinVolume { volume: Decimal, max_by: SizeCap },
    PlaceFailed(String),
}

impl Rejection {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoMarket(_) => "no_market",
            Self::Stale { .. } => "stale",
            Self::LockTimeout => "lock_timeout",
            Self::Cancelled => "cancelled",
            Self::BlankQuote => "blank_quote",
            Self::NoConversionPrice => "no_conversion_price",
            Self::Unprofitable { .. } => "profit",
            Self::InvalidLimit(_) => "invalid_limit",
            Self::BelowMinVolume { .. } => "min_volume",
            Self::PlaceFailed(_) => "place_error",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMarket(symbol) => write!(f, "no market for {symbol}"),
            Self::Stale { age_ms } => write!(f, "signal {age_ms}ms old"),
            Self::LockTimeout => f.write_str("symbol lock timeout"),
            Self::Cancelled => f.write_str("shutdown"),
            Self::BlankQuote => f.write_str("blank quote"),
            Self::NoConversionPrice => f.write_str("missing quote conversion price"),
            Self::Unprofitable {
                profit_sub_avg,
                required,
            } => write!(f, "profit {profit_sub_avg} <= required {required}"),
            Self::InvalidLimit(p) => write!(f, "limit price {p} not positive"),
            Self::BelowMinVolume { volume, max_by } => {
                write!(f, "volume {volume} below minimum (max_by {max_by})")
            }
            Self::PlaceFailed(e) => write!(f, "placement failed: {e}"),
        }
    }
}

/// Everything the evaluator reads.
#[derive(Debug, Clone)]
pub struct EvalInput<'a> {
    pub signal: &'a Surebet,
    pub market: &'a MarketInfo,
    pub base: BalanceEntry,
    pub quote: BalanceEntry,
    /// Unfilled size of open buy orders on the base asset.
    pub open_buy: Size,
    pub open_sell: Size,
    /// Effective taker fee, percent.
    pub real_fee: Decimal,
    /// Unix ns when handling started.
    pub started_at: i64,
}

/// Audit record of an accepted decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub id: i64,
    pub signal: Surebet,
    pub market: MarketInfo,
    pub base_balance: BalanceEntry,
    pub quote_balance: BalanceEntry,
    pub open_buy: Size,
    pub open_sell: Size,
    pub base_total: Decimal,
    pub profit_inc: Decimal,
    pub amount_coef: Decimal,
    pub required_profit: Decimal,
    pub trade_spread: Decimal,
    pub ref_spread: Decimal,
    pub buy_profit: Decimal,
    pub sell_profit: Decimal,
    pub profit: Decimal,
    pub profit_sub_fee: Decimal,
    pub profit_sub_avg: Decimal,
    pub profit_price_diff: Decimal,
    pub real_fee: Decimal,
    pub target_profit: Decimal,
    pub max_by: SizeCap,
    pub volume: Decimal,
    pub place: PlaceParams,
    /// Venue id of the hedge, once accepted.
    pub order_id: Option<i64>,
    pub started_at: i64,
    pub placed_at: Option<i64>,
}

/// Decide whether `input.signal` justifies a hedge and how large.
///
/// Returns the decision with its `PlaceParams` ready to submit, or the
/// reason it was rejected. Never divides by a zero quote.
pub fn evaluate(input: &EvalInput<'_>, cfg: &PlacerConfig) -> Result<DecisionRecord, Rejection> {
    let sb = input.signal;
    let trade = &sb.trade;
    let reference = &sb.reference;
    if trade.is_blank() || reference.is_blank() {
        return Err(Rejection::BlankQuote);
    }

    let base_total = input.base.free + input.open_buy.inner() - input.open_sell.inner();
    let pending = input.open_buy.inner() + input.open_sell.inner();
    let profit_inc = if base_total.is_zero() {
        Decimal::ZERO
    } else {
        round(pending / base_total, 4)
    };
    let amount_coef = round(profit_inc * cfg.profit_inc_ratio * cfg.target_profit, 4);
    let required = cfg.target_profit + amount_coef;

    let trade_spread = spread_pct(trade.bid_price, trade.ask_price);
    let ref_spread = spread_pct(reference.bid_price, reference.ask_price);

    // trade venue prices in settlement currency
    let (trade_bid, trade_ask) = if input.market.is_settlement_quoted() {
        (trade.bid_price.inner(), trade.ask_price.inner())
    } else {
        let conv = sb
            .usdt_price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or(Rejection::NoConversionPrice)?;
        (trade.bid_price.inner() / conv, trade.ask_price.inner() / conv)
    };
    let ref_bid = reference.bid_price.inner();
    let ref_ask = reference.ask_price.inner();
    let buy_profit = round((ref_bid - trade_ask) * Decimal::ONE_HUNDRED / ref_bid, 6);
    let sell_profit = round((trade_bid - ref_ask) * Decimal::ONE_HUNDRED / trade_bid, 6);

    let side = if buy_profit > sell_profit {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let (profit, price, ref_qty) = match side {
        OrderSide::Buy => (buy_profit, trade.ask_price, reference.bid_qty),
        OrderSide::Sell => (sell_profit, trade.bid_price, reference.ask_qty),
    };

    let profit_sub_fee = profit - trade_spread - input.real_fee;
    let avg_adj = sb.avg_price_diff / cfg.avg_price_diff_ratio;
    let profit_sub_avg = match side {
        OrderSide::Buy => round(profit_sub_fee - avg_adj, 5),
        OrderSide::Sell => round(profit_sub_fee + avg_adj, 5),
    };
    if profit_sub_avg <= required {
        return Err(Rejection::Unprofitable {
            profit_sub_avg,
            required,
        });
    }

    let surplus = (profit_sub_avg - required) / cfg.profit_diff_ratio;
    let profit_price_diff = round(price.inner() * surplus / Decimal::ONE_HUNDRED, 6);
    let limit = match side {
        OrderSide::Buy => Price::new(price.inner() + profit_price_diff),
        OrderSide::Sell => Price::new(price.inner() - profit_price_diff),
    }
    .quantize(input.market.price_increment, side);
    if !limit.is_positive() {
        return Err(Rejection::InvalidLimit(limit));
    }

    let by_free = match side {
        OrderSide::Buy => input.quote.free / limit.inner(),
        OrderSide::Sell => input.base.free,
    };
    // first match wins on ties
    let caps = [
        (SizeCap::Total, base_total / cfg.target_amount),
        (SizeCap::MaxStake, cfg.max_stake / limit.inner()),
        (SizeCap::Free, by_free),
        (SizeCap::BinSize, ref_qty.inner() / cfg.bin_ftx_volume_ratio),
    ];
    let (max_by, raw_size) = caps
        .into_iter()
        .reduce(|best, cap| if cap.1 < best.1 { cap } else { best })
        .unwrap_or((SizeCap::Total, Decimal::ZERO));
    let size = Size::new(raw_size).round_to_lot(input.market.size_increment);

    let volume = size.notional(limit).floor();
    if !size.is_positive() || volume < cfg.min_volume {
        return Err(Rejection::BelowMinVolume { volume, max_by });
    }

    Ok(DecisionRecord {
        id: sb.id,
        signal: sb.clone(),
        market: input.market.clone(),
        base_balance: input.base,
        quote_balance: input.quote,
        open_buy: input.open_buy,
        open_sell: input.open_sell,
        base_total,
        profit_inc,
        amount_coef,
        required_profit: required,
        trade_spread,
        ref_spread,
        buy_profit,
        sell_profit,
        profit,
        profit_sub_fee,
        profit_sub_avg,
        profit_price_diff,
        real_fee: input.real_fee,
        target_profit: cfg.target_profit,
        max_by,
        volume,
        place: PlaceParams::hedge(sb.id, &input.market.name, side, limit, size),
        order_id: None,
        started_at: input.started_at,
        placed_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use surebet_core::{Quote, Role};

    fn market() -> MarketInfo {
        MarketInfo {
            name: "BTC/USDT".to_string(),
            base_currency: "BTC".to_string(),
            quote_currency: "USDT".to_string(),
            price_increment: Price::new(dec!(0.01)),
            size_increment: Size::new(dec!(0.01)),
            min_order_size: Size::new(dec!(0.01)),
        }
    }

    fn quote(symbol: &str, bid: Decimal, bid_qty: Decimal, ask: Decimal, ask_qty: Decimal) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid_price: Price::new(bid),
            bid_qty: Size::new(bid_qty),
            ask_price: Price::new(ask),
            ask_qty: Size::new(ask_qty),
            server_time: 0,
            receive_time: 0,
        }
    }

    fn signal() -> Surebet {
        Surebet {
            id: 1,
            trade: quote("BTC/USDT", dec!(99.99), dec!(5), dec!(100.00), dec!(5)),
            reference: quote("BTCUSDT", dec!(100.50), dec!(3), dec!(100.60), dec!(3)),
            usdt_price: None,
            avg_price_diff: Decimal::ZERO,
        }
    }

    fn balance(free: Decimal) -> BalanceEntry {
        BalanceEntry {
            free,
            total: free,
            usd_value: free,
        }
    }

    fn config() -> PlacerConfig {
        PlacerConfig {
            target_profit: dec!(0.05),
            target_amount: dec!(10),
            max_stake: dec!(1000),
            min_volume: dec!(10),
            ..Default::default()
        }
    }

    fn input<'a>(sb: &'a Surebet, m: &'a MarketInfo) -> EvalInput<'a> {
        EvalInput {
            signal: sb,
            market: m,
            base: balance(dec!(50)),
            quote: balance(dec!(10000)),
            open_buy: Size::ZERO,
            open_sell: Size::ZERO,
            real_fee: dec!(0.02),
            started_at: 0,
        }
    }

    #[test]
    fn test_buy_accepted_with_surplus_offset() {
        let sb = signal();
        let m = market();
        let d = evaluate(&input(&sb, &m), &config()).unwrap();

        // (100.50 - 100.00) * 100 / 100.50
        assert_eq!(d.buy_profit, dec!(0.497512));
        assert_eq!(d.trade_spread, dec!(0.01));
        assert_eq!(d.required_profit, dec!(0.05));
        // 0.497512 - 0.01 - 0.02
        assert_eq!(d.profit_sub_avg, dec!(0.46751));
        // 100 * ((0.46751 - 0.05) / 2) / 100
        assert_eq!(d.profit_price_diff, dec!(0.208755));

        assert_eq!(d.place.side, OrderSide::Buy);
        // 100.208755 floored to the tick
        assert_eq!(d.place.price, Price::new(dec!(100.20)));
        // caps: total 5, stake 9.98, free 99.8, bin 1.5
        assert_eq!(d.place.size, Size::new(dec!(1.5)));
        assert_eq!(d.max_by, SizeCap::BinSize);
        assert_eq!(d.volume, dec!(150));

        assert!(d.place.ioc && !d.place.post_only);
        assert_eq!(d.place.client_id.role, Role::Hedge);
        assert_eq!(d.place.client_id.retry, 0);
        assert_eq!(d.place.client_id.id, sb.id);
    }

    #[test]
    fn test_sell_limit_ceiled_below_bid() {
        let mut sb = signal();
        sb.trade = quote("BTC/USDT", dec!(101.00), dec!(5), dec!(101.01), dec!(5));
        sb.reference = quote("BTCUSDT", dec!(100.40), dec!(3), dec!(100.50), dec!(3));
        let m = market();
        let d = evaluate(&input(&sb, &m), &config()).unwrap();

        assert_eq!(d.place.side, OrderSide::Sell);
        assert!(d.place.price < Price::new(dec!(101.00)));
        // never sells below the computed price
        let raw = dec!(101.00) - d.profit_price_diff;
        assert!(d.place.price.inner() >= raw);
        assert!(d.place.price.inner() - raw < dec!(0.01));
        // sell is capped by free base: 50 / 10 = 5 vs bin 1.5
        assert_eq!(d.max_by, SizeCap::BinSize);
    }

    #[test]
    fn test_tie_rejects() {
        let sb = signal();
        let m = market();
        let mut cfg = config();
        cfg.target_profit = dec!(0.46751);
        let err = evaluate(&input(&sb, &m), &cfg).unwrap_err();
        assert!(matches!(err, Rejection::Unprofitable { .. }));
        assert_eq!(err.reason(), "profit");
    }

    #[test]
    fn test_pending_exposure_raises_required_profit() {
        let sb = signal();
        let m = market();
        let mut inp = input(&sb, &m);
        inp.open_buy = Size::new(dec!(25));
        inp.open_sell = Size::new(dec!(25));
        let mut cfg = config();
        cfg.profit_inc_ratio = dec!(10);

        // base_total = 50 + 25 - 25 = 50, profit_inc = 1
        // amount_coef = 1 * 10 * 0.05 = 0.5, required = 0.55 > 0.46751
        let err = evaluate(&inp, &cfg).unwrap_err();
        assert_eq!(
            err,
            Rejection::Unprofitable {
                profit_sub_avg: dec!(0.46751),
                required: dec!(0.55),
            }
        );
    }

    #[test]
    fn test_avg_price_diff_shifts_by_side() {
        let mut sb = signal();
        sb.avg_price_diff = dec!(0.8);
        let m = market();
        // buy: 0.467512 - 0.8 / 2 = 0.067512 -> 0.06751
        let d = evaluate(&input(&sb, &m), &config()).unwrap();
        assert_eq!(d.profit_sub_avg, dec!(0.06751));
    }

    #[test]
    fn test_blank_quote_rejected_before_math() {
        let mut sb = signal();
        sb.reference.bid_price = Price::ZERO;
        let m = market();
        assert_eq!(
            evaluate(&input(&sb, &m), &config()).unwrap_err(),
            Rejection::BlankQuote
        );
    }

    #[test]
    fn test_non_settlement_quote_needs_conversion() {
        let mut sb = signal();
        sb.trade.symbol = "BTC/USD".to_string();
        let mut m = market();
        m.name = "BTC/USD".to_string();
        m.quote_currency = "USD".to_string();
        assert_eq!(
            evaluate(&input(&sb, &m), &config()).unwrap_err(),
            Rejection::NoConversionPrice
        );

        sb.usdt_price = Some(dec!(1));
        let d = evaluate(&input(&sb, &m), &config()).unwrap();
        assert_eq!(d.buy_profit, dec!(0.497512));
        assert_eq!(d.place.market, "BTC/USD");
    }

    #[test]
    fn test_below_min_volume() {
        let sb = signal();
        let m = market();
        let mut cfg = config();
        cfg.min_volume = dec!(151);
        let err = evaluate(&input(&sb, &m), &cfg).unwrap_err();
        assert_eq!(
            err,
            Rejection::BelowMinVolume {
                volume: dec!(150),
                max_by: SizeCap::BinSize,
            }
        );
    }

    #[test]
    fn test_max_stake_cap() {
        let sb = signal();
        let m = market();
        let mut cfg = config();
        cfg.max_stake = dec!(110);
        cfg.min_volume = dec!(1);
        let d = evaluate(&input(&sb, &m), &cfg).unwrap();
        // 110 / 100.20 = 1.0978 -> 1.09
        assert_eq!(d.max_by, SizeCap::MaxStake);
        assert_eq!(d.place.size, Size::new(dec!(1.09)));
    }

    #[test]
    fn test_free_quote_cap_on_buy() {
        let sb = signal();
        let m = market();
        let mut inp = input(&sb, &m);
        inp.quote = balance(dec!(50));
        let mut cfg = config();
        cfg.min_volume = dec!(1);
        let d = evaluate(&inp, &cfg).unwrap();
        assert_eq!(d.max_by, SizeCap::Free);
        // 50 / 100.20 = 0.499 -> 0.49
        assert_eq!(d.place.size, Size::new(dec!(0.49)));
    }

    #[test]
    fn test_decision_serializes() {
        let sb = signal();
        let m = market();
        let d = evaluate(&input(&sb, &m), &config()).unwrap();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["max_by"], "bin_size");
        assert_eq!(json["place"]["client_id"], "1:hedge:0");
    }
}
