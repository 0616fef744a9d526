//! Venue wire types.
//!
//! Field names follow the venue's camelCase JSON. Each DTO has one explicit
//! mapping function into its domain type; nothing outside this module reads
//! the raw shapes.

use crate::balance::BalanceEntry;
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use surebet_core::{
    base_from_market, ClientId, Fill, MarketInfo, Order, OrderSide, OrderStatus, OrderType, Price,
    Size,
};
use tracing::warn;

/// Market listing entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMarket {
    pub name: String,
    #[serde(rename = "baseCurrency", default)]
    pub base_currency: Option<String>,
    #[serde(rename = "quoteCurrency", default)]
    pub quote_currency: Option<String>,
    #[serde(rename = "priceIncrement")]
    pub price_increment: Decimal,
    #[serde(rename = "sizeIncrement")]
    pub size_increment: Decimal,
    #[serde(rename = "minProvideSize")]
    pub min_provide_size: Decimal,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RawMarket {
    /// Map into `MarketInfo`, rejecting non-positive increments.
    pub fn into_market(self) -> RegistryResult<MarketInfo> {
        if self.price_increment <= Decimal::ZERO {
            return Err(RegistryError::InvalidField {
                field: "priceIncrement",
                value: format!("{}: {}", self.name, self.price_increment),
            });
        }
        if self.size_increment <= Decimal::ZERO {
            return Err(RegistryError::InvalidField {
                field: "sizeIncrement",
                value: format!("{}: {}", self.name, self.size_increment),
            });
        }

        let base_currency = self
            .base_currency
            .unwrap_or_else(|| base_from_market(&self.name).to_string());
        let quote_currency = self.quote_currency.unwrap_or_default();
        Ok(MarketInfo {
            name: self.name,
            base_currency,
            quote_currency,
            price_increment: Price::new(self.price_increment),
            size_increment: Size::new(self.size_increment),
            min_order_size: Size::new(self.min_provide_size),
        })
    }
}

/// Balance listing entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawBalance {
    pub coin: String,
    pub free: Decimal,
    pub total: Decimal,
    #[serde(rename = "usdValue", default)]
    pub usd_value: Decimal,
}

impl RawBalance {
    pub fn into_entry(self) -> (String, BalanceEntry) {
        (
            self.coin,
            BalanceEntry {
                free: self.free,
                total: self.total,
                usd_value: self.usd_value,
            },
        )
    }
}

/// Account information. Only the fee schedule is consumed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAccount {
    #[serde(default)]
    pub username: String,
    #[serde(rename = "takerFee")]
    pub taker_fee: Decimal,
    #[serde(rename = "makerFee")]
    pub maker_fee: Decimal,
}

impl RawAccount {
    pub fn fees(&self) -> AccountFees {
        AccountFees {
            taker_fee: self.taker_fee,
            maker_fee: self.maker_fee,
        }
    }
}

/// Fee rates as fractions (0.0007 = 0.07%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFees {
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
}

impl AccountFees {
    /// Taker fee net of the referral rebate, in percent.
    pub fn effective_taker_pct(&self, referral_rate: Decimal) -> Decimal {
        (self.taker_fee - self.taker_fee * referral_rate) * Decimal::ONE_HUNDRED
    }
}

/// Order snapshot as reported by the venue.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawOrder {
    pub id: i64,
    pub market: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    #[serde(rename = "type", default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(rename = "avgFillPrice", default)]
    pub avg_fill_price: Option<Decimal>,
    pub size: Decimal,
    #[serde(rename = "filledSize", default)]
    pub filled_size: Decimal,
    #[serde(rename = "remainingSize", default)]
    pub remaining_size: Decimal,
    #[serde(default)]
    pub ioc: bool,
    #[serde(rename = "postOnly", default)]
    pub post_only: bool,
    #[serde(rename = "clientId", default)]
    pub client_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl RawOrder {
    /// Map into `Order`.
    ///
    /// An undecodable client id maps to `None`; the order is still returned
    /// so its snapshot can be persisted.
    pub fn into_order(self) -> Order {
        let client_id = self.client_id.as_deref().and_then(|raw| {
            raw.parse::<ClientId>()
                .map_err(|e| warn!(order_id = self.id, client_id = raw, error = %e, "Undecodable client id"))
                .ok()
        });
        Order {
            id: self.id,
            market: self.market,
            side: self.side,
            status: self.status,
            order_type: self.order_type,
            price: Price::new(self.price.unwrap_or_default()),
            avg_fill_price: self.avg_fill_price.map(Price::new),
            size: Size::new(self.size),
            filled_size: Size::new(self.filled_size),
            remaining_size: Size::new(self.remaining_size),
            ioc: self.ioc,
            post_only: self.post_only,
            client_id,
            created_at: self.created_at,
            closed_at: None,
        }
    }
}

/// Fill notification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawFill {
    pub id: i64,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "tradeId", default)]
    pub trade_id: Option<i64>,
    pub market: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(rename = "feeCurrency", default)]
    pub fee_currency: String,
    #[serde(rename = "feeRate", default)]
    pub fee_rate: Decimal,
    #[serde(default)]
    pub liquidity: String,
    pub time: DateTime<Utc>,
}

impl RawFill {
    pub fn into_fill(self) -> Fill {
        Fill {
            id: self.id,
            order_id: self.order_id,
            trade_id: self.trade_id,
            market: self.market,
            side: self.side,
            price: Price::new(self.price),
            size: Size::new(self.size),
            fee: self.fee,
            fee_currency: self.fee_currency,
            fee_rate: self.fee_rate,
            liquidity: self.liquidity,
            time: self.time,
        }
    }
}
