//! Order-related types and identifiers.
//!
//! Provides order side, type, status, the structured client identifier and
//! the order intent (`PlaceParams`) / exchange-confirmed state (`Order`).

use crate::error::CoreError;
use crate::market::base_from_market;
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type. The placer only ever submits limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Exchange order status.
///
/// Only `Closed` is terminal: the venue reports `closed` whether the order
/// filled, partially filled or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    New,
    Open,
    Filled,
    Cancelled,
    Closed,
    Triggered,
}

impl OrderStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
            Self::Triggered => "triggered",
        };
        f.write_str(s)
    }
}

/// Role of an order in a decision lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initial IOC order capturing the divergence.
    Hedge,
    /// Post-only order flattening a filled hedge.
    Heal,
}

impl Role {
    fn code(&self) -> &'static str {
        match self {
            Self::Hedge => "hedge",
            Self::Heal => "heal",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Client identifier correlating a venue order with its decision.
///
/// Wire format: `{id}:{role}:{retry}`, e.g. `1650000000123456789:heal:2`.
/// `id` is the originating signal id, so hedge and heal orders of the same
/// decision share it and are told apart by `role` and `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId {
    pub id: i64,
    pub role: Role,
    pub retry: u32,
}

impl ClientId {
    pub fn hedge(id: i64) -> Self {
        Self {
            id,
            role: Role::Hedge,
            retry: 0,
        }
    }

    pub fn heal(id: i64) -> Self {
        Self {
            id,
            role: Role::Heal,
            retry: 0,
        }
    }

    /// Same lineage, next retry.
    #[must_use]
    pub fn next_retry(&self) -> Self {
        Self {
            retry: self.retry + 1,
            ..*self
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.role, self.retry)
    }
}

impl FromStr for ClientId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(id), Some(role), Some(retry), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidClientId(s.to_string()));
        };
        let id = id
            .parse()
            .map_err(|_| CoreError::InvalidClientId(s.to_string()))?;
        let role = match role {
            "hedge" => Role::Hedge,
            "heal" => Role::Heal,
            _ => return Err(CoreError::InvalidClientId(s.to_string())),
        };
        let retry = retry
            .parse()
            .map_err(|_| CoreError::InvalidClientId(s.to_string()))?;
        Ok(Self { id, role, retry })
    }
}

impl TryFrom<String> for ClientId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ClientId> for String {
    fn from(c: ClientId) -> Self {
        c.to_string()
    }
}

/// Fully-resolved order intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceParams {
    pub market: String,
    pub side: OrderSide,
    pub price: Price,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub size: Size,
    pub ioc: bool,
    pub post_only: bool,
    pub client_id: ClientId,
}

impl PlaceParams {
    /// Immediate-or-cancel limit order capturing a divergence.
    pub fn hedge(id: i64, market: &str, side: OrderSide, price: Price, size: Size) -> Self {
        Self {
            market: market.to_string(),
            side,
            price,
            order_type: OrderType::Limit,
            size,
            ioc: true,
            post_only: false,
            client_id: ClientId::hedge(id),
        }
    }

    /// Post-only limit order flattening a hedge fill.
    pub fn heal(id: i64, market: &str, side: OrderSide, price: Price, size: Size) -> Self {
        Self {
            market: market.to_string(),
            side,
            price,
            order_type: OrderType::Limit,
            size,
            ioc: false,
            post_only: true,
            client_id: ClientId::heal(id),
        }
    }

    /// Notional volume: size * price.
    pub fn volume(&self) -> Decimal {
        self.size.notional(self.price)
    }
}

/// Exchange-confirmed order state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub market: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Price,
    pub avg_fill_price: Option<Price>,
    pub size: Size,
    pub filled_size: Size,
    pub remaining_size: Size,
    pub ioc: bool,
    pub post_only: bool,
    pub client_id: Option<ClientId>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Base asset of the order's market (`BTC/USD` -> `BTC`).
    pub fn base_asset(&self) -> &str {
        base_from_market(&self.market)
    }
}

/// Venue fill notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub id: i64,
    pub order_id: i64,
    pub trade_id: Option<i64>,
    pub market: String,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub fee: Decimal,
    pub fee_currency: String,
    pub fee_rate: Decimal,
    pub liquidity: String,
    pub time: DateTime<Utc>,
}
