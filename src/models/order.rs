use std::{fmt, str::FromStr};

use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn from_signed(signed_shares: i64) -> Self {
        if signed_shares < 0 { Side::Sell } else { Side::Buy }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Everything the engine needs to work one limit order. Built once at intake.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub id: ObjectId,
    pub side: Side,
    pub user_id: ObjectId,
    pub symbol: String,
    pub shares: i64,
    pub limit_price: Decimal,

    // market price and resulting cash seen at submission; informational only,
    // settlement always prices from the triggering quote
    pub snapshot_price: Decimal,
    pub snapshot_cash_after: Decimal,

    pub submitted_at: i64,
}

impl OrderIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: ObjectId,
        side: Side,
        symbol: &str,
        shares: i64,
        limit_price: Decimal,
        snapshot_price: Decimal,
        cash: Decimal,
        submitted_at: i64,
    ) -> Self {
        // saturates; intake refuses orders whose value leaves the Decimal range
        let notional = snapshot_price.saturating_mul(Decimal::from(shares));
        let snapshot_cash_after = match side {
            Side::Buy => cash.saturating_sub(notional),
            Side::Sell => cash.saturating_add(notional),
        };

        Self {
            id: ObjectId::new(),
            side,
            user_id,
            symbol: symbol.to_uppercase(),
            shares,
            limit_price,
            snapshot_price,
            snapshot_cash_after,
            submitted_at,
        }
    }

    /// Rebuilds an intent from a persisted open order, e.g. after a restart.
    /// The snapshot is taken at the limit price against the given cash.
    pub fn from_open_order(order: &OpenOrder, cash: Decimal) -> Self {
        let side = Side::from_signed(order.signed_shares);
        let mut intent = Self::new(
            order.user_id,
            side,
            &order.symbol,
            order.signed_shares.abs(),
            order.limit_price,
            order.limit_price,
            cash,
            order.submitted_at,
        );
        intent.id = order.id;
        intent
    }

    /// Buy fills at or below the limit, sell at or above it.
    pub fn is_triggered_by(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price <= self.limit_price,
            Side::Sell => price >= self.limit_price,
        }
    }

    pub fn signed_shares(&self) -> i64 {
        self.shares * self.side.sign()
    }

    pub fn open_order(&self) -> OpenOrder {
        OpenOrder {
            id: self.id,
            user_id: self.user_id,
            symbol: self.symbol.clone(),
            signed_shares: self.signed_shares(),
            limit_price: self.limit_price,
            submitted_at: self.submitted_at,
        }
    }
}

/// A submitted, not yet closed limit order. Never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,
    pub symbol: String,

    // negative for sell orders
    pub signed_shares: i64,
    pub limit_price: Decimal,
    pub submitted_at: i64,
}

impl OpenOrder {
    pub fn side(&self) -> Side {
        Side::from_signed(self.signed_shares)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Failed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// Terminal state of a limit order, written exactly once when it closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    #[serde(rename = "_id")]
    pub order_id: ObjectId,

    pub user_id: ObjectId,
    pub symbol: String,
    pub signed_shares: i64,
    pub limit_price: Decimal,
    pub status: OrderStatus,

    #[serde(default)]
    pub fill_price: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,

    pub closed_at: i64,
}

impl OrderOutcome {
    fn closing(order: &OpenOrder, status: OrderStatus, closed_at: i64) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            signed_shares: order.signed_shares,
            limit_price: order.limit_price,
            status,
            fill_price: None,
            reason: None,
            closed_at,
        }
    }

    pub fn filled(order: &OpenOrder, fill_price: Decimal, closed_at: i64) -> Self {
        let mut out = Self::closing(order, OrderStatus::Filled, closed_at);
        out.fill_price = Some(fill_price);
        out
    }

    pub fn failed(order: &OpenOrder, reason: impl Into<String>, closed_at: i64) -> Self {
        let mut out = Self::closing(order, OrderStatus::Failed, closed_at);
        out.reason = Some(reason.into());
        out
    }

    pub fn cancelled(order: &OpenOrder, closed_at: i64) -> Self {
        Self::closing(order, OrderStatus::Cancelled, closed_at)
    }

    pub fn expired(order: &OpenOrder, closed_at: i64) -> Self {
        Self::closing(order, OrderStatus::Expired, closed_at)
    }
}
