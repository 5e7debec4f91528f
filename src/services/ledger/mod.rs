//! Balances, trade history and limit-order rows.
//!
//! Every method is atomic on its own. `settle` and `close_order` are the only
//! multi-row writes and each runs as one unit: either all of its effects land
//! or none do.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{Account, OpenOrder, OrderIntent, OrderOutcome, TradeRecord};

pub mod memory;
pub mod mongo;

pub use memory::MemoryLedger;
pub use mongo::MongoLedger;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient cash: need {needed}, have {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("insufficient holdings of {symbol}: want {wanted}, hold {held}")]
    InsufficientHoldings { symbol: String, wanted: i64, held: i64 },

    #[error("order is no longer open")]
    OrderClosed,

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("amount out of range")]
    AmountOutOfRange,

    #[error("store error: {0}")]
    Store(String),
}

impl From<mongodb::error::Error> for LedgerError {
    fn from(e: mongodb::error::Error) -> Self {
        LedgerError::Store(e.to_string())
    }
}

/// One fill to apply: cash moves by `-(fill_price * signed_shares)`.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub user_id: ObjectId,

    // the open order this fill closes; None for market trades
    pub order_id: Option<ObjectId>,

    pub symbol: String,
    pub signed_shares: i64,
    pub fill_price: Decimal,
    pub filled_at: i64,
}

impl Settlement {
    pub fn market(user_id: ObjectId, symbol: &str, signed_shares: i64, fill_price: Decimal, filled_at: i64) -> Self {
        Self {
            user_id,
            order_id: None,
            symbol: symbol.to_uppercase(),
            signed_shares,
            fill_price,
            filled_at,
        }
    }

    pub fn fill(intent: &OrderIntent, fill_price: Decimal, filled_at: i64) -> Self {
        Self {
            user_id: intent.user_id,
            order_id: Some(intent.id),
            symbol: intent.symbol.clone(),
            signed_shares: intent.signed_shares(),
            fill_price,
            filled_at,
        }
    }

    pub fn notional(&self) -> Result<Decimal, LedgerError> {
        self.fill_price
            .checked_mul(Decimal::from(self.signed_shares.unsigned_abs()))
            .ok_or(LedgerError::AmountOutOfRange)
    }

    pub fn cash_delta(&self) -> Result<Decimal, LedgerError> {
        let notional = self.notional()?;
        Ok(if self.signed_shares < 0 { notional } else { -notional })
    }

    pub fn trade_record(&self) -> TradeRecord {
        TradeRecord {
            id: ObjectId::new(),
            user_id: self.user_id,
            order_id: self.order_id,
            symbol: self.symbol.clone(),
            signed_shares: self.signed_shares,
            fill_price: self.fill_price,
            filled_at: self.filled_at,
        }
    }

    /// Checks the fill against the state it is about to change. Shared by
    /// every store so they reject the same things.
    pub fn check(&self, cash: Decimal, held: i64) -> Result<Decimal, LedgerError> {
        if self.signed_shares < 0 && held < -self.signed_shares {
            return Err(LedgerError::InsufficientHoldings {
                symbol: self.symbol.clone(),
                wanted: -self.signed_shares,
                held,
            });
        }

        let new_cash = cash
            .checked_add(self.cash_delta()?)
            .ok_or(LedgerError::AmountOutOfRange)?;
        if new_cash < Decimal::ZERO {
            return Err(LedgerError::InsufficientCash {
                needed: self.notional()?,
                available: cash,
            });
        }

        Ok(new_cash)
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> Result<(), LedgerError>;

    /// Gets the account, creating it with the starting balance if missing.
    async fn get_or_create_account(&self, user_id: ObjectId) -> Result<Account, LedgerError>;

    /// Adds `amount` (> 0) to the balance and returns the new cash.
    async fn deposit(&self, user_id: ObjectId, amount: Decimal) -> Result<Decimal, LedgerError>;

    /// Full history, oldest first.
    async fn list_trades(&self, user_id: ObjectId) -> Result<Vec<TradeRecord>, LedgerError>;

    async fn net_position(&self, user_id: ObjectId, symbol: &str) -> Result<i64, LedgerError>;

    async fn insert_open_order(&self, order: &OpenOrder) -> Result<(), LedgerError>;

    async fn list_open_orders(&self, user_id: ObjectId) -> Result<Vec<OpenOrder>, LedgerError>;

    /// Every user's open orders; used to resume polling after a restart.
    async fn list_all_open_orders(&self) -> Result<Vec<OpenOrder>, LedgerError>;

    /// Applies a fill in one unit: cash, trade row, and (for limit orders)
    /// open-row removal plus a `Filled` outcome. Fails with `OrderClosed` and
    /// changes nothing if the order's open row is already gone.
    async fn settle(&self, settlement: &Settlement) -> Result<Decimal, LedgerError>;

    /// Removes the open row and records the terminal outcome in one unit.
    /// Returns false (and records nothing) if the order was not open.
    async fn close_order(&self, outcome: &OrderOutcome) -> Result<bool, LedgerError>;

    /// Closes all of one user's open orders as cancelled.
    async fn clear_open_orders(&self, user_id: ObjectId, closed_at: i64) -> Result<Vec<OpenOrder>, LedgerError>;

    async fn order_outcome(&self, user_id: ObjectId, order_id: ObjectId) -> Result<Option<OrderOutcome>, LedgerError>;

    /// Closed orders, most recent first.
    async fn list_outcomes(&self, user_id: ObjectId) -> Result<Vec<OrderOutcome>, LedgerError>;
}

/// Per-user async mutexes serialising balance writes inside this process.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<DashMap<ObjectId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: ObjectId) -> OwnedMutexGuard<()> {
        let m = self.inner.entry(user_id).or_default().clone();
        m.lock_owned().await
    }
}

pub fn sum_position(trades: &[TradeRecord], symbol: &str) -> i64 {
    trades
        .iter()
        .filter(|t| t.symbol == symbol)
        .map(|t| t.signed_shares)
        .sum()
}
