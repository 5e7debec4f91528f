use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{sum_position, LedgerError, LedgerStore, Settlement};
use crate::models::{Account, OpenOrder, OrderOutcome, TradeRecord};

#[derive(Default)]
struct State {
    accounts: HashMap<ObjectId, Account>,
    trades: Vec<TradeRecord>,
    open_orders: Vec<OpenOrder>,
    outcomes: Vec<OrderOutcome>,
}

impl State {
    fn account(&mut self, user_id: ObjectId, starting_cash: Decimal) -> &mut Account {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id, starting_cash, Utc::now().timestamp()))
    }

    fn open_index(&self, user_id: ObjectId, order_id: ObjectId) -> Option<usize> {
        self.open_orders
            .iter()
            .position(|o| o.id == order_id && o.user_id == user_id)
    }

    fn user_trades(&self, user_id: ObjectId) -> Vec<TradeRecord> {
        self.trades.iter().filter(|t| t.user_id == user_id).cloned().collect()
    }
}

/// Process-local ledger. A single lock around all state makes every
/// operation trivially atomic.
pub struct MemoryLedger {
    starting_cash: Decimal,
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            starting_cash,
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn get_or_create_account(&self, user_id: ObjectId) -> Result<Account, LedgerError> {
        let mut st = self.state.lock();
        Ok(st.account(user_id, self.starting_cash).clone())
    }

    async fn deposit(&self, user_id: ObjectId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut st = self.state.lock();
        let acc = st.account(user_id, self.starting_cash);
        acc.cash = acc.cash.checked_add(amount).ok_or(LedgerError::AmountOutOfRange)?;
        acc.updated_at = Utc::now().timestamp();
        acc.version += 1;
        Ok(acc.cash)
    }

    async fn list_trades(&self, user_id: ObjectId) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self.state.lock().user_trades(user_id))
    }

    async fn net_position(&self, user_id: ObjectId, symbol: &str) -> Result<i64, LedgerError> {
        let st = self.state.lock();
        Ok(sum_position(&st.user_trades(user_id), &symbol.to_uppercase()))
    }

    async fn insert_open_order(&self, order: &OpenOrder) -> Result<(), LedgerError> {
        let mut st = self.state.lock();
        if st.open_orders.iter().any(|o| o.id == order.id) {
            return Err(LedgerError::Store(format!("duplicate order id {}", order.id)));
        }
        st.open_orders.push(order.clone());
        Ok(())
    }

    async fn list_open_orders(&self, user_id: ObjectId) -> Result<Vec<OpenOrder>, LedgerError> {
        let st = self.state.lock();
        Ok(st.open_orders.iter().filter(|o| o.user_id == user_id).cloned().collect())
    }

    async fn list_all_open_orders(&self) -> Result<Vec<OpenOrder>, LedgerError> {
        Ok(self.state.lock().open_orders.clone())
    }

    async fn settle(&self, s: &Settlement) -> Result<Decimal, LedgerError> {
        let mut st = self.state.lock();

        let open_idx = match s.order_id {
            Some(order_id) => Some(st.open_index(s.user_id, order_id).ok_or(LedgerError::OrderClosed)?),
            None => None,
        };

        let held = sum_position(&st.user_trades(s.user_id), &s.symbol);
        let cash = st.account(s.user_id, self.starting_cash).cash;
        let new_cash = s.check(cash, held)?;

        // nothing below can fail
        let acc = st.account(s.user_id, self.starting_cash);
        acc.cash = new_cash;
        acc.updated_at = s.filled_at;
        acc.version += 1;

        st.trades.push(s.trade_record());

        if let Some(idx) = open_idx {
            let order = st.open_orders.remove(idx);
            st.outcomes.push(OrderOutcome::filled(&order, s.fill_price, s.filled_at));
        }

        Ok(new_cash)
    }

    async fn close_order(&self, outcome: &OrderOutcome) -> Result<bool, LedgerError> {
        let mut st = self.state.lock();
        let Some(idx) = st.open_index(outcome.user_id, outcome.order_id) else {
            return Ok(false);
        };
        st.open_orders.remove(idx);
        st.outcomes.push(outcome.clone());
        Ok(true)
    }

    async fn clear_open_orders(&self, user_id: ObjectId, closed_at: i64) -> Result<Vec<OpenOrder>, LedgerError> {
        let mut st = self.state.lock();
        let (cleared, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut st.open_orders)
            .into_iter()
            .partition(|o| o.user_id == user_id);
        st.open_orders = kept;

        for order in &cleared {
            st.outcomes.push(OrderOutcome::cancelled(order, closed_at));
        }
        Ok(cleared)
    }

    async fn order_outcome(&self, user_id: ObjectId, order_id: ObjectId) -> Result<Option<OrderOutcome>, LedgerError> {
        let st = self.state.lock();
        Ok(st
            .outcomes
            .iter()
            .find(|o| o.order_id == order_id && o.user_id == user_id)
            .cloned())
    }

    async fn list_outcomes(&self, user_id: ObjectId) -> Result<Vec<OrderOutcome>, LedgerError> {
        let st = self.state.lock();
        let mut out: Vec<OrderOutcome> = st.outcomes.iter().filter(|o| o.user_id == user_id).cloned().collect();
        out.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderIntent, OrderStatus, Side};
    use rust_decimal_macros::dec;

    fn ledger() -> MemoryLedger {
        MemoryLedger::new(dec!(1000))
    }

    async fn open(ledger: &MemoryLedger, user: ObjectId, side: Side, shares: i64, limit: Decimal) -> OrderIntent {
        let intent = OrderIntent::new(user, side, "AAPL", shares, limit, limit, dec!(1000), 0);
        ledger.insert_open_order(&intent.open_order()).await.unwrap();
        intent
    }

    #[tokio::test]
    async fn settle_fill_moves_cash_and_closes_order() {
        let l = ledger();
        let user = ObjectId::new();
        let intent = open(&l, user, Side::Buy, 10, dec!(100)).await;

        let cash = l.settle(&Settlement::fill(&intent, dec!(99), 5)).await.unwrap();
        assert_eq!(cash, dec!(10));

        assert!(l.list_open_orders(user).await.unwrap().is_empty());
        let trades = l.list_trades(user).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].fill_price, dec!(99));
        assert_eq!(trades[0].order_id, Some(intent.id));

        let outcome = l.order_outcome(user, intent.id).await.unwrap().unwrap();
        assert_eq!(outcome.status, OrderStatus::Filled);
        assert_eq!(outcome.fill_price, Some(dec!(99)));
    }

    #[tokio::test]
    async fn failed_settle_leaves_no_trace() {
        let l = ledger();
        let user = ObjectId::new();
        let intent = open(&l, user, Side::Buy, 20, dec!(100)).await;

        let err = l.settle(&Settlement::fill(&intent, dec!(99), 5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCash { .. }));

        assert_eq!(l.get_or_create_account(user).await.unwrap().cash, dec!(1000));
        assert!(l.list_trades(user).await.unwrap().is_empty());
        assert_eq!(l.list_open_orders(user).await.unwrap().len(), 1);
        assert!(l.order_outcome(user, intent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settle_after_close_is_a_no_op() {
        let l = ledger();
        let user = ObjectId::new();
        let intent = open(&l, user, Side::Buy, 1, dec!(100)).await;

        let order = intent.open_order();
        assert!(l.close_order(&OrderOutcome::cancelled(&order, 1)).await.unwrap());
        assert!(!l.close_order(&OrderOutcome::expired(&order, 2)).await.unwrap());

        let err = l.settle(&Settlement::fill(&intent, dec!(50), 3)).await.unwrap_err();
        assert_eq!(err, LedgerError::OrderClosed);
        assert_eq!(l.get_or_create_account(user).await.unwrap().cash, dec!(1000));
        assert!(l.list_trades(user).await.unwrap().is_empty());

        let outcome = l.order_outcome(user, intent.id).await.unwrap().unwrap();
        assert_eq!(outcome.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn clear_only_touches_the_acting_user() {
        let l = ledger();
        let alice = ObjectId::new();
        let bob = ObjectId::new();
        open(&l, alice, Side::Buy, 1, dec!(10)).await;
        open(&l, alice, Side::Buy, 2, dec!(11)).await;
        open(&l, bob, Side::Buy, 3, dec!(12)).await;

        let cleared = l.clear_open_orders(alice, 9).await.unwrap();
        assert_eq!(cleared.len(), 2);
        assert!(l.list_open_orders(alice).await.unwrap().is_empty());
        assert_eq!(l.list_open_orders(bob).await.unwrap().len(), 1);
        assert_eq!(l.list_outcomes(alice).await.unwrap().len(), 2);
        assert!(l.list_outcomes(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deposit_rejects_non_positive_amounts() {
        let l = ledger();
        let user = ObjectId::new();
        assert_eq!(l.deposit(user, dec!(0)).await, Err(LedgerError::InvalidAmount));
        assert_eq!(l.deposit(user, dec!(250.50)).await, Ok(dec!(1250.50)));
    }

    #[tokio::test]
    async fn deposit_past_decimal_range_is_refused() {
        let l = ledger();
        let user = ObjectId::new();

        assert_eq!(l.deposit(user, Decimal::MAX).await, Err(LedgerError::AmountOutOfRange));
        assert_eq!(l.get_or_create_account(user).await.unwrap().cash, dec!(1000));
    }

    #[tokio::test]
    async fn sell_that_would_overflow_cash_changes_nothing() {
        let l = ledger();
        let user = ObjectId::new();
        l.settle(&Settlement::market(user, "AAPL", 1, dec!(1), 1)).await.unwrap();
        l.deposit(user, Decimal::MAX - dec!(1000)).await.unwrap();

        let res = l.settle(&Settlement::market(user, "AAPL", -1, dec!(5000), 2)).await;
        assert_eq!(res, Err(LedgerError::AmountOutOfRange));
        assert_eq!(l.list_trades(user).await.unwrap().len(), 1);
        assert_eq!(l.net_position(user, "AAPL").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn net_position_sums_signed_shares_per_symbol() {
        let l = ledger();
        let user = ObjectId::new();
        l.settle(&Settlement::market(user, "AAPL", 5, dec!(10), 1)).await.unwrap();
        l.settle(&Settlement::market(user, "MSFT", 1, dec!(10), 2)).await.unwrap();
        l.settle(&Settlement::market(user, "aapl", -2, dec!(12), 3)).await.unwrap();

        assert_eq!(l.net_position(user, "aapl").await.unwrap(), 3);
        assert_eq!(l.net_position(user, "MSFT").await.unwrap(), 1);
        assert_eq!(l.net_position(user, "TSLA").await.unwrap(), 0);
    }
}
