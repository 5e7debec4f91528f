use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR},
    options::FindOptions,
    Client, ClientSession, Collection, Database,
};
use rust_decimal::Decimal;

use super::{LedgerError, LedgerStore, Settlement};
use crate::models::{Account, OpenOrder, OrderOutcome, TradeRecord};

pub const ACCOUNTS: &str = "accounts";
pub const TRADES: &str = "trades";
pub const OPEN_ORDERS: &str = "open_orders";
pub const OUTCOMES: &str = "order_outcomes";

const MAX_TXN_ATTEMPTS: u32 = 3;
const MAX_CAS_ATTEMPTS: u32 = 8;

enum TxnError {
    Ledger(LedgerError),
    Mongo(MongoError),
}

impl From<LedgerError> for TxnError {
    fn from(e: LedgerError) -> Self {
        TxnError::Ledger(e)
    }
}

impl From<MongoError> for TxnError {
    fn from(e: MongoError) -> Self {
        TxnError::Mongo(e)
    }
}

impl TxnError {
    fn is_transient(&self) -> bool {
        matches!(self, TxnError::Mongo(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR))
    }
}

impl From<TxnError> for LedgerError {
    fn from(e: TxnError) -> Self {
        match e {
            TxnError::Ledger(e) => e,
            TxnError::Mongo(e) => LedgerError::Store(e.to_string()),
        }
    }
}

/// MongoDB ledger. Multi-row writes run in a transaction, so the server
/// must be a replica set (a single-node one is enough).
pub struct MongoLedger {
    client: Client,
    db: Database,
    starting_cash: Decimal,
}

impl MongoLedger {
    pub fn new(client: Client, db_name: &str, starting_cash: Decimal) -> Self {
        let db = client.database(db_name);
        Self {
            client,
            db,
            starting_cash,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn accounts(&self) -> Collection<Account> {
        self.db.collection::<Account>(ACCOUNTS)
    }

    fn trades(&self) -> Collection<TradeRecord> {
        self.db.collection::<TradeRecord>(TRADES)
    }

    fn open_orders(&self) -> Collection<OpenOrder> {
        self.db.collection::<OpenOrder>(OPEN_ORDERS)
    }

    fn outcomes(&self) -> Collection<OrderOutcome> {
        self.db.collection::<OrderOutcome>(OUTCOMES)
    }

    async fn begin(&self) -> Result<ClientSession, TxnError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(session)
    }

    /// Commits on success, aborts on failure.
    async fn finish<T>(session: &mut ClientSession, res: Result<T, TxnError>) -> Result<T, TxnError> {
        match res {
            Ok(v) => {
                session.commit_transaction().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::warn!(error = %abort, "abort_transaction failed");
                }
                Err(e)
            }
        }
    }

    async fn account_in_txn(&self, user_id: ObjectId, session: &mut ClientSession) -> Result<Account, TxnError> {
        if let Some(acc) = self
            .accounts()
            .find_one_with_session(doc! { "_id": user_id }, None, session)
            .await?
        {
            return Ok(acc);
        }

        let acc = Account::new(user_id, self.starting_cash, Utc::now().timestamp());
        self.accounts().insert_one_with_session(&acc, None, session).await?;
        Ok(acc)
    }

    async fn position_in_txn(&self, user_id: ObjectId, symbol: &str, session: &mut ClientSession) -> Result<i64, TxnError> {
        let mut cursor = self
            .trades()
            .find_with_session(doc! { "user_id": user_id, "symbol": symbol }, None, session)
            .await?;

        let mut held = 0i64;
        while let Some(t) = cursor.next(session).await {
            held += t?.signed_shares;
        }
        Ok(held)
    }

    async fn settle_in_txn(&self, s: &Settlement, session: &mut ClientSession) -> Result<Decimal, TxnError> {
        let closed = match s.order_id {
            Some(order_id) => {
                let order = self
                    .open_orders()
                    .find_one_and_delete_with_session(doc! { "_id": order_id, "user_id": s.user_id }, None, session)
                    .await?
                    .ok_or(LedgerError::OrderClosed)?;
                Some(order)
            }
            None => None,
        };

        let acc = self.account_in_txn(s.user_id, session).await?;
        let held = if s.signed_shares < 0 {
            self.position_in_txn(s.user_id, &s.symbol, session).await?
        } else {
            0
        };
        let new_cash = s.check(acc.cash, held)?;

        let res = self
            .accounts()
            .update_one_with_session(
                doc! { "_id": s.user_id, "version": acc.version },
                doc! {
                    "$set": { "cash": new_cash.to_string(), "updated_at": s.filled_at },
                    "$inc": { "version": 1 },
                },
                None,
                session,
            )
            .await?;
        if res.matched_count == 0 {
            return Err(LedgerError::Store("balance changed during settlement".into()).into());
        }

        self.trades().insert_one_with_session(s.trade_record(), None, session).await?;

        if let Some(order) = closed {
            self.outcomes()
                .insert_one_with_session(OrderOutcome::filled(&order, s.fill_price, s.filled_at), None, session)
                .await?;
        }

        Ok(new_cash)
    }

    async fn close_in_txn(&self, outcome: &OrderOutcome, session: &mut ClientSession) -> Result<bool, TxnError> {
        let res = self
            .open_orders()
            .delete_one_with_session(doc! { "_id": outcome.order_id, "user_id": outcome.user_id }, None, session)
            .await?;
        if res.deleted_count == 0 {
            return Ok(false);
        }

        self.outcomes().insert_one_with_session(outcome, None, session).await?;
        Ok(true)
    }

    async fn clear_in_txn(&self, user_id: ObjectId, closed_at: i64, session: &mut ClientSession) -> Result<Vec<OpenOrder>, TxnError> {
        let mut cursor = self
            .open_orders()
            .find_with_session(doc! { "user_id": user_id }, None, session)
            .await?;

        let mut cleared: Vec<OpenOrder> = vec![];
        while let Some(o) = cursor.next(session).await {
            cleared.push(o?);
        }
        if cleared.is_empty() {
            return Ok(cleared);
        }

        self.open_orders()
            .delete_many_with_session(doc! { "user_id": user_id }, None, session)
            .await?;

        let outcomes: Vec<OrderOutcome> = cleared.iter().map(|o| OrderOutcome::cancelled(o, closed_at)).collect();
        self.outcomes().insert_many_with_session(outcomes, None, session).await?;

        Ok(cleared)
    }

    async fn collect<T>(&self, coll: Collection<T>, filter: mongodb::bson::Document, opts: Option<FindOptions>) -> Result<Vec<T>, LedgerError>
    where
        T: serde::de::DeserializeOwned + Unpin + Send + Sync,
    {
        let mut cursor = coll.find(filter, opts).await?;
        let mut out: Vec<T> = vec![];
        while let Some(res) = cursor.next().await {
            out.push(res?);
        }
        Ok(out)
    }
}

#[async_trait]
impl LedgerStore for MongoLedger {
    async fn ping(&self) -> Result<(), LedgerError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn get_or_create_account(&self, user_id: ObjectId) -> Result<Account, LedgerError> {
        if let Some(acc) = self.accounts().find_one(doc! { "_id": user_id }, None).await? {
            return Ok(acc);
        }

        let acc = Account::new(user_id, self.starting_cash, Utc::now().timestamp());
        if let Err(e) = self.accounts().insert_one(&acc, None).await {
            // lost a creation race: the other insert wins
            return self
                .accounts()
                .find_one(doc! { "_id": user_id }, None)
                .await?
                .ok_or_else(|| LedgerError::Store(e.to_string()));
        }

        Ok(acc)
    }

    async fn deposit(&self, user_id: ObjectId, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let acc = self.get_or_create_account(user_id).await?;
            let new_cash = acc.cash.checked_add(amount).ok_or(LedgerError::AmountOutOfRange)?;

            let res = self
                .accounts()
                .update_one(
                    doc! { "_id": user_id, "version": acc.version },
                    doc! {
                        "$set": { "cash": new_cash.to_string(), "updated_at": Utc::now().timestamp() },
                        "$inc": { "version": 1 },
                    },
                    None,
                )
                .await?;

            if res.matched_count == 1 {
                return Ok(new_cash);
            }
        }

        Err(LedgerError::Store("balance kept changing during deposit".into()))
    }

    async fn list_trades(&self, user_id: ObjectId) -> Result<Vec<TradeRecord>, LedgerError> {
        let opts = FindOptions::builder().sort(doc! { "filled_at": 1 }).build();
        self.collect(self.trades(), doc! { "user_id": user_id }, Some(opts)).await
    }

    async fn net_position(&self, user_id: ObjectId, symbol: &str) -> Result<i64, LedgerError> {
        let trades = self
            .collect(self.trades(), doc! { "user_id": user_id, "symbol": symbol.to_uppercase() }, None)
            .await?;
        Ok(trades.iter().map(|t| t.signed_shares).sum())
    }

    async fn insert_open_order(&self, order: &OpenOrder) -> Result<(), LedgerError> {
        self.open_orders().insert_one(order, None).await?;
        Ok(())
    }

    async fn list_open_orders(&self, user_id: ObjectId) -> Result<Vec<OpenOrder>, LedgerError> {
        let opts = FindOptions::builder().sort(doc! { "submitted_at": -1 }).build();
        self.collect(self.open_orders(), doc! { "user_id": user_id }, Some(opts)).await
    }

    async fn list_all_open_orders(&self) -> Result<Vec<OpenOrder>, LedgerError> {
        self.collect(self.open_orders(), doc! {}, None).await
    }

    async fn settle(&self, s: &Settlement) -> Result<Decimal, LedgerError> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut session = self.begin().await?;
            let res = self.settle_in_txn(s, &mut session).await;
            match Self::finish(&mut session, res).await {
                Err(e) if e.is_transient() && attempt < MAX_TXN_ATTEMPTS => {
                    tracing::warn!(user_id = %s.user_id, attempt, "settlement conflict, retrying");
                    continue;
                }
                other => return other.map_err(LedgerError::from),
            }
        }
        Err(LedgerError::Store("settlement retries exhausted".into()))
    }

    async fn close_order(&self, outcome: &OrderOutcome) -> Result<bool, LedgerError> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut session = self.begin().await?;
            let res = self.close_in_txn(outcome, &mut session).await;
            match Self::finish(&mut session, res).await {
                Err(e) if e.is_transient() && attempt < MAX_TXN_ATTEMPTS => continue,
                other => return other.map_err(LedgerError::from),
            }
        }
        Err(LedgerError::Store("close retries exhausted".into()))
    }

    async fn clear_open_orders(&self, user_id: ObjectId, closed_at: i64) -> Result<Vec<OpenOrder>, LedgerError> {
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut session = self.begin().await?;
            let res = self.clear_in_txn(user_id, closed_at, &mut session).await;
            match Self::finish(&mut session, res).await {
                Err(e) if e.is_transient() && attempt < MAX_TXN_ATTEMPTS => continue,
                other => return other.map_err(LedgerError::from),
            }
        }
        Err(LedgerError::Store("clear retries exhausted".into()))
    }

    async fn order_outcome(&self, user_id: ObjectId, order_id: ObjectId) -> Result<Option<OrderOutcome>, LedgerError> {
        Ok(self
            .outcomes()
            .find_one(doc! { "_id": order_id, "user_id": user_id }, None)
            .await?)
    }

    async fn list_outcomes(&self, user_id: ObjectId) -> Result<Vec<OrderOutcome>, LedgerError> {
        let opts = FindOptions::builder().sort(doc! { "closed_at": -1 }).build();
        self.collect(self.outcomes(), doc! { "user_id": user_id }, Some(opts)).await
    }
}
