//! Limit order engine.
//!
//! Each open order gets its own task that polls the quote source until the
//! order's trigger holds, then settles through the ledger in one atomic step.
//! Tasks are bounded by a semaphore, sleep between polls, back off on quote
//! failures, expire after `max_lifetime`, and stop when cancelled.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use dashmap::DashMap;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use tokio::{
    sync::{broadcast, watch, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, error, info, warn};

use super::{
    backoff::ExponentialBackoff,
    ledger::{LedgerError, LedgerStore, Settlement, UserLocks},
    quotes::QuoteSource,
};
use crate::models::{OpenOrder, OrderIntent, OrderOutcome, Side};

const BACKOFF_JITTER: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub backoff_max: Duration,
    pub max_lifetime: Duration,
    pub max_orders: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(24 * 60 * 60),
            max_orders: 256,
        }
    }
}

/// A reserved engine slot. Dropping it frees the slot.
pub struct EngineSlot {
    _permit: OwnedSemaphorePermit,
}

struct Running {
    user_id: ObjectId,
    task: u64,
    cancel_tx: watch::Sender<bool>,
}

enum Poll {
    Waiting,
    Unavailable,
    Cancelled,
    Closed(OrderOutcome),
}

struct Inner {
    ledger: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteSource>,
    events_tx: broadcast::Sender<String>,
    config: EngineConfig,
    slots: Arc<Semaphore>,
    running: DashMap<ObjectId, Running>,
    next_task: AtomicU64,
    locks: UserLocks,
}

#[derive(Clone)]
pub struct OrderEngine {
    inner: Arc<Inner>,
}

impl OrderEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteSource>,
        events_tx: broadcast::Sender<String>,
        config: EngineConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_orders));
        Self {
            inner: Arc::new(Inner {
                ledger,
                quotes,
                events_tx,
                config,
                slots,
                running: DashMap::new(),
                next_task: AtomicU64::new(0),
                locks: UserLocks::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Claims a slot for a new order, or None when the engine is saturated.
    pub fn try_reserve(&self) -> Option<EngineSlot> {
        self.inner
            .slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| EngineSlot { _permit: permit })
    }

    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    pub fn running(&self) -> usize {
        self.inner.running.len()
    }

    pub fn is_running(&self, order_id: ObjectId) -> bool {
        self.inner.running.contains_key(&order_id)
    }

    /// Starts polling for one order. The returned handle resolves to the
    /// order's terminal outcome; callers are free to drop it.
    pub fn spawn(&self, intent: OrderIntent, slot: EngineSlot) -> JoinHandle<OrderOutcome> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = self.inner.next_task.fetch_add(1, Ordering::Relaxed);
        let replaced = self.inner.running.insert(
            intent.id,
            Running {
                user_id: intent.user_id,
                task,
                cancel_tx,
            },
        );
        if replaced.is_some() {
            // dropping the old sender detaches the older task; the row is left to this one
            warn!(order_id = %intent.id, "order spawned twice; detaching the older task");
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _slot = slot;
            let order_id = intent.id;

            let outcome = inner.work(intent, cancel_rx).await;

            // a newer task for the same order keeps its entry
            inner.running.remove_if(&order_id, |_, r| r.task == task);
            inner.notify(&["ordersUpdated"]);
            outcome
        })
    }

    /// Signals one order's task to stop. It exits without settling.
    pub fn cancel(&self, order_id: ObjectId) -> bool {
        match self.inner.running.remove(&order_id) {
            Some((_, running)) => {
                let _ = running.cancel_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Signals every running task owned by `user_id`.
    pub fn cancel_user(&self, user_id: ObjectId) -> usize {
        let ids: Vec<ObjectId> = self
            .inner
            .running
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| *e.key())
            .collect();

        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Holds the user's balance lock; every cash write goes through it.
    pub async fn lock_user(&self, user_id: ObjectId) -> OwnedMutexGuard<()> {
        self.inner.locks.lock(user_id).await
    }

    pub async fn settle(&self, settlement: &Settlement) -> Result<Decimal, LedgerError> {
        self.inner.settle(settlement).await
    }

    /// Restarts polling for orders left open by a previous process.
    pub async fn resume_open_orders(&self) -> Result<usize, LedgerError> {
        let orders = self.inner.ledger.list_all_open_orders().await?;
        let mut resumed = 0;

        for order in orders {
            if self.is_running(order.id) {
                continue;
            }
            let Some(slot) = self.try_reserve() else {
                warn!(order_id = %order.id, "engine saturated while resuming open orders");
                break;
            };

            let cash = self.inner.ledger.get_or_create_account(order.user_id).await?.cash;
            self.spawn(OrderIntent::from_open_order(&order, cash), slot);
            resumed += 1;
        }

        Ok(resumed)
    }
}

impl Inner {
    fn notify(&self, events: &[&str]) {
        for ev in events {
            let _ = self.events_tx.send(ev.to_string());
        }
    }

    async fn settle(&self, s: &Settlement) -> Result<Decimal, LedgerError> {
        let _guard = self.locks.lock(s.user_id).await;
        self.ledger.settle(s).await
    }

    fn deadline(&self, intent: &OrderIntent) -> Instant {
        let age = (Utc::now().timestamp() - intent.submitted_at).max(0) as u64;
        let left = self.config.max_lifetime.saturating_sub(Duration::from_secs(age));
        let now = Instant::now();
        now.checked_add(left).unwrap_or(now + Duration::from_secs(365 * 24 * 60 * 60))
    }

    async fn work(&self, intent: OrderIntent, mut cancel_rx: watch::Receiver<bool>) -> OrderOutcome {
        let order = intent.open_order();
        let deadline = self.deadline(&intent);
        let mut backoff = ExponentialBackoff::new(self.config.poll_interval, self.config.backoff_max, BACKOFF_JITTER);

        info!(
            order_id = %intent.id,
            user_id = %intent.user_id,
            symbol = %intent.symbol,
            side = %intent.side,
            shares = intent.shares,
            limit = %intent.limit_price,
            "limit order working"
        );

        loop {
            if *cancel_rx.borrow() {
                return self.close(OrderOutcome::cancelled(&order, Utc::now().timestamp()), &mut cancel_rx).await;
            }
            if Instant::now() >= deadline {
                return self.close(OrderOutcome::expired(&order, Utc::now().timestamp()), &mut cancel_rx).await;
            }

            let wait = match self.poll_once(&intent, &mut cancel_rx).await {
                Poll::Closed(outcome) => return outcome,
                Poll::Cancelled => continue,
                Poll::Waiting => {
                    backoff.reset();
                    self.config.poll_interval
                }
                Poll::Unavailable => backoff.next_delay(),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = time::sleep(wait.min(remaining)) => {}
                res = cancel_rx.changed() => {
                    if res.is_err() {
                        return self.detach(&order).await;
                    }
                }
            }
        }
    }

    async fn poll_once(&self, intent: &OrderIntent, cancel_rx: &mut watch::Receiver<bool>) -> Poll {
        if intent.side == Side::Sell {
            match self.ledger.net_position(intent.user_id, &intent.symbol).await {
                Ok(held) if held < intent.shares => {
                    let reason = LedgerError::InsufficientHoldings {
                        symbol: intent.symbol.clone(),
                        wanted: intent.shares,
                        held,
                    };
                    let outcome = OrderOutcome::failed(&intent.open_order(), reason.to_string(), Utc::now().timestamp());
                    return Poll::Closed(self.close(outcome, cancel_rx).await);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(order_id = %intent.id, error = %e, "position check failed");
                    return Poll::Unavailable;
                }
            }
        }

        let price = tokio::select! {
            res = self.quotes.price(&intent.symbol) => res,
            res = cancel_rx.changed() => {
                if res.is_err() {
                    return Poll::Closed(self.detach(&intent.open_order()).await);
                }
                return Poll::Cancelled;
            }
        };

        match price {
            Err(e) => {
                debug!(order_id = %intent.id, symbol = %intent.symbol, error = %e, "quote unavailable");
                Poll::Unavailable
            }
            Ok(price) if !intent.is_triggered_by(price) => {
                debug!(order_id = %intent.id, price = %price, limit = %intent.limit_price, "not triggered");
                Poll::Waiting
            }
            Ok(price) => Poll::Closed(self.fill(intent, price, cancel_rx).await),
        }
    }

    async fn fill(&self, intent: &OrderIntent, price: Decimal, cancel_rx: &mut watch::Receiver<bool>) -> OrderOutcome {
        let order = intent.open_order();
        let now = Utc::now().timestamp();

        match self.settle(&Settlement::fill(intent, price, now)).await {
            Ok(cash) => {
                info!(order_id = %intent.id, fill_price = %price, cash = %cash, "limit order filled");
                self.notify(&["cashUpdated", "positionUpdated"]);
                OrderOutcome::filled(&order, price, now)
            }
            Err(LedgerError::OrderClosed) => {
                info!(order_id = %intent.id, "order closed before it could fill");
                self.recorded_outcome(OrderOutcome::cancelled(&order, now)).await
            }
            Err(e) => {
                if matches!(e, LedgerError::Store(_)) {
                    error!(order_id = %intent.id, error = %e, "settlement failed");
                } else {
                    info!(order_id = %intent.id, reason = %e, "limit order rejected at fill");
                }
                self.close(OrderOutcome::failed(&order, e.to_string(), now), cancel_rx).await
            }
        }
    }

    /// Records a terminal outcome unless something else closed the order first,
    /// in which case that earlier outcome wins.
    ///
    /// Store failures are retried with backoff; the task keeps its slot until
    /// the outcome lands or the order is cancelled, whose caller owns the row.
    async fn close(&self, outcome: OrderOutcome, cancel_rx: &mut watch::Receiver<bool>) -> OrderOutcome {
        let mut backoff = ExponentialBackoff::new(self.config.poll_interval, self.config.backoff_max, BACKOFF_JITTER);

        loop {
            let err = match self.ledger.close_order(&outcome).await {
                Ok(true) => {
                    info!(order_id = %outcome.order_id, status = ?outcome.status, "limit order closed");
                    return outcome;
                }
                Ok(false) => return self.recorded_outcome(outcome).await,
                Err(e) => e,
            };

            let wait = backoff.next_delay();
            error!(
                order_id = %outcome.order_id,
                error = %err,
                attempt = backoff.attempt(),
                retry_in_ms = wait.as_millis() as u64,
                "could not record order outcome"
            );

            if *cancel_rx.borrow() {
                return self.recorded_outcome(outcome).await;
            }
            tokio::select! {
                _ = time::sleep(wait) => {}
                _ = cancel_rx.changed() => return self.recorded_outcome(outcome).await,
            }
        }
    }

    /// Stops a task whose cancel sender is gone. A newer task owns the row,
    /// so nothing is written.
    async fn detach(&self, order: &OpenOrder) -> OrderOutcome {
        warn!(order_id = %order.id, "limit order task detached");
        self.recorded_outcome(OrderOutcome::cancelled(order, Utc::now().timestamp())).await
    }

    async fn recorded_outcome(&self, fallback: OrderOutcome) -> OrderOutcome {
        match self.ledger.order_outcome(fallback.user_id, fallback.order_id).await {
            Ok(Some(recorded)) => recorded,
            _ => fallback,
        }
    }
}
