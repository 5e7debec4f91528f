#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
};
use http_body_util::BodyExt;
use mongodb::bson::oid::ObjectId;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rustfinance::{
    auth, config,
    models::{OpenOrder, OrderOutcome, TradeRecord},
    services::{
        ledger::{LedgerError, LedgerStore, MemoryLedger, Settlement},
        quotes::{Quote, QuoteError, QuoteSource},
    },
    AppState,
};
use tokio::time::{sleep, Duration, Instant};

/// Quote source fed from per-symbol scripts. Each poll pops the next entry;
/// the last entry repeats once the script runs out. `None` entries fail.
#[derive(Default)]
pub struct ScriptedQuotes {
    scripts: Mutex<HashMap<String, VecDeque<Option<Decimal>>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedQuotes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, symbol: &str, prices: &[Option<Decimal>]) {
        self.scripts
            .lock()
            .insert(symbol.to_uppercase(), prices.iter().copied().collect());
    }

    pub fn set(&self, symbol: &str, price: Decimal) {
        self.script(symbol, &[Some(price)]);
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().get(&symbol.to_uppercase()).copied().unwrap_or(0)
    }

    fn next(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        let sym = symbol.to_uppercase();
        *self.calls.lock().entry(sym.clone()).or_default() += 1;

        let mut scripts = self.scripts.lock();
        let Some(queue) = scripts.get_mut(&sym) else {
            return Err(QuoteError::NotFound(sym));
        };
        let entry = if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() };

        match entry.flatten() {
            Some(p) => Ok(p),
            None => Err(QuoteError::Status {
                status: 503,
                body: "scripted outage".into(),
            }),
        }
    }
}

#[async_trait]
impl QuoteSource for ScriptedQuotes {
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let price = self.next(symbol)?;
        Ok(Quote {
            name: format!("{} Inc.", symbol.to_uppercase()),
            price,
            symbol: symbol.to_uppercase(),
        })
    }
}

/// Wraps a ledger and makes `settle` fail with a store error while armed.
/// `close_order` fails the next `close_failures` times.
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    pub fail_settle: Mutex<bool>,
    pub close_failures: Mutex<u32>,
}

impl FlakyLedger {
    pub fn new(starting_cash: Decimal) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryLedger::new(starting_cash),
            fail_settle: Mutex::new(true),
            close_failures: Mutex::new(0),
        })
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn ping(&self) -> Result<(), LedgerError> {
        self.inner.ping().await
    }
    async fn get_or_create_account(&self, user_id: ObjectId) -> Result<rustfinance::models::Account, LedgerError> {
        self.inner.get_or_create_account(user_id).await
    }
    async fn deposit(&self, user_id: ObjectId, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.inner.deposit(user_id, amount).await
    }
    async fn list_trades(&self, user_id: ObjectId) -> Result<Vec<TradeRecord>, LedgerError> {
        self.inner.list_trades(user_id).await
    }
    async fn net_position(&self, user_id: ObjectId, symbol: &str) -> Result<i64, LedgerError> {
        self.inner.net_position(user_id, symbol).await
    }
    async fn insert_open_order(&self, order: &OpenOrder) -> Result<(), LedgerError> {
        self.inner.insert_open_order(order).await
    }
    async fn list_open_orders(&self, user_id: ObjectId) -> Result<Vec<OpenOrder>, LedgerError> {
        self.inner.list_open_orders(user_id).await
    }
    async fn list_all_open_orders(&self) -> Result<Vec<OpenOrder>, LedgerError> {
        self.inner.list_all_open_orders().await
    }
    async fn settle(&self, settlement: &Settlement) -> Result<Decimal, LedgerError> {
        if *self.fail_settle.lock() {
            return Err(LedgerError::Store("connection reset".into()));
        }
        self.inner.settle(settlement).await
    }
    async fn close_order(&self, outcome: &OrderOutcome) -> Result<bool, LedgerError> {
        {
            let mut left = self.close_failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(LedgerError::Store("write conflict".into()));
            }
        }
        self.inner.close_order(outcome).await
    }
    async fn clear_open_orders(&self, user_id: ObjectId, closed_at: i64) -> Result<Vec<OpenOrder>, LedgerError> {
        self.inner.clear_open_orders(user_id, closed_at).await
    }
    async fn order_outcome(&self, user_id: ObjectId, order_id: ObjectId) -> Result<Option<OrderOutcome>, LedgerError> {
        self.inner.order_outcome(user_id, order_id).await
    }
    async fn list_outcomes(&self, user_id: ObjectId) -> Result<Vec<OrderOutcome>, LedgerError> {
        self.inner.list_outcomes(user_id).await
    }
}

pub fn test_settings() -> config::Settings {
    let mut settings = config::load();
    settings.finnhub_api_key = String::new();
    settings.jwt_secret = "test-secret".to_string();
    settings.ledger_backend = config::LedgerBackend::Memory;
    settings.starting_cash = Decimal::new(10_000, 0);
    settings.order_poll_interval_ms = 5;
    settings.order_backoff_max_ms = 20;
    settings.order_max_lifetime_secs = 3_600;
    settings.engine_max_orders = 16;
    settings
}

pub fn state_with(settings: config::Settings, ledger: Arc<dyn LedgerStore>, quotes: Arc<dyn QuoteSource>) -> AppState {
    AppState::new(settings, ledger, quotes)
}

pub fn test_state(quotes: Arc<ScriptedQuotes>) -> AppState {
    let settings = test_settings();
    let ledger = Arc::new(MemoryLedger::new(settings.starting_cash));
    state_with(settings, ledger, quotes)
}

pub fn bearer(state: &AppState, user_id: ObjectId) -> String {
    let token = auth::make_jwt_with_days(&state.settings, &user_id, Some("student"), 1).unwrap();
    format!("Bearer {token}")
}

pub fn form_post(uri: &str, auth_header: Option<&str>, body: &str) -> Request<Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(a) = auth_header {
        b = b.header(header::AUTHORIZATION, a);
    }
    b.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, auth_header: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(a) = auth_header {
        b = b.header(header::AUTHORIZATION, a);
    }
    b.body(Body::empty()).unwrap()
}

pub async fn body_json(res: Response) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Polls until `check` holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}
