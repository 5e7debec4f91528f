use std::{env, str::FromStr, time::Duration};

use rust_decimal::Decimal;

use crate::services::order_engine::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Mongo,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown ledger backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub host: String,
    pub port: u16,

    pub jwt_secret: String,
    pub jwt_cookie_name: String,

    pub finnhub_api_key: String,
    pub ledger_backend: LedgerBackend,
    pub starting_cash: Decimal,

    // limit order engine
    pub order_poll_interval_ms: u64,
    pub order_backoff_max_ms: u64,
    pub order_max_lifetime_secs: u64,
    pub engine_max_orders: usize,
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(self.order_poll_interval_ms.max(1)),
            backoff_max: Duration::from_millis(self.order_backoff_max_ms.max(self.order_poll_interval_ms)),
            max_lifetime: Duration::from_secs(self.order_max_lifetime_secs),
            max_orders: self.engine_max_orders.max(1),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let mongodb_uri = env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

    let mongodb_db = env::var("MONGODB_DB")
        .unwrap_or_else(|_| "rustfinance".to_string());

    let host = env::var("HOST")
        .unwrap_or_else(|_| "127.0.0.1".to_string());

    let port = parse_or("PORT", 3000u16);

    let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "change-me-dev-secret".to_string());
    let jwt_cookie_name = env::var("JWT_COOKIE_NAME").unwrap_or_else(|_| "auth".to_string());

    let finnhub_api_key = env::var("FINNHUB_API_KEY").unwrap_or_default();

    let ledger_backend = parse_or("LEDGER_BACKEND", LedgerBackend::Mongo);
    let starting_cash = parse_or("STARTING_CASH", Decimal::new(10_000, 0));

    Settings {
        mongodb_uri,
        mongodb_db,
        host,
        port,
        jwt_secret,
        jwt_cookie_name,
        finnhub_api_key,
        ledger_backend,
        starting_cash,
        order_poll_interval_ms: parse_or("ORDER_POLL_INTERVAL_MS", 2_000),
        order_backoff_max_ms: parse_or("ORDER_BACKOFF_MAX_MS", 60_000),
        order_max_lifetime_secs: parse_or("ORDER_MAX_LIFETIME_SECS", 86_400),
        engine_max_orders: parse_or("ENGINE_MAX_ORDERS", 256),
    }
}
