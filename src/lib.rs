//! Library entrypoint for RustFinance.
//!
//! This file exists mainly to make controller tests easy (integration tests
//! under `tests/` can import the app state, routers, controllers, services).

use std::sync::Arc;

pub mod config;
pub mod models;

// Kept at crate root so the codebase can say `crate::auth`.
#[path = "middleware/auth.rs"]
pub mod auth;

pub mod services;

pub mod controllers;
pub mod routes;

use services::{
    ledger::LedgerStore,
    order_engine::OrderEngine,
    quotes::QuoteSource,
};

#[derive(Clone)]
pub struct AppState {
    pub settings: config::Settings,
    pub ledger: Arc<dyn LedgerStore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub engine: OrderEngine,
    pub events_tx: tokio::sync::broadcast::Sender<String>,
}

impl AppState {
    pub fn new(
        settings: config::Settings,
        ledger: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Self {
        let (events_tx, _events_rx) = tokio::sync::broadcast::channel::<String>(64);
        let engine = OrderEngine::new(
            ledger.clone(),
            quotes.clone(),
            events_tx.clone(),
            settings.engine_config(),
        );

        Self {
            settings,
            ledger,
            quotes,
            engine,
            events_tx,
        }
    }

    pub fn notify(&self, events: &[&str]) {
        for ev in events {
            let _ = self.events_tx.send(ev.to_string());
        }
    }
}
