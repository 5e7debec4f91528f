use std::collections::HashMap;

pub mod backoff;
pub mod db_init;
pub mod finnhub;
pub mod ledger;
pub mod quotes;

pub mod account_service;
pub mod order_engine;
pub mod order_intake;
pub mod portfolio_service;
pub mod trading_service;

/// Per-field validation messages, keyed by form field (`_form` for the whole form).
pub type FieldErrors = HashMap<String, String>;
