use std::collections::HashMap;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::AppState;

use super::{
    account_service,
    ledger::{LedgerError, Settlement},
    quotes::QuoteError,
    FieldErrors,
};

#[derive(Debug, Clone, Serialize)]
pub struct BuyResult {
    pub symbol: String,
    pub qty: i64,
    pub fill_price: Decimal,
    pub cost: Decimal,
    pub new_cash: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellResult {
    pub symbol: String,
    pub qty: i64,
    pub fill_price: Decimal,
    pub proceeds: Decimal,
    pub new_cash: Decimal,
    pub remaining: i64,
}

fn validate(symbol: &str, qty: i64) -> Result<String, FieldErrors> {
    let mut errs: FieldErrors = HashMap::new();

    let sym = symbol.trim().to_uppercase();

    if sym.is_empty() {
        errs.insert("symbol".into(), "Missing symbol.".into());
    }
    if qty <= 0 {
        errs.insert("shares".into(), "Enter a valid quantity.".into());
    }
    if !errs.is_empty() {
        return Err(errs);
    }
    Ok(sym)
}

pub(crate) fn quote_error(e: &QuoteError) -> (String, String) {
    match e {
        QuoteError::NotFound(_) => ("symbol".into(), "Unknown symbol.".into()),
        other => ("_form".into(), format!("Quote error: {other}")),
    }
}

fn ledger_error(e: LedgerError) -> FieldErrors {
    let mut errs: FieldErrors = HashMap::new();
    match e {
        LedgerError::InsufficientCash { .. } => {
            errs.insert("balance".into(), "Not enough cash.".into());
        }
        LedgerError::InsufficientHoldings { .. } => {
            errs.insert("shares".into(), "You don't have that many shares.".into());
        }
        LedgerError::AmountOutOfRange => {
            errs.insert("shares".into(), "Order value is too large.".into());
        }
        other => {
            errs.insert("_form".into(), format!("db error: {other}"));
        }
    }
    errs
}

pub async fn market_buy(state: &AppState, user_id: ObjectId, symbol: &str, qty: i64) -> Result<BuyResult, FieldErrors> {
    let sym = validate(symbol, qty)?;
    let mut errs: FieldErrors = HashMap::new();

    let price = match state.quotes.price(&sym).await {
        Ok(p) => p,
        Err(e) => {
            let (k, v) = quote_error(&e);
            errs.insert(k, v);
            return Err(errs);
        }
    };

    let settlement = Settlement::market(user_id, &sym, qty, price, Utc::now().timestamp());
    let total = settlement.notional().map_err(ledger_error)?;

    let acc = match account_service::get_or_create_account(state, user_id).await {
        Ok(a) => a,
        Err(e) => {
            errs.insert("_form".into(), format!("db error: {e}"));
            return Err(errs);
        }
    };

    // fast path; the ledger re-checks atomically
    if acc.cash < total {
        errs.insert("balance".into(), "Not enough cash.".into());
        return Err(errs);
    }

    let new_cash = state.engine.settle(&settlement).await.map_err(ledger_error)?;

    tracing::info!(user_id = %user_id, symbol = %sym, qty, price = %price, "market buy");

    // broadcast so other tabs/pages update
    state.notify(&["ordersUpdated", "positionUpdated", "cashUpdated"]);

    Ok(BuyResult {
        symbol: sym,
        qty,
        fill_price: price,
        cost: total,
        new_cash,
    })
}

pub async fn market_sell(state: &AppState, user_id: ObjectId, symbol: &str, qty: i64) -> Result<SellResult, FieldErrors> {
    let sym = validate(symbol, qty)?;
    let mut errs: FieldErrors = HashMap::new();

    let held = match state.ledger.net_position(user_id, &sym).await {
        Ok(h) => h,
        Err(e) => {
            errs.insert("_form".into(), format!("db error: {e}"));
            return Err(errs);
        }
    };

    if held <= 0 {
        errs.insert("shares".into(), "You have no position to sell.".into());
        return Err(errs);
    }
    if qty > held {
        errs.insert("shares".into(), "You don't have that many shares.".into());
        return Err(errs);
    }

    let price = match state.quotes.price(&sym).await {
        Ok(p) => p,
        Err(e) => {
            let (k, v) = quote_error(&e);
            errs.insert(k, v);
            return Err(errs);
        }
    };

    let settlement = Settlement::market(user_id, &sym, -qty, price, Utc::now().timestamp());
    let proceeds = settlement.notional().map_err(ledger_error)?;
    let new_cash = state.engine.settle(&settlement).await.map_err(ledger_error)?;

    tracing::info!(user_id = %user_id, symbol = %sym, qty, price = %price, "market sell");

    state.notify(&["ordersUpdated", "positionUpdated", "cashUpdated"]);

    Ok(SellResult {
        symbol: sym,
        qty,
        fill_price: price,
        proceeds,
        new_cash,
        remaining: held - qty,
    })
}
