use std::collections::HashMap;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    models::{OpenOrder, OrderIntent, OrderOutcome, OrderStatus, Side},
    AppState,
};

use super::{trading_service::quote_error, FieldErrors};

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub shares: i64,
    pub limit_price: Decimal,
    pub status: OrderStatus,
    pub submitted_at: Option<i64>,
    pub fill_price: Option<Decimal>,
    pub reason: Option<String>,
    pub closed_at: Option<i64>,
}

impl From<&OpenOrder> for OrderView {
    fn from(o: &OpenOrder) -> Self {
        Self {
            id: o.id.to_hex(),
            symbol: o.symbol.clone(),
            side: o.side(),
            shares: o.signed_shares.abs(),
            limit_price: o.limit_price,
            status: OrderStatus::Open,
            submitted_at: Some(o.submitted_at),
            fill_price: None,
            reason: None,
            closed_at: None,
        }
    }
}

impl From<&OrderOutcome> for OrderView {
    fn from(o: &OrderOutcome) -> Self {
        Self {
            id: o.order_id.to_hex(),
            symbol: o.symbol.clone(),
            side: Side::from_signed(o.signed_shares),
            shares: o.signed_shares.abs(),
            limit_price: o.limit_price,
            status: o.status,
            submitted_at: None,
            fill_price: o.fill_price,
            reason: o.reason.clone(),
            closed_at: Some(o.closed_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedOrder {
    pub order: OrderView,
    pub quoted_price: Decimal,
    // cash if the order filled at the quoted price; a hint, not a promise
    pub estimated_cash_after: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrdersView {
    pub open: Vec<OrderView>,
    pub closed: Vec<OrderView>,
}

/// Validates a limit order, records it as open and hands it to the engine.
/// Returns as soon as the order is working; the fill happens in the background.
pub async fn submit_limit_order(
    state: &AppState,
    user_id: ObjectId,
    symbol: &str,
    shares: i64,
    limit_price: Option<Decimal>,
    side: Side,
) -> Result<SubmittedOrder, FieldErrors> {
    let mut errs: FieldErrors = HashMap::new();

    let sym = symbol.trim().to_uppercase();

    if sym.is_empty() {
        errs.insert("symbol".into(), "Missing symbol.".into());
    }
    if shares <= 0 {
        errs.insert("shares".into(), "Enter a valid quantity.".into());
    }
    match limit_price {
        None => {
            errs.insert("price".into(), "Enter a limit price.".into());
        }
        Some(p) if p <= Decimal::ZERO => {
            errs.insert("price".into(), "Limit price must be positive.".into());
        }
        Some(p) if shares > 0 && p.checked_mul(Decimal::from(shares)).is_none() => {
            errs.insert("shares".into(), "Order value is too large.".into());
        }
        Some(_) => {}
    }
    if !errs.is_empty() {
        return Err(errs);
    }
    let limit_price = limit_price.unwrap_or_default();

    let quote = match state.quotes.lookup(&sym).await {
        Ok(q) => q,
        Err(e) => {
            let (k, v) = quote_error(&e);
            errs.insert(k, v);
            return Err(errs);
        }
    };

    let acc = match state.ledger.get_or_create_account(user_id).await {
        Ok(a) => a,
        Err(e) => {
            errs.insert("_form".into(), format!("db error: {e}"));
            return Err(errs);
        }
    };

    let Some(slot) = state.engine.try_reserve() else {
        tracing::warn!(user_id = %user_id, symbol = %sym, "order rejected, engine at capacity");
        errs.insert("_form".into(), "Too many open orders right now. Try again shortly.".into());
        return Err(errs);
    };

    let intent = OrderIntent::new(
        user_id,
        side,
        &quote.symbol,
        shares,
        limit_price,
        quote.price,
        acc.cash,
        Utc::now().timestamp(),
    );
    let order = intent.open_order();

    if let Err(e) = state.ledger.insert_open_order(&order).await {
        errs.insert("_form".into(), format!("db error: {e}"));
        return Err(errs);
    }

    let submitted = SubmittedOrder {
        order: OrderView::from(&order),
        quoted_price: quote.price,
        estimated_cash_after: intent.snapshot_cash_after,
    };

    state.engine.spawn(intent, slot);
    state.notify(&["ordersUpdated"]);

    Ok(submitted)
}

/// Closes every open order of one user as cancelled and stops their tasks.
/// Other users' orders are untouched.
pub async fn clear_open_orders(state: &AppState, user_id: ObjectId) -> Result<usize, String> {
    let cleared = state
        .ledger
        .clear_open_orders(user_id, Utc::now().timestamp())
        .await
        .map_err(|e| e.to_string())?;

    let stopped = state.engine.cancel_user(user_id);
    tracing::info!(user_id = %user_id, cleared = cleared.len(), stopped, "open orders cleared");

    if !cleared.is_empty() {
        state.notify(&["ordersUpdated"]);
    }
    Ok(cleared.len())
}

pub async fn order_status(state: &AppState, user_id: ObjectId, order_id: ObjectId) -> Result<Option<OrderView>, String> {
    let open = state
        .ledger
        .list_open_orders(user_id)
        .await
        .map_err(|e| e.to_string())?;

    if let Some(o) = open.iter().find(|o| o.id == order_id) {
        return Ok(Some(OrderView::from(o)));
    }

    let outcome = state
        .ledger
        .order_outcome(user_id, order_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(outcome.as_ref().map(OrderView::from))
}

pub async fn list_orders(state: &AppState, user_id: ObjectId) -> Result<OrdersView, String> {
    let open = state
        .ledger
        .list_open_orders(user_id)
        .await
        .map_err(|e| e.to_string())?;
    let closed = state
        .ledger
        .list_outcomes(user_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(OrdersView {
        open: open.iter().map(OrderView::from).collect(),
        closed: closed.iter().map(OrderView::from).collect(),
    })
}
