use axum::{
    extract::{Extension, Form, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::{
    models::CurrentUser,
    services::{account_service, portfolio_service},
    AppState,
};

// GET /portfolio
pub async fn get_portfolio(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    match portfolio_service::portfolio_view(&state, u.id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => super::server_error(e),
    }
}

// GET /history
pub async fn get_history(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    match portfolio_service::history_views(&state, u.id).await {
        Ok(items) => (StatusCode::OK, Json(json!({ "items": items }))).into_response(),
        Err(e) => super::server_error(e),
    }
}

#[derive(Deserialize)]
pub struct CashForm {
    pub amount: String,
}

// POST /cash
pub async fn post_add_cash(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Form(form): Form<CashForm>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    let Ok(amount) = form.amount.trim().parse::<Decimal>() else {
        return super::field_error("amount", "Enter a positive amount.");
    };

    match account_service::add_cash(&state, u.id, amount).await {
        Ok(cash) => super::ok_with_events(json!({ "cash": cash }), &["cashUpdated"]),
        Err(errs) if errs.contains_key("amount") => super::validation_failed(errs),
        Err(errs) => super::server_error(errs.get("_form").cloned().unwrap_or_default()),
    }
}
