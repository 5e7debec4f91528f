use axum::{
    extract::{Extension, Form, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::{
    models::{CurrentUser, Side},
    services::{order_intake, FieldErrors},
    AppState,
};

#[derive(Deserialize)]
pub struct LimitOrderForm {
    pub symbol: String,
    pub shares: String,
    pub price: String,
    #[serde(default)]
    pub side: Option<String>,
}

struct ParsedForm {
    symbol: String,
    shares: i64,
    price: Option<Decimal>,
    side: Side,
}

// shape errors only; range checks happen in order_intake
fn parse_form(form: &LimitOrderForm) -> Result<ParsedForm, FieldErrors> {
    let mut errs = FieldErrors::new();

    let shares = form.shares.trim().parse::<i64>().unwrap_or_else(|_| {
        errs.insert("shares".into(), "Enter a valid quantity.".into());
        0
    });

    let price = match form.price.trim() {
        "" => None,
        raw => match raw.parse::<Decimal>() {
            Ok(p) => Some(p),
            Err(_) => {
                errs.insert("price".into(), "Enter a valid price.".into());
                None
            }
        },
    };

    let side = match form.side.as_deref().map(str::trim) {
        None | Some("") => Side::Buy,
        Some(raw) => raw.parse::<Side>().unwrap_or_else(|_| {
            errs.insert("side".into(), "Side must be buy or sell.".into());
            Side::Buy
        }),
    };

    if !errs.is_empty() {
        return Err(errs);
    }

    Ok(ParsedForm {
        symbol: form.symbol.clone(),
        shares,
        price,
        side,
    })
}

// POST /orders
pub async fn post_limit_order(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
    Form(form): Form<LimitOrderForm>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    let parsed = match parse_form(&form) {
        Ok(p) => p,
        Err(errs) => return super::validation_failed(errs),
    };

    match order_intake::submit_limit_order(&state, u.id, &parsed.symbol, parsed.shares, parsed.price, parsed.side)
        .await
    {
        Ok(submitted) => super::ok_with_events(submitted, &["ordersUpdated"]),
        Err(errs) => super::validation_failed(errs),
    }
}

// GET /orders
pub async fn get_orders(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    match order_intake::list_orders(&state, u.id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => super::server_error(e),
    }
}

// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    let Ok(order_id) = ObjectId::parse_str(id.trim()) else {
        return super::not_found("order");
    };

    match order_intake::order_status(&state, u.id, order_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => super::not_found("order"),
        Err(e) => super::server_error(e),
    }
}

// POST /logout
pub async fn post_logout(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    match order_intake::clear_open_orders(&state, u.id).await {
        Ok(cleared) => super::ok_with_events(json!({ "cleared": cleared }), &["ordersUpdated"]),
        Err(e) => super::server_error(e),
    }
}
