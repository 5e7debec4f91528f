use axum::{
    extract::{Extension, Form, Path, State},
    response::Response,
};
use serde::Deserialize;

use crate::{models::CurrentUser, services::trading_service, AppState};

#[derive(Deserialize)]
pub struct TradeForm {
    pub shares: String,
}

fn parse_shares(form: &TradeForm) -> Result<i64, Response> {
    form.shares
        .trim()
        .parse::<i64>()
        .map_err(|_| super::field_error("shares", "Enter a valid quantity."))
}

// POST /trade/:symbol/buy
pub async fn post_trade_buy(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    user: Option<Extension<CurrentUser>>,
    Form(form): Form<TradeForm>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    let shares = match parse_shares(&form) {
        Ok(s) => s,
        Err(res) => return res,
    };

    match trading_service::market_buy(&state, u.id, &symbol, shares).await {
        Ok(result) => super::ok_with_events(result, &["cashUpdated", "positionUpdated", "ordersUpdated"]),
        Err(errs) => super::validation_failed(errs),
    }
}

// POST /trade/:symbol/sell
pub async fn post_trade_sell(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    user: Option<Extension<CurrentUser>>,
    Form(form): Form<TradeForm>,
) -> Response {
    let Some(Extension(u)) = user else {
        return super::unauthorized();
    };

    let shares = match parse_shares(&form) {
        Ok(s) => s,
        Err(res) => return res,
    };

    match trading_service::market_sell(&state, u.id, &symbol, shares).await {
        Ok(result) => super::ok_with_events(result, &["cashUpdated", "positionUpdated", "ordersUpdated"]),
        Err(errs) => super::validation_failed(errs),
    }
}
