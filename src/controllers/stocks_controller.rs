use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::{services::trading_service::quote_error, AppState};

// GET /quote/:symbol
pub async fn get_quote(State(state): State<AppState>, Path(symbol): Path<String>) -> Response {
    let sym = symbol.trim().to_uppercase();
    if sym.is_empty() {
        return super::field_error("symbol", "Missing symbol.");
    }

    match state.quotes.lookup(&sym).await {
        Ok(q) => (StatusCode::OK, Json(q)).into_response(),
        Err(e) => {
            tracing::debug!(symbol = %sym, error = %e, "quote lookup failed");
            let (k, v) = quote_error(&e);
            super::field_error(&k, &v)
        }
    }
}
