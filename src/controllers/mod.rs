use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::services::FieldErrors;

pub mod home_controller;
pub mod orders_controller;
pub mod portfolio_controller;
pub mod realtime_controller;
pub mod stocks_controller;
pub mod trading_controller;

fn hx_trigger_value(events: &[&str]) -> HeaderValue {
    // HX-Trigger expects JSON: {"evt":true,...}
    let mut s = String::from("{");
    for (i, ev) in events.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push('"');
        s.push_str(ev);
        s.push_str("\":true");
    }
    s.push('}');
    HeaderValue::from_str(&s).unwrap_or_else(|_| HeaderValue::from_static("{}"))
}

/// 200 with a JSON body, plus an HX-Trigger header naming what changed so
/// htmx pages can refresh the affected panels.
pub(crate) fn ok_with_events<T: Serialize>(body: T, events: &[&str]) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("HX-Trigger", hx_trigger_value(events));
    (StatusCode::OK, headers, Json(body)).into_response()
}

pub(crate) fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

pub(crate) fn validation_failed(errs: FieldErrors) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "errors": errs }))).into_response()
}

pub(crate) fn field_error(field: &str, msg: &str) -> Response {
    let mut errs = FieldErrors::new();
    errs.insert(field.to_string(), msg.to_string());
    validation_failed(errs)
}

pub(crate) fn server_error(msg: impl std::fmt::Display) -> Response {
    tracing::error!(error = %msg, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("db error: {msg}") })),
    )
        .into_response()
}

pub(crate) fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{what} not found") }))).into_response()
}
