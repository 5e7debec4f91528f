mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use mongodb::bson::oid::ObjectId;
use rust_decimal_macros::dec;
use rustfinance::{routes, services::ledger::MemoryLedger};
use tower::ServiceExt;

use common::{bearer, body_json, eventually, form_post, get, state_with, test_settings, test_state, ScriptedQuotes};

#[tokio::test]
async fn orders_require_a_user() {
    let state = test_state(ScriptedQuotes::new());
    let app = routes::app(state);

    let res = app.clone().oneshot(get("/orders", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .oneshot(form_post("/orders", Some("Bearer not-a-token"), "symbol=AAPL&shares=1&price=1"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let state = test_state(ScriptedQuotes::new());
    let app = routes::app(state);

    let res = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.oneshot(get("/health/db", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["store"], "ok");
}

#[tokio::test]
async fn malformed_form_returns_field_errors() {
    let state = test_state(ScriptedQuotes::new());
    let auth = bearer(&state, ObjectId::new());
    let app = routes::app(state);

    let res = app
        .oneshot(form_post("/orders", Some(&auth), "symbol=AAPL&shares=ten&price=abc&side=hold"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(res).await;
    assert_eq!(body["errors"]["shares"], "Enter a valid quantity.");
    assert_eq!(body["errors"]["price"], "Enter a valid price.");
    assert!(body["errors"]["side"].is_string());
}

#[tokio::test]
async fn non_positive_values_are_rejected_before_any_lookup() {
    let quotes = ScriptedQuotes::new();
    quotes.set("AAPL", dec!(100));
    let state = test_state(quotes.clone());
    let auth = bearer(&state, ObjectId::new());
    let app = routes::app(state);

    let res = app
        .oneshot(form_post("/orders", Some(&auth), "symbol=AAPL&shares=0&price=-1"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(res).await;
    assert!(body["errors"]["shares"].is_string());
    assert_eq!(body["errors"]["price"], "Limit price must be positive.");
    assert_eq!(quotes.calls("AAPL"), 0);
}

#[tokio::test]
async fn limit_order_past_decimal_range_is_refused() {
    let quotes = ScriptedQuotes::new();
    quotes.set("AAPL", dec!(100));
    let state = test_state(quotes.clone());
    let user = ObjectId::new();
    let auth = bearer(&state, user);
    let app = routes::app(state.clone());

    let res = app
        .oneshot(form_post(
            "/orders",
            Some(&auth),
            "symbol=AAPL&shares=9223372036854775807&price=79228162514264337593543950335",
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["errors"]["shares"], "Order value is too large.");
    assert!(state.ledger.list_open_orders(user).await.unwrap().is_empty());
    assert_eq!(quotes.calls("AAPL"), 0);
}

#[tokio::test]
async fn unknown_symbol_is_reported_on_the_symbol_field() {
    let state = test_state(ScriptedQuotes::new());
    let auth = bearer(&state, ObjectId::new());
    let app = routes::app(state);

    let res = app
        .oneshot(form_post("/orders", Some(&auth), "symbol=ZZZZ&shares=1&price=10"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["errors"]["symbol"], "Unknown symbol.");
}

#[tokio::test]
async fn submitted_order_fills_in_the_background() {
    let quotes = ScriptedQuotes::new();
    // one quote for intake, then the engine's polls
    quotes.script("AAPL", &[Some(dec!(105)), Some(dec!(103)), Some(dec!(99))]);
    let state = test_state(quotes);
    let user = ObjectId::new();
    let auth = bearer(&state, user);
    let app = routes::app(state.clone());

    let res = app
        .clone()
        .oneshot(form_post("/orders", Some(&auth), "symbol=aapl&shares=10&price=100&side=buy"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("HX-Trigger").is_some());

    let body = body_json(res).await;
    assert_eq!(body["order"]["status"], "open");
    assert_eq!(body["order"]["symbol"], "AAPL");
    assert_eq!(body["estimated_cash_after"], "8950");
    let id = body["order"]["id"].as_str().unwrap().to_string();

    let ledger = state.ledger.clone();
    assert!(
        eventually(|| {
            let ledger = ledger.clone();
            async move { ledger.list_open_orders(user).await.unwrap().is_empty() }
        })
        .await
    );

    let res = app.clone().oneshot(get(&format!("/orders/{id}"), Some(&auth))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "filled");
    assert_eq!(body["fill_price"], "99");

    let res = app.oneshot(get("/portfolio", Some(&auth))).await.unwrap();
    let body = body_json(res).await;
    assert_eq!(body["cash"], "9010");
    assert_eq!(body["holdings"][0]["shares"], 10);
}

#[tokio::test]
async fn order_status_is_scoped_to_its_owner() {
    let quotes = ScriptedQuotes::new();
    quotes.set("AAPL", dec!(150));
    let state = test_state(quotes);
    let owner = bearer(&state, ObjectId::new());
    let other = bearer(&state, ObjectId::new());
    let app = routes::app(state);

    let res = app
        .clone()
        .oneshot(form_post("/orders", Some(&owner), "symbol=AAPL&shares=1&price=100"))
        .await
        .unwrap();
    let id = body_json(res).await["order"]["id"].as_str().unwrap().to_string();

    let res = app.clone().oneshot(get(&format!("/orders/{id}"), Some(&other))).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.clone().oneshot(get("/orders/not-an-id", Some(&owner))).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.oneshot(form_post("/logout", Some(&owner), "")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_clears_only_the_acting_users_orders() {
    let quotes = ScriptedQuotes::new();
    quotes.set("AAPL", dec!(150));
    let state = test_state(quotes);
    let alice = ObjectId::new();
    let bob = ObjectId::new();
    let alice_auth = bearer(&state, alice);
    let bob_auth = bearer(&state, bob);
    let app = routes::app(state.clone());

    for auth in [&alice_auth, &alice_auth, &bob_auth] {
        let res = app
            .clone()
            .oneshot(form_post("/orders", Some(auth), "symbol=AAPL&shares=1&price=100"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = app.clone().oneshot(form_post("/logout", Some(&alice_auth), "")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["cleared"], 2);

    let res = app.clone().oneshot(get("/orders", Some(&alice_auth))).await.unwrap();
    let body = body_json(res).await;
    assert_eq!(body["open"].as_array().unwrap().len(), 0);
    let closed = body["closed"].as_array().unwrap();
    assert_eq!(closed.len(), 2);
    assert!(closed.iter().all(|o| o["status"] == "cancelled"));

    let res = app.clone().oneshot(get("/orders", Some(&bob_auth))).await.unwrap();
    let body = body_json(res).await;
    assert_eq!(body["open"].as_array().unwrap().len(), 1);
    assert_eq!(state.engine.running(), 1);

    app.oneshot(form_post("/logout", Some(&bob_auth), "")).await.unwrap();
}

#[tokio::test]
async fn intake_rejects_when_engine_is_full() {
    let quotes = ScriptedQuotes::new();
    quotes.set("AAPL", dec!(150));
    let mut settings = test_settings();
    settings.engine_max_orders = 1;
    let ledger = Arc::new(MemoryLedger::new(settings.starting_cash));
    let state = state_with(settings, ledger, quotes);
    let user = ObjectId::new();
    let auth = bearer(&state, user);
    let app = routes::app(state.clone());

    let first = app
        .clone()
        .oneshot(form_post("/orders", Some(&auth), "symbol=AAPL&shares=1&price=100"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(form_post("/orders", Some(&auth), "symbol=AAPL&shares=1&price=100"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_json(second).await["errors"]["_form"].is_string());

    // the rejected order was never persisted
    assert_eq!(state.ledger.list_open_orders(user).await.unwrap().len(), 1);

    app.oneshot(form_post("/logout", Some(&auth), "")).await.unwrap();
}
