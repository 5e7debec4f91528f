use axum::{Router, routing::{get, post}};

use crate::{AppState, controllers::orders_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/orders", get(orders_controller::get_orders).post(orders_controller::post_limit_order))
        .route("/orders/:id", get(orders_controller::get_order))
        .route("/logout", post(orders_controller::post_logout))
}
