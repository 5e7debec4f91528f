use axum::{Router, routing::{get, post}};

use crate::{AppState, controllers::portfolio_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/portfolio", get(portfolio_controller::get_portfolio))
        .route("/history", get(portfolio_controller::get_history))
        .route("/cash", post(portfolio_controller::post_add_cash))
}
