use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::router::booking_routes;
use schedule_cell::router::schedule_routes;
use shared_config::AppConfig;
use subscription_cell::router::subscription_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "PawCall API is running!" }))
        .nest("/slots", schedule_routes(state.clone()))
        .nest("/subscriptions", subscription_routes(state.clone()))
        .nest("/bookings", booking_routes(state.clone()))
}
