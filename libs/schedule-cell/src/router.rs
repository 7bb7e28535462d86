// libs/schedule-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{slot_id}", get(handlers::get_slot))
        .route("/{slot_id}/disable", post(handlers::disable_slot))
        .route("/{slot_id}/enable", post(handlers::enable_slot))
        .route("/vets/{vet_id}", post(handlers::create_slot))
        .route("/vets/{vet_id}", get(handlers::list_vet_slots))
        .route("/vets/{vet_id}/available", get(handlers::list_available_slots))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
