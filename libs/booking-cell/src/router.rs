// libs/booking-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    book_appointment, cancel_booking, get_booking, list_my_bookings, list_stranded_slots,
};

pub fn booking_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(book_appointment).get(list_my_bookings))
        .route("/reconciliation/stranded", get(list_stranded_slots))
        .route("/{booking_id}", get(get_booking))
        .route("/{booking_id}/cancel", post(cancel_booking))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
