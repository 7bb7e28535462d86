// libs/subscription-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    check_eligibility, expire_lapsed_subscription, get_subscription,
    list_expiring_subscriptions, renew_subscription,
};

pub fn subscription_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/expiring", get(list_expiring_subscriptions))
        .route("/{subscription_id}", get(get_subscription))
        .route("/{subscription_id}/eligibility", get(check_eligibility))
        .route("/{subscription_id}/renew", post(renew_subscription))
        .route("/{subscription_id}/expire", post(expire_lapsed_subscription))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
