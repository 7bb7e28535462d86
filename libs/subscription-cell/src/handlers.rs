// libs/subscription-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{Subscription, SubscriptionError};
use crate::services::entitlement::EntitlementTracker;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub within_days: Option<i64>,
}

fn map_subscription_error(e: SubscriptionError) -> AppError {
    match e {
        SubscriptionError::SubscriptionNotFound => {
            AppError::NotFound("Subscription not found".to_string())
        }
        SubscriptionError::SubscriptionInactive => {
            AppError::Conflict("Subscription is not active".to_string())
        }
        SubscriptionError::SubscriptionExpired => {
            AppError::Conflict("Subscription has expired".to_string())
        }
        SubscriptionError::QuotaExceeded => {
            AppError::Conflict("Appointment quota exhausted for this billing period".to_string())
        }
        SubscriptionError::UpdateContention => {
            AppError::Conflict("Subscription is being updated concurrently, retry shortly".to_string())
        }
        SubscriptionError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn authorize_subscription_access(subscription: &Subscription, user: &User) -> Result<(), AppError> {
    let is_owner = subscription.pet_parent_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_owner && !is_admin {
        return Err(AppError::Auth("Not authorized to access this subscription".to_string()));
    }

    Ok(())
}

// ==============================================================================
// SUBSCRIPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_subscription(
    State(state): State<Arc<AppConfig>>,
    Path(subscription_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let tracker = EntitlementTracker::new(&state);

    let subscription = tracker
        .get_subscription(subscription_id, token)
        .await
        .map_err(map_subscription_error)?;

    authorize_subscription_access(&subscription, &user)?;

    Ok(Json(json!({
        "success": true,
        "subscription": subscription,
        "remaining_appointments": subscription.remaining_appointments()
    })))
}

/// Pre-flight booking check: reports whether one credit could be consumed
/// right now, and why not if it could not.
#[axum::debug_handler]
pub async fn check_eligibility(
    State(state): State<Arc<AppConfig>>,
    Path(subscription_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let tracker = EntitlementTracker::new(&state);

    let subscription = tracker
        .get_subscription(subscription_id, token)
        .await
        .map_err(map_subscription_error)?;

    authorize_subscription_access(&subscription, &user)?;

    let eligibility = subscription.eligibility_at(chrono::Utc::now());

    Ok(Json(json!({
        "success": true,
        "eligibility": eligibility
    })))
}

#[axum::debug_handler]
pub async fn renew_subscription(
    State(state): State<Arc<AppConfig>>,
    Path(subscription_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let tracker = EntitlementTracker::new(&state);

    let subscription = tracker
        .get_subscription(subscription_id, token)
        .await
        .map_err(map_subscription_error)?;

    authorize_subscription_access(&subscription, &user)?;

    let renewed = tracker
        .renew_if_due(subscription_id, token)
        .await
        .map_err(map_subscription_error)?;

    Ok(Json(json!({
        "success": true,
        "subscription": renewed,
        "message": "Renewal applied if due"
    })))
}

/// Ops sweep endpoint: expires an active subscription whose grace window
/// has lapsed without renewal.
#[axum::debug_handler]
pub async fn expire_lapsed_subscription(
    State(state): State<Arc<AppConfig>>,
    Path(subscription_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Auth("Admin role required".to_string()));
    }

    let tracker = EntitlementTracker::new(&state);

    let subscription = tracker
        .mark_expired_if_lapsed(subscription_id, token)
        .await
        .map_err(map_subscription_error)?;

    Ok(Json(json!({
        "success": true,
        "subscription": subscription
    })))
}

#[axum::debug_handler]
pub async fn list_expiring_subscriptions(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<ExpiringQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Auth("Admin role required".to_string()));
    }

    let within_days = params.within_days.unwrap_or(7);
    if !(1..=90).contains(&within_days) {
        return Err(AppError::BadRequest("within_days must be between 1 and 90".to_string()));
    }

    let tracker = EntitlementTracker::new(&state);

    let subscriptions = tracker
        .list_expiring_soon(within_days, token)
        .await
        .map_err(map_subscription_error)?;

    Ok(Json(json!({
        "success": true,
        "subscriptions": subscriptions,
        "count": subscriptions.len(),
        "within_days": within_days
    })))
}
