// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use subscription_cell::services::entitlement::EntitlementTracker;

use crate::models::{BookRequest, Booking, BookingError, CancelRequest};
use crate::services::coordinator::BookingCoordinator;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct StrandedQuery {
    pub older_than_minutes: Option<i64>,
}

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::BookingNotFound => AppError::NotFound("Booking not found".to_string()),
        BookingError::AlreadyCancelled => {
            AppError::Conflict("Booking is already cancelled".to_string())
        }
        BookingError::SlotNotFound => AppError::NotFound("Slot not found".to_string()),
        BookingError::SlotUnavailable => {
            AppError::Conflict("Slot is no longer available".to_string())
        }
        BookingError::SubscriptionNotFound => {
            AppError::NotFound("Subscription not found".to_string())
        }
        BookingError::SubscriptionInactive => {
            AppError::Conflict("Subscription is not active".to_string())
        }
        BookingError::SubscriptionExpired => {
            AppError::Conflict("Subscription has expired".to_string())
        }
        BookingError::QuotaExceeded => {
            AppError::Conflict("Appointment quota exhausted for this billing period".to_string())
        }
        BookingError::UpdateContention => {
            AppError::Conflict("Booking stores are busy, retry shortly".to_string())
        }
        BookingError::CompensationFailed { detail } => {
            AppError::Internal(format!("Booking needs manual attention: {}", detail))
        }
        BookingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn parse_user_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid user id in token".to_string()))
}

fn authorize_booking_access(booking: &Booking, user: &User) -> Result<(), AppError> {
    let is_pet_parent = booking.pet_parent_id.to_string() == user.id;
    let is_vet = booking.vet_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_pet_parent && !is_vet && !is_admin {
        return Err(AppError::Auth("Not authorized to access this booking".to_string()));
    }

    Ok(())
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // The credit being spent has to belong to the caller
    let tracker = EntitlementTracker::new(&state);
    let subscription = tracker
        .get_subscription(request.subscription_id, token)
        .await
        .map_err(|e| map_booking_error(e.into()))?;

    let is_owner = subscription.pet_parent_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");
    if !is_owner && !is_admin {
        return Err(AppError::Auth("Not authorized to book on this subscription".to_string()));
    }

    let coordinator = BookingCoordinator::new(&state);

    let booking = coordinator
        .book(subscription.pet_parent_id, &request, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": booking,
        "message": "Appointment booked"
    })))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let coordinator = BookingCoordinator::new(&state);

    let booking = coordinator
        .get_booking(booking_id, token)
        .await
        .map_err(map_booking_error)?;
    authorize_booking_access(&booking, &user)?;

    if let Some(reason) = request.reason.as_deref() {
        info!("Cancelling booking {}: {}", booking_id, reason);
    }

    let cancelled = coordinator
        .cancel(booking_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "booking": cancelled,
        "message": "Booking cancelled, slot released and credit refunded"
    })))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<Arc<AppConfig>>,
    Path(booking_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let coordinator = BookingCoordinator::new(&state);

    let booking = coordinator
        .get_booking(booking_id, token)
        .await
        .map_err(map_booking_error)?;
    authorize_booking_access(&booking, &user)?;

    Ok(Json(json!({
        "success": true,
        "booking": booking
    })))
}

/// The caller's own bookings, newest first.
#[axum::debug_handler]
pub async fn list_my_bookings(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let pet_parent_id = parse_user_id(&user)?;
    let coordinator = BookingCoordinator::new(&state);

    let bookings = coordinator
        .list_for_pet_parent(pet_parent_id, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "bookings": bookings,
        "count": bookings.len()
    })))
}

/// Ops report of booked slots no live booking references.
#[axum::debug_handler]
pub async fn list_stranded_slots(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<StrandedQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Auth("Admin role required".to_string()));
    }

    let older_than_minutes = params.older_than_minutes.unwrap_or(30);
    if !(1..=10_080).contains(&older_than_minutes) {
        return Err(AppError::BadRequest(
            "older_than_minutes must be between 1 and 10080".to_string(),
        ));
    }

    let coordinator = BookingCoordinator::new(&state);

    let stranded = coordinator
        .list_stranded_slots(older_than_minutes, token)
        .await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "success": true,
        "stranded": stranded,
        "count": stranded.len(),
        "older_than_minutes": older_than_minutes
    })))
}
