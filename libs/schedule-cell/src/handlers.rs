// libs/schedule-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use chrono::NaiveDate;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateSlotRequest, ScheduleError, SlotStatus};
use crate::services::slots::SlotStore;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Viewer timezone for projection; defaults to the slot's own timezone
    pub timezone: Option<String>,
}

fn map_schedule_error(e: ScheduleError) -> AppError {
    match e {
        ScheduleError::SlotNotFound => AppError::NotFound("Slot not found".to_string()),
        ScheduleError::SlotUnavailable => {
            AppError::Conflict("Slot is no longer available".to_string())
        }
        ScheduleError::SlotNotBooked => AppError::Conflict("Slot is not booked".to_string()),
        ScheduleError::SlotBooked => AppError::Conflict(
            "Slot is currently booked; cancel the booking first".to_string(),
        ),
        ScheduleError::OverlapConflict => {
            AppError::Conflict("Slot overlaps an existing slot".to_string())
        }
        ScheduleError::InvalidTimezone(tz) => {
            AppError::BadRequest(format!("Unknown timezone: {}", tz))
        }
        ScheduleError::InvalidTime(msg) => AppError::BadRequest(msg),
        ScheduleError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// SLOT MANAGEMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_slot(
    State(state): State<Arc<AppConfig>>,
    Path(vet_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Only the vet themselves or an admin can publish slots
    let is_owner = vet_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_owner && !is_admin {
        return Err(AppError::Auth("Not authorized to create slots for this vet".to_string()));
    }

    let slot_store = SlotStore::new(&state);

    let slot = slot_store
        .create_slot(vet_id, request, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": slot,
        "message": "Slot created successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let slot_store = SlotStore::new(&state);

    let slot = slot_store
        .get_slot(slot_id, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": slot
    })))
}

/// Full lifecycle view of a vet's calendar, disabled slots included.
#[axum::debug_handler]
pub async fn list_vet_slots(
    State(state): State<Arc<AppConfig>>,
    Path(vet_id): Path<Uuid>,
    Query(params): Query<SlotRangeQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_owner = vet_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_owner && !is_admin {
        return Err(AppError::Auth("Not authorized to view this vet's calendar".to_string()));
    }

    let slot_store = SlotStore::new(&state);

    let slots = slot_store
        .list_slots(vet_id, params.from, params.to, params.status, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slots": slots,
        "count": slots.len()
    })))
}

/// Bookable slots for a vet, projected into the caller's timezone on request.
#[axum::debug_handler]
pub async fn list_available_slots(
    State(state): State<Arc<AppConfig>>,
    Path(vet_id): Path<Uuid>,
    Query(params): Query<AvailableSlotsQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let slot_store = SlotStore::new(&state);

    let slots = slot_store
        .list_available(
            vet_id,
            params.from,
            params.to,
            params.timezone.as_deref(),
            token,
        )
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slots": slots,
        "count": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn disable_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let slot_store = SlotStore::new(&state);

    authorize_slot_owner(&slot_store, slot_id, &user, token).await?;

    let slot = slot_store
        .disable(slot_id, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": slot,
        "message": "Slot disabled"
    })))
}

#[axum::debug_handler]
pub async fn enable_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let slot_store = SlotStore::new(&state);

    authorize_slot_owner(&slot_store, slot_id, &user, token).await?;

    let slot = slot_store
        .enable(slot_id, token)
        .await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "success": true,
        "slot": slot,
        "message": "Slot enabled"
    })))
}

async fn authorize_slot_owner(
    slot_store: &SlotStore,
    slot_id: Uuid,
    user: &User,
    token: &str,
) -> Result<(), AppError> {
    let slot = slot_store
        .get_slot(slot_id, token)
        .await
        .map_err(map_schedule_error)?;

    let is_owner = slot.vet_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_owner && !is_admin {
        return Err(AppError::Auth("Not authorized to manage this slot".to_string()));
    }

    Ok(())
}
