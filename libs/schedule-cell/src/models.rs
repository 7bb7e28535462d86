// libs/schedule-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

// ==============================================================================
// CORE SLOT MODELS
// ==============================================================================

/// A bookable window of a vet's calendar, anchored to the wall clock of the
/// vet's own timezone. The (vet_id, slot_date, timezone) triple scopes both
/// uniqueness and overlap checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub vet_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub timezone: String,
    pub status: SlotStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
    Disabled,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Disabled => write!(f, "disabled"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlotRequest {
    pub slot_date: NaiveDate,
    /// Wall-clock "HH:mm" in `timezone`
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
    pub notes: Option<String>,
}

/// A slot projected into a viewer's timezone. `slot_date` and the times are
/// the converted wall clock; `timezone` names the zone they are expressed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizedSlot {
    pub slot_id: Uuid,
    pub vet_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub timezone: String,
    pub status: SlotStatus,
}

impl From<Slot> for LocalizedSlot {
    fn from(slot: Slot) -> Self {
        Self {
            slot_id: slot.id,
            vet_id: slot.vet_id,
            slot_date: slot.slot_date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            timezone: slot.timezone,
            status: slot.status,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ScheduleError {
    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot is not available")]
    SlotUnavailable,

    #[error("Slot is not booked")]
    SlotNotBooked,

    #[error("Slot is currently booked")]
    SlotBooked,

    #[error("Slot overlaps an existing slot for this vet")]
    OverlapConflict,

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
