// libs/booking-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

use schedule_cell::models::{ScheduleError, Slot};
use subscription_cell::models::{IneligibleReason, SubscriptionError};

// ==============================================================================
// CORE BOOKING MODELS
// ==============================================================================

/// A committed appointment: one subscription credit spent on one slot.
/// Cancellation keeps the row and flips `cancelled`, so the audit trail
/// survives the compensating release and refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub slot_id: Uuid,
    pub vet_id: Uuid,
    pub pet_parent_id: Uuid,
    pub booked_at: DateTime<Utc>,
    pub cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a booking attempt currently stands. Logged at each transition so a
/// half-finished attempt can be traced from the request id alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BookingAttemptState {
    Requested,
    EligibilityChecked,
    SlotReserved,
    CreditConsumed,
    Committed,
    Aborted,
}

impl fmt::Display for BookingAttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingAttemptState::Requested => write!(f, "requested"),
            BookingAttemptState::EligibilityChecked => write!(f, "eligibility_checked"),
            BookingAttemptState::SlotReserved => write!(f, "slot_reserved"),
            BookingAttemptState::CreditConsumed => write!(f, "credit_consumed"),
            BookingAttemptState::Committed => write!(f, "committed"),
            BookingAttemptState::Aborted => write!(f, "aborted"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRequest {
    pub subscription_id: Uuid,
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Free-form reason, logged but not persisted
    pub reason: Option<String>,
}

/// A booked slot with no live booking pointing at it. Produced by the
/// reconciliation sweep after a compensating release could not be delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandedSlot {
    pub slot_id: Uuid,
    pub vet_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub timezone: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Slot> for StrandedSlot {
    fn from(slot: Slot) -> Self {
        Self {
            slot_id: slot.id,
            vet_id: slot.vet_id,
            slot_date: slot.slot_date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            timezone: slot.timezone,
            updated_at: slot.updated_at,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found")]
    BookingNotFound,

    #[error("Booking is already cancelled")]
    AlreadyCancelled,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot is not available")]
    SlotUnavailable,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Subscription is not active")]
    SubscriptionInactive,

    #[error("Subscription has expired")]
    SubscriptionExpired,

    #[error("Appointment quota exhausted for this billing period")]
    QuotaExceeded,

    #[error("Booking store busy, retry shortly")]
    UpdateContention,

    #[error("Compensation failed: {detail}")]
    CompensationFailed { detail: String },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<ScheduleError> for BookingError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::SlotNotFound => BookingError::SlotNotFound,
            ScheduleError::SlotUnavailable | ScheduleError::SlotBooked => {
                BookingError::SlotUnavailable
            }
            other => BookingError::DatabaseError(other.to_string()),
        }
    }
}

impl From<SubscriptionError> for BookingError {
    fn from(e: SubscriptionError) -> Self {
        match e {
            SubscriptionError::SubscriptionNotFound => BookingError::SubscriptionNotFound,
            SubscriptionError::SubscriptionInactive => BookingError::SubscriptionInactive,
            SubscriptionError::SubscriptionExpired => BookingError::SubscriptionExpired,
            SubscriptionError::QuotaExceeded => BookingError::QuotaExceeded,
            SubscriptionError::UpdateContention => BookingError::UpdateContention,
            SubscriptionError::DatabaseError(msg) => BookingError::DatabaseError(msg),
        }
    }
}

impl From<IneligibleReason> for BookingError {
    fn from(reason: IneligibleReason) -> Self {
        match reason {
            IneligibleReason::QuotaExceeded => BookingError::QuotaExceeded,
            IneligibleReason::SubscriptionInactive => BookingError::SubscriptionInactive,
            IneligibleReason::SubscriptionExpired => BookingError::SubscriptionExpired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_errors_map_to_booking_errors() {
        assert!(matches!(
            BookingError::from(ScheduleError::SlotUnavailable),
            BookingError::SlotUnavailable
        ));
        assert!(matches!(
            BookingError::from(ScheduleError::SlotNotFound),
            BookingError::SlotNotFound
        ));
    }

    #[test]
    fn test_ineligible_reasons_map_to_booking_errors() {
        assert!(matches!(
            BookingError::from(IneligibleReason::QuotaExceeded),
            BookingError::QuotaExceeded
        ));
        assert!(matches!(
            BookingError::from(IneligibleReason::SubscriptionExpired),
            BookingError::SubscriptionExpired
        ));
    }

    #[test]
    fn test_attempt_states_render_for_logs() {
        assert_eq!(BookingAttemptState::SlotReserved.to_string(), "slot_reserved");
        assert_eq!(BookingAttemptState::Committed.to_string(), "committed");
        assert_eq!(BookingAttemptState::Aborted.to_string(), "aborted");
    }
}
