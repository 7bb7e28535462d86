// libs/subscription-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Days after period_end during which an active subscription still books,
/// covering renewal payment lag.
pub const GRACE_PERIOD_DAYS: i64 = 3;

// ==============================================================================
// CORE SUBSCRIPTION MODELS
// ==============================================================================

/// A pet parent's care plan for one billing period. `appointments_used`
/// only ever moves through conditional writes keyed on the value the writer
/// read, so concurrent bookings cannot double-spend a credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub pet_parent_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub appointments_allowed: i32,
    pub appointments_used: i32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn remaining_appointments(&self) -> i32 {
        (self.appointments_allowed - self.appointments_used).max(0)
    }

    pub fn grace_deadline(&self) -> DateTime<Utc> {
        self.period_end + Duration::days(GRACE_PERIOD_DAYS)
    }

    /// Point-in-time check for consuming one appointment credit.
    pub fn eligibility_at(&self, now: DateTime<Utc>) -> Eligibility {
        match self.status {
            SubscriptionStatus::Inactive => {
                return Eligibility::ineligible(IneligibleReason::SubscriptionInactive);
            }
            SubscriptionStatus::Expired => {
                return Eligibility::ineligible(IneligibleReason::SubscriptionExpired);
            }
            SubscriptionStatus::Active => {}
        }

        if now < self.period_start {
            return Eligibility::ineligible(IneligibleReason::SubscriptionInactive);
        }
        if now > self.grace_deadline() {
            return Eligibility::ineligible(IneligibleReason::SubscriptionExpired);
        }
        if self.appointments_used >= self.appointments_allowed {
            return Eligibility::ineligible(IneligibleReason::QuotaExceeded);
        }

        Eligibility::eligible()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Inactive => write!(f, "inactive"),
            SubscriptionStatus::Expired => write!(f, "expired"),
        }
    }
}

// ==============================================================================
// ELIGIBILITY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self { eligible: true, reason: None }
    }

    pub fn ineligible(reason: IneligibleReason) -> Self {
        Self { eligible: false, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    QuotaExceeded,
    SubscriptionInactive,
    SubscriptionExpired,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::QuotaExceeded => write!(f, "quota_exceeded"),
            IneligibleReason::SubscriptionInactive => write!(f, "subscription_inactive"),
            IneligibleReason::SubscriptionExpired => write!(f, "subscription_expired"),
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Subscription is not active")]
    SubscriptionInactive,

    #[error("Subscription has expired")]
    SubscriptionExpired,

    #[error("Appointment quota exhausted for this billing period")]
    QuotaExceeded,

    #[error("Subscription is being updated concurrently")]
    UpdateContention,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<IneligibleReason> for SubscriptionError {
    fn from(reason: IneligibleReason) -> Self {
        match reason {
            IneligibleReason::QuotaExceeded => SubscriptionError::QuotaExceeded,
            IneligibleReason::SubscriptionInactive => SubscriptionError::SubscriptionInactive,
            IneligibleReason::SubscriptionExpired => SubscriptionError::SubscriptionExpired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(status: SubscriptionStatus, used: i32, allowed: i32) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            pet_parent_id: Uuid::new_v4(),
            plan_id: "care-plus-monthly".to_string(),
            status,
            appointments_allowed: allowed,
            appointments_used: used,
            period_start: now - Duration::days(10),
            period_end: now + Duration::days(20),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_active_subscription_with_credits_is_eligible() {
        let sub = subscription(SubscriptionStatus::Active, 2, 5);
        let eligibility = sub.eligibility_at(Utc::now());

        assert!(eligibility.eligible);
        assert_eq!(eligibility.reason, None);
    }

    #[test]
    fn test_exhausted_quota_is_ineligible() {
        let sub = subscription(SubscriptionStatus::Active, 5, 5);
        let eligibility = sub.eligibility_at(Utc::now());

        assert!(!eligibility.eligible);
        assert_eq!(eligibility.reason, Some(IneligibleReason::QuotaExceeded));
    }

    #[test]
    fn test_oversubscribed_usage_is_still_ineligible() {
        let sub = subscription(SubscriptionStatus::Active, 6, 5);
        let eligibility = sub.eligibility_at(Utc::now());

        assert_eq!(eligibility.reason, Some(IneligibleReason::QuotaExceeded));
        assert_eq!(sub.remaining_appointments(), 0);
    }

    #[test]
    fn test_inactive_subscription_is_ineligible() {
        let sub = subscription(SubscriptionStatus::Inactive, 0, 5);
        let eligibility = sub.eligibility_at(Utc::now());

        assert_eq!(eligibility.reason, Some(IneligibleReason::SubscriptionInactive));
    }

    #[test]
    fn test_expired_subscription_is_ineligible() {
        let sub = subscription(SubscriptionStatus::Expired, 0, 5);
        let eligibility = sub.eligibility_at(Utc::now());

        assert_eq!(eligibility.reason, Some(IneligibleReason::SubscriptionExpired));
    }

    #[test]
    fn test_booking_before_period_start_is_ineligible() {
        let mut sub = subscription(SubscriptionStatus::Active, 0, 5);
        sub.period_start = Utc::now() + Duration::days(1);
        let eligibility = sub.eligibility_at(Utc::now());

        assert_eq!(eligibility.reason, Some(IneligibleReason::SubscriptionInactive));
    }

    #[test]
    fn test_grace_window_after_period_end_still_books() {
        let mut sub = subscription(SubscriptionStatus::Active, 0, 5);
        sub.period_end = Utc::now() - Duration::days(1);
        let eligibility = sub.eligibility_at(Utc::now());

        assert!(eligibility.eligible);
    }

    #[test]
    fn test_past_grace_window_is_expired() {
        let mut sub = subscription(SubscriptionStatus::Active, 0, 5);
        sub.period_end = Utc::now() - Duration::days(GRACE_PERIOD_DAYS + 1);
        let eligibility = sub.eligibility_at(Utc::now());

        assert_eq!(eligibility.reason, Some(IneligibleReason::SubscriptionExpired));
    }
}
