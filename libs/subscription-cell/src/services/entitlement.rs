// libs/subscription-cell/src/services/entitlement.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::models::{Subscription, SubscriptionError, SubscriptionStatus, Eligibility};

/// How many times a credit update retries after losing its conditional
/// write before giving up.
const CREDIT_CAS_ATTEMPTS: u32 = 3;

/// Appointment-credit bookkeeping over the durable store. Reads are plain;
/// every write is conditioned on the row state the writer saw, so two
/// bookings racing for the last credit cannot both win.
pub struct EntitlementTracker {
    store: Arc<StoreClient>,
}

impl EntitlementTracker {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
        }
    }

    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let path = format!("/rest/v1/subscriptions?id=eq.{}", subscription_id);

        let rows: Vec<Subscription> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(SubscriptionError::SubscriptionNotFound)
    }

    /// Read-only eligibility probe. The authoritative re-check happens
    /// inside `consume_credit`; this one exists for UI and pre-flight use.
    pub async fn check_eligible(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Eligibility, SubscriptionError> {
        let sub = self.get_subscription(subscription_id, auth_token).await?;
        Ok(sub.eligibility_at(Utc::now()))
    }

    /// Atomically take one appointment credit. The increment is conditioned
    /// on the usage count just read; losing the race re-reads and re-checks
    /// eligibility before trying again, so a quota filled by a faster caller
    /// is reported as `QuotaExceeded` rather than retried forever.
    #[instrument(skip(self, auth_token))]
    pub async fn consume_credit(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        for attempt in 1..=CREDIT_CAS_ATTEMPTS {
            let sub = self.get_subscription(subscription_id, auth_token).await?;

            let eligibility = sub.eligibility_at(Utc::now());
            if let Some(reason) = eligibility.reason {
                debug!("Subscription {} ineligible: {}", subscription_id, reason);
                return Err(reason.into());
            }

            let path = format!(
                "/rest/v1/subscriptions?id=eq.{}&status=eq.{}&appointments_used=eq.{}",
                subscription_id,
                SubscriptionStatus::Active,
                sub.appointments_used,
            );
            let body = json!({
                "appointments_used": sub.appointments_used + 1,
                "updated_at": Utc::now().to_rfc3339(),
            });

            let rows = self
                .store
                .update_where(&path, Some(auth_token), body)
                .await
                .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

            if let Some(row) = rows.into_iter().next() {
                info!(
                    "Consumed credit {}/{} on subscription {}",
                    sub.appointments_used + 1,
                    sub.appointments_allowed,
                    subscription_id,
                );
                return parse_subscription(row);
            }

            debug!(
                "Credit update lost on subscription {} (attempt {}/{})",
                subscription_id, attempt, CREDIT_CAS_ATTEMPTS,
            );
        }

        warn!(
            "Credit update on subscription {} still contended after {} attempts",
            subscription_id, CREDIT_CAS_ATTEMPTS,
        );
        Err(SubscriptionError::UpdateContention)
    }

    /// Give one appointment credit back, flooring at zero. The compensating
    /// write for a failed or cancelled booking; refunding an untouched
    /// period is a logged no-op, which keeps double refunds harmless.
    #[instrument(skip(self, auth_token))]
    pub async fn refund_credit(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        for attempt in 1..=CREDIT_CAS_ATTEMPTS {
            let sub = self.get_subscription(subscription_id, auth_token).await?;

            if sub.appointments_used == 0 {
                warn!(
                    "Refund no-op on subscription {}: nothing consumed this period",
                    subscription_id,
                );
                return Ok(sub);
            }

            let path = format!(
                "/rest/v1/subscriptions?id=eq.{}&appointments_used=eq.{}",
                subscription_id, sub.appointments_used,
            );
            let body = json!({
                "appointments_used": sub.appointments_used - 1,
                "updated_at": Utc::now().to_rfc3339(),
            });

            let rows = self
                .store
                .update_where(&path, Some(auth_token), body)
                .await
                .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

            if let Some(row) = rows.into_iter().next() {
                info!(
                    "Refunded credit on subscription {} ({} now used)",
                    subscription_id,
                    sub.appointments_used - 1,
                );
                return parse_subscription(row);
            }

            debug!(
                "Refund lost on subscription {} (attempt {}/{})",
                subscription_id, attempt, CREDIT_CAS_ATTEMPTS,
            );
        }

        warn!(
            "Refund on subscription {} still contended after {} attempts",
            subscription_id, CREDIT_CAS_ATTEMPTS,
        );
        Err(SubscriptionError::UpdateContention)
    }

    /// Advance a subscription whose period has lapsed: usage resets to zero
    /// and the period moves forward whole cycles until it contains now.
    /// Not-yet-due subscriptions come back unchanged, and a concurrent
    /// renewal simply stands, keyed on the period_end this call read.
    /// Status is deliberately left alone: an expired subscription stays
    /// expired until reactivated through billing.
    #[instrument(skip(self, auth_token))]
    pub async fn renew_if_due(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let sub = self.get_subscription(subscription_id, auth_token).await?;
        let now = Utc::now();

        if now < sub.period_end {
            debug!(
                "Subscription {} not due for renewal until {}",
                subscription_id, sub.period_end,
            );
            return Ok(sub);
        }

        if sub.period_end <= sub.period_start {
            return Err(SubscriptionError::DatabaseError(format!(
                "subscription {} has a degenerate billing period",
                subscription_id,
            )));
        }

        let (period_start, period_end) = advance_period(sub.period_start, sub.period_end, now);

        let path = format!(
            "/rest/v1/subscriptions?id=eq.{}&period_end=eq.{}",
            subscription_id,
            urlencoding::encode(&sub.period_end.to_rfc3339()),
        );
        let body = json!({
            "appointments_used": 0,
            "period_start": period_start.to_rfc3339(),
            "period_end": period_end.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!(
                    "Renewed subscription {} through {}",
                    subscription_id, period_end,
                );
                parse_subscription(row)
            }
            None => {
                debug!("Renewal already applied for subscription {}", subscription_id);
                self.get_subscription(subscription_id, auth_token).await
            }
        }
    }

    /// Flip an active subscription to expired once the grace window after
    /// period_end has passed without renewal. Safe to call repeatedly.
    #[instrument(skip(self, auth_token))]
    pub async fn mark_expired_if_lapsed(
        &self,
        subscription_id: Uuid,
        auth_token: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let sub = self.get_subscription(subscription_id, auth_token).await?;

        if sub.status != SubscriptionStatus::Active {
            return Ok(sub);
        }
        if Utc::now() <= sub.grace_deadline() {
            return Ok(sub);
        }

        let path = format!(
            "/rest/v1/subscriptions?id=eq.{}&status=eq.{}&period_end=eq.{}",
            subscription_id,
            SubscriptionStatus::Active,
            urlencoding::encode(&sub.period_end.to_rfc3339()),
        );
        let body = json!({
            "status": SubscriptionStatus::Expired.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!("Marked subscription {} expired", subscription_id);
                parse_subscription(row)
            }
            None => {
                // Renewed or expired by someone else in the meantime
                self.get_subscription(subscription_id, auth_token).await
            }
        }
    }

    /// Active subscriptions whose period ends within the horizon, for
    /// renewal reminders.
    pub async fn list_expiring_soon(
        &self,
        within_days: i64,
        auth_token: &str,
    ) -> Result<Vec<Subscription>, SubscriptionError> {
        let now = Utc::now();
        let horizon = now + Duration::days(within_days);

        let path = format!(
            "/rest/v1/subscriptions?status=eq.{}&period_end=gte.{}&period_end=lte.{}&order=period_end.asc",
            SubscriptionStatus::Active,
            urlencoding::encode(&now.to_rfc3339()),
            urlencoding::encode(&horizon.to_rfc3339()),
        );

        self.store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SubscriptionError::DatabaseError(e.to_string()))
    }
}

/// Walk the billing period forward whole cycles until it contains `now`.
/// Callers guarantee `period_end > period_start` and `now >= period_end`.
fn advance_period(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let cycle = period_end - period_start;
    let mut start = period_end;
    let mut end = period_end + cycle;
    while end <= now {
        start = end;
        end = end + cycle;
    }
    (start, end)
}

fn parse_subscription(row: Value) -> Result<Subscription, SubscriptionError> {
    serde_json::from_value(row)
        .map_err(|e| SubscriptionError::DatabaseError(format!("malformed subscription row: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn test_renewal_advances_one_cycle() {
        let (start, end) = advance_period(day(0), day(30), day(31));

        assert_eq!(start, day(30));
        assert_eq!(end, day(60));
    }

    #[test]
    fn test_renewal_catches_up_skipped_cycles() {
        let (start, end) = advance_period(day(0), day(30), day(95));

        assert_eq!(start, day(90));
        assert_eq!(end, day(120));
    }

    #[test]
    fn test_renewal_at_exact_boundary_opens_the_next_period() {
        let (start, end) = advance_period(day(0), day(30), day(30));

        assert_eq!(start, day(30));
        assert_eq!(end, day(60));
    }
}
