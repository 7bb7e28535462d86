// libs/booking-cell/src/services/coordinator.rs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use schedule_cell::models::{ScheduleError, Slot, SlotStatus};
use schedule_cell::services::slots::SlotStore;
use shared_config::AppConfig;
use shared_database::StoreClient;
use subscription_cell::services::entitlement::EntitlementTracker;

use crate::models::{BookRequest, Booking, BookingAttemptState, BookingError, StrandedSlot};
use crate::services::notify::BookingNotifier;

// Release retries before a slot is left for the reconciliation sweep
const COMPENSATION_ATTEMPTS: u32 = 3;

/// Runs the booking saga across the slot and subscription stores. There is
/// no cross-store transaction; each step is a conditional write, and every
/// failure after the slot reservation triggers a compensating release.
pub struct BookingCoordinator {
    store: Arc<StoreClient>,
    slots: SlotStore,
    entitlements: EntitlementTracker,
    notifier: BookingNotifier,
}

impl BookingCoordinator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
            slots: SlotStore::new(config),
            entitlements: EntitlementTracker::new(config),
            notifier: BookingNotifier::new(config),
        }
    }

    /// Book one slot against one subscription credit. Step order matters:
    /// the slot is held first so a consumed credit never waits on inventory,
    /// and the credit is spent before the booking row exists so a crash
    /// leaves a refundable credit, never a free appointment.
    #[instrument(skip(self, auth_token))]
    pub async fn book(
        &self,
        pet_parent_id: Uuid,
        request: &BookRequest,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        debug!(state = %BookingAttemptState::Requested, "Booking attempt started");

        let eligibility = self
            .entitlements
            .check_eligible(request.subscription_id, auth_token)
            .await?;
        if let Some(reason) = eligibility.reason {
            debug!(state = %BookingAttemptState::Aborted, "Subscription ineligible: {}", reason);
            return Err(reason.into());
        }
        debug!(state = %BookingAttemptState::EligibilityChecked, "Subscription can take a booking");

        let slot = self.slots.reserve(request.slot_id, auth_token).await?;
        debug!(state = %BookingAttemptState::SlotReserved, "Slot held");

        if let Err(e) = self
            .entitlements
            .consume_credit(request.subscription_id, auth_token)
            .await
        {
            warn!(
                "Credit consumption failed after reserving slot {}: {}",
                request.slot_id, e
            );
            self.abort_reserved(request.slot_id, auth_token).await;
            return Err(e.into());
        }
        debug!(state = %BookingAttemptState::CreditConsumed, "Credit spent");

        match self
            .insert_booking(pet_parent_id, request, &slot, auth_token)
            .await
        {
            Ok(booking) => {
                debug!(state = %BookingAttemptState::Committed, "Booking written");
                info!(
                    "Booking {} committed for pet parent {} on slot {}",
                    booking.id, pet_parent_id, request.slot_id
                );
                self.notifier.booking_committed(&booking);
                Ok(booking)
            }
            Err(e) => {
                warn!("Booking write failed after consuming credit: {}", e);
                self.abort_reserved(request.slot_id, auth_token).await;
                if let Err(refund_err) = self
                    .entitlements
                    .refund_credit(request.subscription_id, auth_token)
                    .await
                {
                    error!(
                        "Refund for subscription {} failed after aborted booking: {}",
                        request.subscription_id, refund_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Cancel a committed booking, then give back the slot and the credit.
    /// The cancelled flag flips first and stays flipped even when a
    /// compensation leg fails; the failure is surfaced so ops can finish
    /// the cleanup by hand or via the sweep.
    #[instrument(skip(self, auth_token))]
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let path = format!("/rest/v1/bookings?id=eq.{}&cancelled=eq.false", booking_id);
        let now = Utc::now().to_rfc3339();
        let body = json!({
            "cancelled": true,
            "cancelled_at": now,
            "updated_at": now,
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let booking = match rows.into_iter().next() {
            Some(row) => parse_booking(row)?,
            None => {
                let current = self.get_booking(booking_id, auth_token).await?;
                if current.cancelled {
                    return Err(BookingError::AlreadyCancelled);
                }
                return Err(BookingError::DatabaseError(
                    "cancel update matched no rows, retry".to_string(),
                ));
            }
        };

        info!("Booking {} cancelled, compensating slot and credit", booking_id);

        let mut failures = Vec::new();
        if let Err(e) = self.compensate_release(booking.slot_id, auth_token).await {
            failures.push(e.to_string());
        }
        if let Err(e) = self
            .entitlements
            .refund_credit(booking.subscription_id, auth_token)
            .await
        {
            warn!(
                "Refund for subscription {} failed during cancel: {}",
                booking.subscription_id, e
            );
            failures.push(format!(
                "subscription {} refund: {}",
                booking.subscription_id, e
            ));
        }

        if !failures.is_empty() {
            // the booking row stays cancelled either way
            return Err(BookingError::CompensationFailed {
                detail: failures.join("; "),
            });
        }

        self.notifier.booking_cancelled(&booking);
        Ok(booking)
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let path = format!("/rest/v1/bookings?id=eq.{}", booking_id);

        let rows: Vec<Booking> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(BookingError::BookingNotFound)
    }

    pub async fn list_for_pet_parent(
        &self,
        pet_parent_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Booking>, BookingError> {
        let path = format!(
            "/rest/v1/bookings?pet_parent_id=eq.{}&order=booked_at.desc",
            pet_parent_id
        );

        self.store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))
    }

    /// Booked slots with no live booking pointing at them: the debris of a
    /// compensating release that never landed. `older_than_minutes` keeps
    /// in-flight booking attempts out of the report.
    pub async fn list_stranded_slots(
        &self,
        older_than_minutes: i64,
        auth_token: &str,
    ) -> Result<Vec<StrandedSlot>, BookingError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(older_than_minutes);
        let slots_path = format!(
            "/rest/v1/vet_slots?status=eq.{}&updated_at=lt.{}",
            SlotStatus::Booked,
            urlencoding::encode(&cutoff.to_rfc3339()),
        );

        let slots: Vec<Slot> = self
            .store
            .request(Method::GET, &slots_path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        if slots.is_empty() {
            return Ok(Vec::new());
        }

        let id_list = slots
            .iter()
            .map(|s| s.id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let bookings_path = format!(
            "/rest/v1/bookings?cancelled=eq.false&slot_id=in.({})",
            id_list
        );

        let bookings: Vec<Booking> = self
            .store
            .request(Method::GET, &bookings_path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let live: HashSet<Uuid> = bookings.iter().map(|b| b.slot_id).collect();
        let stranded: Vec<StrandedSlot> = slots
            .into_iter()
            .filter(|s| !live.contains(&s.id))
            .map(StrandedSlot::from)
            .collect();

        if !stranded.is_empty() {
            warn!(
                "{} stranded slot(s) older than {} minutes",
                stranded.len(),
                older_than_minutes
            );
        }

        Ok(stranded)
    }

    async fn abort_reserved(&self, slot_id: Uuid, auth_token: &str) {
        debug!(state = %BookingAttemptState::Aborted, "Rolling back slot reservation");
        // compensate_release logs the stranding; the reconciliation sweep
        // recovers the slot if every retry misses
        let _ = self.compensate_release(slot_id, auth_token).await;
    }

    /// Put a reserved slot back, retrying with backoff. A slot that is
    /// already available again (or gone entirely) counts as released.
    async fn compensate_release(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let mut last_error = String::new();

        for attempt in 1..=COMPENSATION_ATTEMPTS {
            match self.slots.release(slot_id, auth_token).await {
                Ok(_) => {
                    info!("Compensating release returned slot {}", slot_id);
                    return Ok(());
                }
                Err(ScheduleError::SlotNotBooked) => {
                    debug!("Slot {} already released", slot_id);
                    return Ok(());
                }
                Err(ScheduleError::SlotNotFound) => {
                    warn!("Slot {} vanished during release", slot_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Release of slot {} failed (attempt {}/{}): {}",
                        slot_id, attempt, COMPENSATION_ATTEMPTS, e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < COMPENSATION_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        error!(
            "Slot {} left stranded after {} release attempts, reconciliation sweep will recover it",
            slot_id, COMPENSATION_ATTEMPTS
        );
        Err(BookingError::CompensationFailed {
            detail: format!("slot {} release: {}", slot_id, last_error),
        })
    }

    async fn insert_booking(
        &self,
        pet_parent_id: Uuid,
        request: &BookRequest,
        slot: &Slot,
        auth_token: &str,
    ) -> Result<Booking, BookingError> {
        let now = Utc::now().to_rfc3339();
        let body = json!({
            "subscription_id": request.subscription_id,
            "slot_id": request.slot_id,
            "vet_id": slot.vet_id,
            "pet_parent_id": pet_parent_id,
            "booked_at": now,
            "cancelled": false,
            "created_at": now,
            "updated_at": now,
        });

        let rows = self
            .store
            .insert_returning("/rest/v1/bookings", Some(auth_token), body)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => parse_booking(row),
            None => Err(BookingError::DatabaseError(
                "booking insert returned no row".to_string(),
            )),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    // linear backoff with jitter so colliding compensations spread out
    let jitter = rand::thread_rng().gen_range(0..50);
    Duration::from_millis(100 * attempt as u64 + jitter)
}

fn parse_booking(row: Value) -> Result<Booking, BookingError> {
    serde_json::from_value(row)
        .map_err(|e| BookingError::DatabaseError(format!("malformed booking row: {}", e)))
}
