// libs/schedule-cell/src/services/slots.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::models::{CreateSlotRequest, LocalizedSlot, ScheduleError, Slot, SlotStatus};
use crate::services::timezone;

/// Half-open interval overlap on the wall clock.
fn overlaps(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && a_end > b_start
}

/// Slot lifecycle over the durable store. Every state transition is a single
/// conditional update keyed on the status the caller expects, so concurrent
/// writers race at the store and exactly one of them sees a row come back.
pub struct SlotStore {
    store: Arc<StoreClient>,
}

impl SlotStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
        }
    }

    // ==========================================================================
    // SLOT CREATION AND LOOKUP
    // ==========================================================================

    #[instrument(skip(self, auth_token, request), fields(slot_date = %request.slot_date))]
    pub async fn create_slot(
        &self,
        vet_id: Uuid,
        request: CreateSlotRequest,
        auth_token: &str,
    ) -> Result<Slot, ScheduleError> {
        let start_time = timezone::parse_hhmm(&request.start_time)?;
        let end_time = timezone::parse_hhmm(&request.end_time)?;
        timezone::parse_zone(&request.timezone)?;

        if end_time <= start_time {
            return Err(ScheduleError::InvalidTime(
                "end_time must be after start_time".to_string(),
            ));
        }

        // Overlap is scoped to the vet's calendar day in the slot's own
        // timezone; disabled slots do not block the window.
        let existing = self
            .fetch_day(vet_id, request.slot_date, &request.timezone, auth_token)
            .await?;

        for other in existing.iter().filter(|s| s.status != SlotStatus::Disabled) {
            if overlaps(start_time, end_time, other.start_time, other.end_time) {
                warn!(
                    "Slot overlap for vet {} on {}: {}-{} vs existing {}-{}",
                    vet_id, request.slot_date, start_time, end_time,
                    other.start_time, other.end_time
                );
                return Err(ScheduleError::OverlapConflict);
            }
        }

        let now = Utc::now();
        let body = json!({
            "vet_id": vet_id,
            "slot_date": request.slot_date.format("%Y-%m-%d").to_string(),
            "start_time": start_time.format("%H:%M:%S").to_string(),
            "end_time": end_time.format("%H:%M:%S").to_string(),
            "timezone": request.timezone,
            "status": SlotStatus::Available.to_string(),
            "notes": request.notes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let created = self
            .store
            .insert_returning("/rest/v1/vet_slots", Some(auth_token), body)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::DatabaseError("insert returned no row".to_string()))?;

        info!("Created slot for vet {} on {}", vet_id, request.slot_date);
        parse_slot(row)
    }

    pub async fn get_slot(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, ScheduleError> {
        let path = format!("/rest/v1/vet_slots?id=eq.{}", slot_id);

        let rows: Vec<Slot> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(ScheduleError::SlotNotFound)
    }

    pub async fn list_slots(
        &self,
        vet_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        status: Option<SlotStatus>,
        auth_token: &str,
    ) -> Result<Vec<Slot>, ScheduleError> {
        if to < from {
            return Err(ScheduleError::InvalidTime(
                "date range is inverted".to_string(),
            ));
        }

        let mut path = format!(
            "/rest/v1/vet_slots?vet_id=eq.{}&slot_date=gte.{}&slot_date=lte.{}&order=slot_date.asc,start_time.asc",
            vet_id,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
        );
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }

        self.store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }

    /// Available slots for a vet, optionally projected into the viewer's
    /// timezone. Conversion can move a slot across midnight, so the result
    /// is re-sorted on the converted wall clock.
    pub async fn list_available(
        &self,
        vet_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        viewer_tz: Option<&str>,
        auth_token: &str,
    ) -> Result<Vec<LocalizedSlot>, ScheduleError> {
        let slots = self
            .list_slots(vet_id, from, to, Some(SlotStatus::Available), auth_token)
            .await?;

        let mut views = match viewer_tz {
            Some(tz) => {
                timezone::parse_zone(tz)?;
                slots
                    .iter()
                    .map(|slot| timezone::localize_slot(slot, tz))
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => slots.into_iter().map(LocalizedSlot::from).collect(),
        };

        views.sort_by(|a, b| {
            (a.slot_date, a.start_time).cmp(&(b.slot_date, b.start_time))
        });

        Ok(views)
    }

    // ==========================================================================
    // STATE TRANSITIONS
    // ==========================================================================

    /// AVAILABLE -> BOOKED. Exactly one concurrent caller wins; the rest see
    /// `SlotUnavailable`.
    #[instrument(skip(self, auth_token))]
    pub async fn reserve(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, ScheduleError> {
        let path = format!(
            "/rest/v1/vet_slots?id=eq.{}&status=eq.{}",
            slot_id,
            SlotStatus::Available
        );
        let body = json!({
            "status": SlotStatus::Booked.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!("Reserved slot {}", slot_id);
                parse_slot(row)
            }
            None => match self.get_slot(slot_id, auth_token).await {
                Ok(slot) => {
                    debug!("Reserve lost on slot {} (status {})", slot_id, slot.status);
                    Err(ScheduleError::SlotUnavailable)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// BOOKED -> AVAILABLE. The compensating transition for a failed or
    /// cancelled booking; releasing a slot that is not booked reports
    /// `SlotNotBooked` so callers can treat it as already done.
    #[instrument(skip(self, auth_token))]
    pub async fn release(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, ScheduleError> {
        let path = format!(
            "/rest/v1/vet_slots?id=eq.{}&status=eq.{}",
            slot_id,
            SlotStatus::Booked
        );
        let body = json!({
            "status": SlotStatus::Available.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!("Released slot {}", slot_id);
                parse_slot(row)
            }
            None => match self.get_slot(slot_id, auth_token).await {
                Ok(slot) => {
                    debug!("Release no-op on slot {} (status {})", slot_id, slot.status);
                    Err(ScheduleError::SlotNotBooked)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// AVAILABLE -> DISABLED. Booked slots are refused: the reservation has
    /// to be cancelled through the booking flow first so the pet parent's
    /// credit is refunded. Disabling an already-disabled slot is a no-op.
    #[instrument(skip(self, auth_token))]
    pub async fn disable(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, ScheduleError> {
        self.flip_status(slot_id, SlotStatus::Available, SlotStatus::Disabled, auth_token)
            .await
    }

    /// DISABLED -> AVAILABLE. Enabling an already-available slot is a no-op.
    #[instrument(skip(self, auth_token))]
    pub async fn enable(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, ScheduleError> {
        self.flip_status(slot_id, SlotStatus::Disabled, SlotStatus::Available, auth_token)
            .await
    }

    async fn flip_status(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
        auth_token: &str,
    ) -> Result<Slot, ScheduleError> {
        let path = format!("/rest/v1/vet_slots?id=eq.{}&status=eq.{}", slot_id, from);
        let body = json!({
            "status": to.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self
            .store
            .update_where(&path, Some(auth_token), body)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!("Slot {} moved {} -> {}", slot_id, from, to);
                parse_slot(row)
            }
            None => {
                let slot = self.get_slot(slot_id, auth_token).await?;
                if slot.status == to {
                    debug!("Slot {} already {}", slot_id, to);
                    return Ok(slot);
                }
                warn!(
                    "Refusing {} -> {} on slot {} (currently {})",
                    from, to, slot_id, slot.status
                );
                Err(ScheduleError::SlotBooked)
            }
        }
    }

    async fn fetch_day(
        &self,
        vet_id: Uuid,
        slot_date: NaiveDate,
        tz: &str,
        auth_token: &str,
    ) -> Result<Vec<Slot>, ScheduleError> {
        let path = format!(
            "/rest/v1/vet_slots?vet_id=eq.{}&slot_date=eq.{}&timezone=eq.{}&order=start_time.asc",
            vet_id,
            slot_date.format("%Y-%m-%d"),
            urlencoding::encode(tz),
        );

        self.store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| ScheduleError::DatabaseError(e.to_string()))
    }
}

fn parse_slot(row: Value) -> Result<Slot, ScheduleError> {
    serde_json::from_value(row)
        .map_err(|e| ScheduleError::DatabaseError(format!("malformed slot row: {}", e)))
}
