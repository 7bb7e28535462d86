// libs/booking-cell/src/services/notify.rs
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::Booking;

/// Fire-and-forget webhook delivery for booking lifecycle events. The
/// booking flow never waits on a notification and never fails because of
/// one; an unreachable webhook only produces a warning.
#[derive(Clone)]
pub struct BookingNotifier {
    client: Client,
    webhook_url: String,
}

impl BookingNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            webhook_url: config.notify_webhook_url.clone(),
        }
    }

    pub fn booking_committed(&self, booking: &Booking) {
        self.dispatch(
            "booking.committed",
            json!({
                "booking_id": booking.id,
                "subscription_id": booking.subscription_id,
                "slot_id": booking.slot_id,
                "vet_id": booking.vet_id,
                "pet_parent_id": booking.pet_parent_id,
                "booked_at": booking.booked_at.to_rfc3339(),
            }),
        );
    }

    pub fn booking_cancelled(&self, booking: &Booking) {
        self.dispatch(
            "booking.cancelled",
            json!({
                "booking_id": booking.id,
                "subscription_id": booking.subscription_id,
                "slot_id": booking.slot_id,
                "pet_parent_id": booking.pet_parent_id,
                "cancelled_at": booking.cancelled_at.map(|t| t.to_rfc3339()),
            }),
        );
    }

    fn dispatch(&self, event: &str, data: Value) {
        if self.webhook_url.is_empty() {
            debug!("No webhook configured, dropping {} event", event);
            return;
        }

        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let event = event.to_string();
        let body = json!({
            "event": event,
            "data": data,
            "sent_at": Utc::now().to_rfc3339(),
        });

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Delivered {} webhook", event);
                }
                Ok(response) => {
                    warn!("Webhook {} returned {}", event, response.status());
                }
                Err(e) => {
                    warn!("Webhook {} delivery failed: {}", event, e);
                }
            }
        });
    }
}
