use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub store_url: String,
    pub store_api_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            store_url: "http://localhost:54321".to_string(),
            store_api_key: "test-api-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            store_url: self.store_url.clone(),
            store_api_key: self.store_api_key.clone(),
            store_jwt_secret: self.jwt_secret.clone(),
            notify_webhook_url: String::new(),
        }
    }

}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "pet_parent".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn vet(email: &str) -> Self {
        Self::new(email, "vet")
    }

    pub fn pet_parent(email: &str) -> Self {
        Self::new(email, "pet_parent")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

pub struct MockStoreResponses;

impl MockStoreResponses {
    pub fn slot_response(slot_id: &str, vet_id: &str, status: &str) -> serde_json::Value {
        json!({
            "id": slot_id,
            "vet_id": vet_id,
            "slot_date": "2025-06-15",
            "start_time": "10:00:00",
            "end_time": "10:30:00",
            "timezone": "America/New_York",
            "status": status,
            "notes": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn subscription_response(subscription_id: &str, pet_parent_id: &str,
                                 used: i32, allowed: i32, status: &str) -> serde_json::Value {
        let now = Utc::now();
        json!({
            "id": subscription_id,
            "pet_parent_id": pet_parent_id,
            "plan_id": "care-plus-monthly",
            "status": status,
            "appointments_allowed": allowed,
            "appointments_used": used,
            "period_start": (now - Duration::days(10)).to_rfc3339(),
            "period_end": (now + Duration::days(20)).to_rfc3339(),
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn booking_response(booking_id: &str, subscription_id: &str, slot_id: &str,
                            vet_id: &str, pet_parent_id: &str) -> serde_json::Value {
        json!({
            "id": booking_id,
            "subscription_id": subscription_id,
            "slot_id": slot_id,
            "vet_id": vet_id,
            "pet_parent_id": pet_parent_id,
            "booked_at": Utc::now().to_rfc3339(),
            "cancelled": false,
            "cancelled_at": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "error": {
                "message": message,
                "code": code
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.store_url, "http://localhost:54321");
        assert_eq!(app_config.store_api_key, "test-api-key");
        assert!(!app_config.store_jwt_secret.is_empty());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::vet("vet@example.com");
        assert_eq!(user.email, "vet@example.com");
        assert_eq!(user.role, "vet");

        let user_model = user.to_user();
        assert_eq!(user_model.email, Some(user.email.clone()));
        assert_eq!(user_model.role, Some(user.role.clone()));
        assert_eq!(user_model.id, user.id);
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::default();
        let secret = "test-secret";
        let token = JwtTestUtils::create_test_token(&user, secret, Some(1));

        assert!(token.contains('.'));
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_mock_slot_row_matches_status() {
        let row = MockStoreResponses::slot_response("s-1", "v-1", "available");
        assert_eq!(row["status"], "available");
        assert_eq!(row["vet_id"], "v-1");
    }
}
