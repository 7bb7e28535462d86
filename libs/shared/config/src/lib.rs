use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_api_key: String,
    pub store_jwt_secret: String,
    pub notify_webhook_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("PAWCALL_STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("PAWCALL_STORE_URL not set, using empty value");
                    String::new()
                }),
            store_api_key: env::var("PAWCALL_STORE_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("PAWCALL_STORE_API_KEY not set, using empty value");
                    String::new()
                }),
            store_jwt_secret: env::var("PAWCALL_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("PAWCALL_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            notify_webhook_url: env::var("PAWCALL_NOTIFY_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("PAWCALL_NOTIFY_WEBHOOK_URL not set, notifications disabled");
                    String::new()
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty()
            && !self.store_api_key.is_empty()
            && !self.store_jwt_secret.is_empty()
    }

    pub fn is_notify_configured(&self) -> bool {
        !self.notify_webhook_url.is_empty()
    }
}
