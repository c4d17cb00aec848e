//! Typed client for the store API.
//!
//! Besides plain REST calls this module owns the client-side pieces of the
//! storefront: a persisted auth session that is dropped on any 401, an API
//! health poller, and a cart store that keeps working on a local shadow copy
//! while the server is unreachable.

use std::{path::PathBuf, time::Duration};

use reqwest::StatusCode;

pub mod api;
pub mod cart_store;
pub mod health;
pub mod session;
pub mod storage;

pub use api::ApiClient;
pub use cart_store::{CartBackend, CartEntry, CartSnapshot, CartStore};
pub use health::{ApiHealth, HealthCheck, HealthMonitor};
pub use session::AuthSession;
pub use storage::{FileStorage, MemoryStorage, Storage};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Where the session and the shadow cart are persisted.
    pub storage_dir: PathBuf,
    pub health_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            storage_dir: PathBuf::from(".store-client"),
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Reads `STORE_API_URL` and `STORE_CLIENT_DIR`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("STORE_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            storage_dir: std::env::var("STORE_CLIENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            ..defaults
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("session expired or not signed in")]
    Unauthorized,

    #[error("{0} is out of stock")]
    OutOfStock(String),

    #[error("local storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        ClientError::Api {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// True when the server could not be reached or failed on its side, which
    /// is when the cart falls back to its local copy.
    pub fn is_offline(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_count_as_offline_but_client_errors_do_not() {
        assert!(ClientError::api(StatusCode::SERVICE_UNAVAILABLE, "down").is_offline());
        assert!(ClientError::api(StatusCode::BAD_GATEWAY, "proxy").is_offline());
        assert!(!ClientError::api(StatusCode::BAD_REQUEST, "out of stock").is_offline());
        assert!(!ClientError::Unauthorized.is_offline());
        assert!(!ClientError::OutOfStock("Mug".into()).is_offline());
    }

    #[test]
    fn default_config_polls_every_two_minutes() {
        let config = ClientConfig::default();
        assert_eq!(config.health_interval, Duration::from_secs(120));
        assert!(config.base_url.starts_with("http://"));
    }
}
