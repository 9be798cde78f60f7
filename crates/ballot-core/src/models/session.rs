//! Persisted admin session

use serde::{Deserialize, Serialize};
use std::fmt;

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// The signed-in administrator, kept in the local store so the remote
/// gateway can authenticate across restarts. Issuing and refreshing the
/// session happens elsewhere.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSession {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry as Unix seconds
    pub expires_at: i64,
}

impl AdminSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= chrono::Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AdminSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AdminSession")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
