//! Admin notification model. Derived from profile rows, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// An account created within the recent-signup window
    NewSignup,
    /// A provider waiting for an admin to verify them
    PendingVerification,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSignup => write!(f, "new_signup"),
            Self::PendingVerification => write!(f, "pending_verification"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// `<kind>:<profile id>`, stable across recomputations
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
}
