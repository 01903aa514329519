//! Session/photo row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Ready, waiting for a capture command
    Active,
    /// Countdown in progress
    Countdown,
    /// Camera is actively capturing
    Capturing,
    /// Done, photos available for download
    Completed,
    /// Past expiry time (advisory)
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Countdown => "countdown",
            SessionStatus::Capturing => "capturing",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "countdown" => Some(SessionStatus::Countdown),
            "capturing" => Some(SessionStatus::Capturing),
            "completed" => Some(SessionStatus::Completed),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }

    /// Completed and Expired admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }

    /// Countdown or Capturing: a burst is running for this session
    pub fn is_mid_burst(&self) -> bool {
        matches!(self, SessionStatus::Countdown | SessionStatus::Capturing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Stored as TEXT, parsed via SessionStatus
    pub status: String,
    pub upload_token: String,
    pub photo_count: i64,
}

impl SessionRow {
    pub fn status(&self) -> SessionStatus {
        SessionStatus::parse(&self.status).unwrap_or(SessionStatus::Completed)
    }
}

/// Photo entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhotoRow {
    pub id: String,
    pub session_id: String,
    /// 1-based, unique within the session
    pub sequence: i64,
    pub captured_at: DateTime<Utc>,
    pub web_path: String,
    pub thumbnail_path: String,
}
