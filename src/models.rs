//! Shared models and types
//!
//! Response shapes shared across web_api handlers, kept here
//! to avoid circular dependencies between modules.

use crate::session_repository::{PhotoRow, SessionRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub camera_connected: bool,
    pub db_connected: bool,
}

/// Response for session creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub upload_token: String,
    pub gallery_url: String,
    pub qr_code_url: String,
    pub wifi_qr_url: String,
}

/// Session detail response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub photo_count: i64,
    pub kiosk_connected: bool,
    pub phone_count: usize,
}

impl SessionResponse {
    pub fn from_row(row: &SessionRow, kiosk_connected: bool, phone_count: usize) -> Self {
        Self {
            id: row.id.clone(),
            created_at: row.created_at,
            expires_at: row.expires_at,
            status: row.status.clone(),
            photo_count: row.photo_count,
            kiosk_connected,
            phone_count,
        }
    }
}

/// Photo detail response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoResponse {
    pub id: String,
    pub session_id: String,
    pub sequence: i64,
    pub captured_at: DateTime<Utc>,
    pub web_url: String,
    pub thumbnail_url: String,
}

impl PhotoResponse {
    pub fn from_row(row: &PhotoRow, web_url: String, thumbnail_url: String) -> Self {
        Self {
            id: row.id.clone(),
            session_id: row.session_id.clone(),
            sequence: row.sequence,
            captured_at: row.captured_at,
            web_url,
            thumbnail_url,
        }
    }
}

/// Session gallery response (session + photos)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryResponse {
    pub session: SessionResponse,
    pub photos: Vec<PhotoResponse>,
    pub qr_code_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_url: Option<String>,
}
