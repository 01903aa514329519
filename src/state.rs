//! Application state
//!
//! Holds all shared components and state

use crate::camera_gateway::CameraGateway;
use crate::capture_orchestrator::CaptureOrchestrator;
use crate::photo_pipeline::PhotoProcessor;
use crate::preview_gate::PreviewGate;
use crate::realtime_hub::BoothHub;
use crate::session_repository::SessionRepository;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Public base URL (what phones on the booth WiFi can reach)
    pub public_url: String,
    /// Photo storage directory
    pub photos_dir: PathBuf,
    /// Bundled frontend dist directory
    pub frontend_dir: PathBuf,
    /// WiFi hotspot SSID (for QR code generation)
    pub wifi_ssid: String,
    /// WiFi hotspot password
    pub wifi_password: String,
    /// Session expiry in minutes (advisory, no reaper)
    pub session_expiry_minutes: i64,
    /// Photos captured per burst
    pub photos_per_capture: u32,
    /// Countdown length before each photo, in seconds
    pub countdown_seconds: u32,
    /// Settle delay between captures, in milliseconds
    pub capture_delay_ms: u64,
    /// Max width of the "web" variant
    pub web_max_width: u32,
    /// Max width of the thumbnail variant
    pub thumbnail_max_width: u32,
    /// Store captured bytes verbatim as the web variant
    pub save_raw_images: bool,
    /// Camera backend: "gphoto2" or "synthetic"
    pub camera_backend: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://booth.db".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://192.168.4.1:8000".to_string()),
            photos_dir: std::env::var("PHOTOS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./photos")),
            frontend_dir: std::env::var("FRONTEND_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./frontend/dist")),
            wifi_ssid: std::env::var("WIFI_SSID").unwrap_or_else(|_| "SnapBooth".to_string()),
            wifi_password: std::env::var("WIFI_PASSWORD")
                .unwrap_or_else(|_| "photobooth".to_string()),
            session_expiry_minutes: std::env::var("SESSION_EXPIRY_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            photos_per_capture: std::env::var("PHOTOS_PER_CAPTURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            countdown_seconds: std::env::var("COUNTDOWN_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            capture_delay_ms: std::env::var("CAPTURE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            web_max_width: std::env::var("WEB_MAX_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1920),
            thumbnail_max_width: std::env::var("THUMBNAIL_MAX_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(400),
            save_raw_images: std::env::var("SAVE_RAW_IMAGES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            camera_backend: std::env::var("CAMERA_BACKEND")
                .unwrap_or_else(|_| "gphoto2".to_string()),
        }
    }
}

impl AppConfig {
    /// Gallery URL for a session, as reachable from a phone on the booth WiFi
    pub fn gallery_url(&self, session_id: &str) -> String {
        format!("{}/session/{}", self.public_url, session_id)
    }

    /// QR code endpoint URL for a session
    pub fn qr_code_url(&self, session_id: &str) -> String {
        format!("{}/api/sessions/{}/qr", self.public_url, session_id)
    }

    /// WiFi QR code endpoint URL for a session
    pub fn wifi_qr_url(&self, session_id: &str) -> String {
        format!("{}/api/sessions/{}/wifi-qr", self.public_url, session_id)
    }

    /// Photo strip endpoint URL for a session
    pub fn strip_url(&self, session_id: &str) -> String {
        format!("{}/api/sessions/{}/strip", self.public_url, session_id)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// Camera gateway (hardware or synthetic, selected at startup)
    pub camera: Arc<dyn CameraGateway>,
    /// Preview/capture coordination gate
    pub preview_gate: Arc<PreviewGate>,
    /// BoothHub (WebSocket fan-out)
    pub hub: Arc<BoothHub>,
    /// Session/photo repository
    pub repository: SessionRepository,
    /// Photo processing pipeline
    pub processor: Arc<PhotoProcessor>,
    /// Capture orchestrator (state machine + sequencer)
    pub orchestrator: Arc<CaptureOrchestrator>,
}
