//! Booth Server Library
//!
//! Local-network photo booth: a kiosk triggers captures, phones join over
//! the booth WiFi and watch results arrive live.
//!
//! ## Architecture (8 Components)
//!
//! 1. CameraGateway - one physical camera behind a typed contract
//! 2. PreviewGate - preview/capture device hand-off
//! 3. PhotoPipeline - raw capture to stored web/thumbnail variants
//! 4. SessionRepository - session/photo persistence
//! 5. CaptureOrchestrator - session state machine + burst sequencer
//! 6. BoothHub - kiosk/phone WebSocket fan-out
//! 7. QrService - gallery and WiFi-join QR codes
//! 8. WebAPI - REST/WebSocket/captive-portal endpoints
//!
//! ## Design Principles
//!
//! - One camera, one active session, one burst in flight at a time
//! - Per-photo failure isolation: a bad shutter never aborts a burst
//! - Every service is constructed once in main and shared via AppState

pub mod camera_gateway;
pub mod capture_orchestrator;
pub mod db;
pub mod error;
pub mod models;
pub mod photo_pipeline;
pub mod preview_gate;
pub mod qr_service;
pub mod realtime_hub;
pub mod session_repository;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
