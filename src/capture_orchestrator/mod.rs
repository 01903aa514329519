//! CaptureOrchestrator - session state machine and capture sequencer
//!
//! ## Responsibilities
//!
//! - Session lifecycle: active -> countdown -> capturing -> active/completed
//! - Single-active-session and single-in-flight-burst invariants
//! - Drive the photo burst: countdown, shutter, background processing, fan-out
//!
//! A burst pauses the preview gate for its whole duration; the pause permit
//! resumes preview on drop, so cleanup runs on every exit path. Per-photo
//! failures are absorbed: one bad shutter never aborts the burst. Background
//! processing tasks are tracked in a JoinSet and gathered before the burst
//! is declared complete, so every `photo_ready` precedes `capture_complete`.

use crate::camera_gateway::CameraGateway;
use crate::error::{Error, Result};
use crate::photo_pipeline::PhotoProcessor;
use crate::preview_gate::PreviewGate;
use crate::realtime_hub::{BoothEvent, BoothHub};
use crate::session_repository::{SessionRepository, SessionRow, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// USB settle time before the post-failure reconnect attempt
const RECONNECT_SETTLE: Duration = Duration::from_secs(1);

/// Burst parameters, fixed at startup from AppConfig
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub photos_per_burst: u32,
    pub countdown_seconds: u32,
    pub settle_delay: Duration,
    pub save_raw: bool,
    pub session_expiry_minutes: i64,
    pub public_url: String,
    pub photos_dir: PathBuf,
}

/// Session capture orchestrator
pub struct CaptureOrchestrator {
    camera: Arc<dyn CameraGateway>,
    gate: Arc<PreviewGate>,
    hub: Arc<BoothHub>,
    repository: SessionRepository,
    processor: Arc<PhotoProcessor>,
    settings: CaptureSettings,
    /// Held for the duration of one burst; enforces at most one burst
    /// process-wide regardless of which session asks
    burst_lock: Mutex<()>,
}

impl CaptureOrchestrator {
    pub fn new(
        camera: Arc<dyn CameraGateway>,
        gate: Arc<PreviewGate>,
        hub: Arc<BoothHub>,
        repository: SessionRepository,
        processor: Arc<PhotoProcessor>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            camera,
            gate,
            hub,
            repository,
            processor,
            settings,
            burst_lock: Mutex::new(()),
        }
    }

    // ========================================
    // Session lifecycle
    // ========================================

    /// Create a new Active session. Every other non-terminal session is
    /// force-completed and its live connections are torn down.
    pub async fn create_session(&self) -> Result<SessionRow> {
        let (session, displaced) = self
            .repository
            .create_session(self.settings.session_expiry_minutes)
            .await?;

        for old_id in displaced {
            self.hub.close_session(&old_id).await;
        }

        Ok(session)
    }

    /// Explicitly terminate a session: status Completed, `session_ended`
    /// broadcast, all connections closed.
    pub async fn end_session(&self, session_id: &str) -> Result<SessionRow> {
        let session = self
            .repository
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        self.repository
            .update_status(&session.id, SessionStatus::Completed)
            .await?;
        self.hub.close_session(&session.id).await;

        tracing::info!(session_id = %session.id, "Session ended");

        self.repository
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    // ========================================
    // Capture burst
    // ========================================

    /// Run one capture burst for the session. Returns once every photo has
    /// either failed or reached `photo_ready`.
    pub async fn start_capture(&self, session_id: &str) -> Result<()> {
        // Single in-flight burst, process-wide
        let _burst = self
            .burst_lock
            .try_lock()
            .map_err(|_| Error::Conflict("capture already in progress".to_string()))?;

        let session = self
            .repository
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        match session.status() {
            s if s.is_terminal() => {
                return Err(Error::SessionClosed(format!(
                    "session {} already {}",
                    session.id, s
                )))
            }
            s if s.is_mid_burst() => {
                return Err(Error::Conflict("capture already in progress".to_string()))
            }
            _ => {}
        }

        if self.repository.other_session_mid_burst(&session.id).await? {
            return Err(Error::Conflict(
                "camera is busy with another session".to_string(),
            ));
        }

        // Check the camera before the first countdown starts
        self.camera
            .ensure_connected()
            .await
            .map_err(|e| Error::CameraUnavailable(e.to_string()))?;

        // Preview yields the device to the burst; the permit resumes it on
        // drop, whatever path we leave by
        let _permit = self.gate.pause();

        let outcome = self.run_burst(&session).await;

        if let Err(ref e) = outcome {
            if !matches!(e, Error::AllCapturesFailed(_)) {
                tracing::error!(session_id = %session.id, error = %e, "Unexpected burst error");
                let _ = self
                    .repository
                    .update_status(&session.id, SessionStatus::Active)
                    .await;
                self.hub
                    .broadcast(
                        &session.id,
                        &BoothEvent::CaptureFailed {
                            session_id: session.id.clone(),
                            error: e.to_string(),
                        },
                    )
                    .await;
            }
        }

        outcome
    }

    async fn run_burst(&self, session: &SessionRow) -> Result<()> {
        let session_id = session.id.clone();
        let total = self.settings.photos_per_burst;
        let base_count = session.photo_count;

        // Sequence numbers continue from the session's photo count and are
        // consumed only by successful shutters, so a partially failed burst
        // stays gapless
        let mut next_sequence = base_count;
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for photo_number in 1..=total {
            self.repository
                .update_status(&session_id, SessionStatus::Countdown)
                .await?;

            for value in (1..=self.settings.countdown_seconds).rev() {
                self.hub
                    .broadcast(
                        &session_id,
                        &BoothEvent::Countdown {
                            session_id: session_id.clone(),
                            value,
                            photo_number,
                            total_photos: total,
                        },
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            self.repository
                .update_status(&session_id, SessionStatus::Capturing)
                .await?;
            self.hub
                .broadcast(
                    &session_id,
                    &BoothEvent::CaptureStart {
                        session_id: session_id.clone(),
                        photo_number,
                        total_photos: total,
                    },
                )
                .await;

            let raw_path = self.settings.photos_dir.join(&session_id).join(format!(
                "{}_{:02}_original.jpg",
                session_id,
                base_count + photo_number as i64
            ));

            let capture_result = async {
                if !self.camera.is_connected().await {
                    tracing::warn!(
                        session_id = %session_id,
                        photo_number = photo_number,
                        "Camera disconnected before shutter, reconnecting"
                    );
                    self.camera.connect().await?;
                }
                self.camera.capture(&raw_path).await
            }
            .await;

            match capture_result {
                Ok(path) => {
                    next_sequence += 1;
                    tracing::info!(
                        session_id = %session_id,
                        photo_number = photo_number,
                        sequence = next_sequence,
                        "Photo captured, processing in background"
                    );
                    tasks.spawn(Self::process_photo(
                        self.processor.clone(),
                        self.repository.clone(),
                        self.hub.clone(),
                        session_id.clone(),
                        next_sequence,
                        path,
                        self.settings.save_raw,
                        failures.clone(),
                    ));
                }
                Err(e) => {
                    let reason = format!("photo {} capture failed: {}", photo_number, e);
                    tracing::error!(session_id = %session_id, error = %e, "Capture failed");
                    failures.lock().await.push(reason);

                    self.hub
                        .broadcast(
                            &session_id,
                            &BoothEvent::PhotoFailed {
                                session_id: session_id.clone(),
                                photo_number,
                                error: e.to_string(),
                            },
                        )
                        .await;

                    // One bounded reconnect attempt after the device settles
                    if !self.camera.is_connected().await {
                        tokio::time::sleep(RECONNECT_SETTLE).await;
                        if let Err(e) = self.camera.connect().await {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %e,
                                "Reconnect attempt failed, continuing burst"
                            );
                        }
                    }
                }
            }

            if photo_number != total {
                tokio::time::sleep(self.settings.settle_delay).await;
            }
        }

        // Shutters done; phones see a processing notice while the tail of
        // background work drains
        if !tasks.is_empty() {
            self.hub
                .broadcast(
                    &session_id,
                    &BoothEvent::Processing {
                        session_id: session_id.clone(),
                        photo_count: tasks.len(),
                    },
                )
                .await;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                failures
                    .lock()
                    .await
                    .push(format!("processing task failed: {}", e));
            }
        }

        self.repository
            .update_status(&session_id, SessionStatus::Active)
            .await?;

        let fresh = self
            .repository
            .get_session(&session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        let processed = fresh.photo_count - base_count;
        let reasons = failures.lock().await.clone();

        if processed > 0 {
            self.hub
                .broadcast(
                    &session_id,
                    &BoothEvent::CaptureComplete {
                        session_id: session_id.clone(),
                        photo_count: fresh.photo_count,
                        strip_url: format!(
                            "{}/api/sessions/{}/strip",
                            self.settings.public_url, session_id
                        ),
                    },
                )
                .await;

            if !reasons.is_empty() {
                tracing::warn!(
                    session_id = %session_id,
                    errors = reasons.len(),
                    "Burst completed with partial failures: {}",
                    reasons.join("; ")
                );
            }
            Ok(())
        } else {
            let summary = if reasons.is_empty() {
                vec!["unknown error".to_string()]
            } else {
                reasons
            };
            self.hub
                .broadcast(
                    &session_id,
                    &BoothEvent::CaptureFailed {
                        session_id: session_id.clone(),
                        error: format!("All captures failed: {}", summary.join("; ")),
                    },
                )
                .await;
            Err(Error::AllCapturesFailed(summary))
        }
    }

    /// Background half of one photo: variants, record, count, fan-out.
    /// Failures are recorded against the burst, never propagated.
    #[allow(clippy::too_many_arguments)]
    async fn process_photo(
        processor: Arc<PhotoProcessor>,
        repository: SessionRepository,
        hub: Arc<BoothHub>,
        session_id: String,
        sequence: i64,
        raw_path: PathBuf,
        save_raw: bool,
        failures: Arc<Mutex<Vec<String>>>,
    ) {
        let processed = match processor
            .process(&raw_path, &session_id, sequence, save_raw)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    sequence = sequence,
                    error = %e,
                    "Photo processing failed"
                );
                failures
                    .lock()
                    .await
                    .push(format!("photo {} processing failed: {}", sequence, e));
                return;
            }
        };

        let record = async {
            let photo = repository
                .create_photo(
                    &session_id,
                    sequence,
                    &processed.web_path,
                    &processed.thumbnail_path,
                )
                .await?;
            repository.increment_photo_count(&session_id).await?;
            Ok::<_, Error>(photo)
        }
        .await;

        match record {
            Ok(photo) => {
                hub.broadcast(
                    &session_id,
                    &BoothEvent::PhotoReady {
                        session_id: session_id.clone(),
                        photo_id: photo.id.clone(),
                        sequence,
                        web_url: processor.photo_url(&photo.web_path),
                        thumbnail_url: processor.photo_url(&photo.thumbnail_path),
                    },
                )
                .await;
                tracing::info!(
                    session_id = %session_id,
                    sequence = sequence,
                    "Photo processed and ready"
                );
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    sequence = sequence,
                    error = %e,
                    "Photo record failed"
                );
                failures
                    .lock()
                    .await
                    .push(format!("photo {} record failed: {}", sequence, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_gateway::SyntheticGateway;
    use crate::db;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use std::path::Path;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Gateway whose nth capture attempts fail with a device error,
    /// dropping to disconnected state per the gateway contract.
    struct FlakyGateway {
        state: Mutex<FlakyState>,
        fail_attempts: HashSet<u32>,
    }

    struct FlakyState {
        connected: bool,
        attempts: u32,
    }

    impl FlakyGateway {
        fn failing_on(attempts: &[u32]) -> Self {
            Self {
                state: Mutex::new(FlakyState {
                    connected: false,
                    attempts: 0,
                }),
                fail_attempts: attempts.iter().copied().collect(),
            }
        }
    }

    #[async_trait]
    impl CameraGateway for FlakyGateway {
        async fn connect(&self) -> Result<()> {
            self.state.lock().await.connected = true;
            Ok(())
        }

        async fn disconnect(&self) {
            self.state.lock().await.connected = false;
        }

        async fn capture(&self, dest: &Path) -> Result<PathBuf> {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(Error::NotConnected);
            }
            state.attempts += 1;
            if self.fail_attempts.contains(&state.attempts) {
                state.connected = false;
                return Err(Error::CaptureFailed(format!(
                    "injected device failure on attempt {}",
                    state.attempts
                )));
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, sample_jpeg()).await?;
            Ok(dest.to_path_buf())
        }

        async fn preview_frame(&self) -> Result<Bytes> {
            Err(Error::NotConnected)
        }

        async fn is_connected(&self) -> bool {
            self.state.lock().await.connected
        }
    }

    fn sample_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(320, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 64]));
        let mut buf = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 85);
        encoder.encode_image(&img).unwrap();
        buf
    }

    struct Harness {
        orchestrator: Arc<CaptureOrchestrator>,
        repository: SessionRepository,
        hub: Arc<BoothHub>,
        _dir: tempfile::TempDir,
    }

    async fn harness(camera: Arc<dyn CameraGateway>, photos_per_burst: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::test_pool().await;
        let repository = SessionRepository::new(pool);
        let hub = Arc::new(BoothHub::new());
        let gate = Arc::new(PreviewGate::new());
        let processor = Arc::new(PhotoProcessor::new(dir.path().join("photos"), 800, 200));

        let settings = CaptureSettings {
            photos_per_burst,
            countdown_seconds: 3,
            settle_delay: Duration::from_secs(1),
            save_raw: false,
            session_expiry_minutes: 60,
            public_url: "http://booth.local".to_string(),
            photos_dir: dir.path().join("photos"),
        };

        let orchestrator = Arc::new(CaptureOrchestrator::new(
            camera,
            gate,
            hub.clone(),
            repository.clone(),
            processor,
            settings,
        ));

        Harness {
            orchestrator,
            repository,
            hub,
            _dir: dir,
        }
    }

    fn drain_events(rx: &mut UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(serde_json::from_str(&msg).unwrap());
        }
        events
    }

    fn event_types(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or("").to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_happy_burst_event_ordering() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 2).await;

        let session = h.orchestrator.create_session().await.unwrap();
        let (_phone, _, mut rx) = h.hub.register_phone(&session.id).await;

        h.orchestrator.start_capture(&session.id).await.unwrap();

        let events = drain_events(&mut rx);
        let types = event_types(&events);

        // Ticks strictly decreasing down to 1, then capture_start, per photo
        let countdown_values: Vec<i64> = events
            .iter()
            .filter(|e| e["type"] == "countdown")
            .map(|e| e["data"]["value"].as_i64().unwrap())
            .collect();
        assert_eq!(countdown_values, vec![3, 2, 1, 3, 2, 1]);

        assert_eq!(types.iter().filter(|t| *t == "capture_start").count(), 2);
        assert_eq!(types.iter().filter(|t| *t == "photo_ready").count(), 2);

        let first_tick = types.iter().position(|t| t == "countdown").unwrap();
        let first_start = types.iter().position(|t| t == "capture_start").unwrap();
        let first_ready = types.iter().position(|t| t == "photo_ready").unwrap();
        let complete = types.iter().position(|t| t == "capture_complete").unwrap();
        assert!(first_tick < first_start);
        assert!(first_start < first_ready);

        // Every photo_ready precedes capture_complete
        let last_ready = types.iter().rposition(|t| t == "photo_ready").unwrap();
        assert!(last_ready < complete);
        assert_eq!(complete, types.len() - 1);

        let session = h.repository.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.photo_count, 2);

        let photos = h.repository.list_photos(&session.id).await.unwrap();
        let sequences: Vec<i64> = photos.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_partial_failure_continues_burst() {
        let camera = Arc::new(FlakyGateway::failing_on(&[2]));
        let h = harness(camera, 3).await;

        let session = h.orchestrator.create_session().await.unwrap();
        let (_phone, _, mut rx) = h.hub.register_phone(&session.id).await;

        h.orchestrator.start_capture(&session.id).await.unwrap();

        let events = drain_events(&mut rx);
        let types = event_types(&events);

        // Exactly one photo_failed, for burst index 2
        let failed: Vec<&serde_json::Value> = events
            .iter()
            .filter(|e| e["type"] == "photo_failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["data"]["photo_number"], 2);

        assert!(types.contains(&"capture_complete".to_string()));
        assert!(!types.contains(&"capture_failed".to_string()));

        // Failed shutter consumed no sequence number: gapless 1..=2
        let photos = h.repository.list_photos(&session.id).await.unwrap();
        let sequences: Vec<i64> = photos.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);

        let session = h.repository.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.photo_count, 2);
    }

    #[tokio::test]
    async fn test_full_failure_surfaces_all_reasons() {
        let camera = Arc::new(FlakyGateway::failing_on(&[1, 2]));
        let h = harness(camera, 2).await;

        let session = h.orchestrator.create_session().await.unwrap();
        let (_phone, _, mut rx) = h.hub.register_phone(&session.id).await;

        let err = h.orchestrator.start_capture(&session.id).await.unwrap_err();
        let Error::AllCapturesFailed(reasons) = err else {
            panic!("expected AllCapturesFailed, got {:?}", err);
        };
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("attempt 1"));
        assert!(reasons[1].contains("attempt 2"));

        let types = event_types(&drain_events(&mut rx));
        assert!(types.contains(&"capture_failed".to_string()));
        assert!(!types.contains(&"capture_complete".to_string()));
        assert!(!types.contains(&"photo_ready".to_string()));

        let session = h.repository.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.photo_count, 0);
        assert!(h.repository.list_photos(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_capture_conflicts() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 1).await;

        let session = h.orchestrator.create_session().await.unwrap();

        let orchestrator = h.orchestrator.clone();
        let session_id = session.id.clone();
        let burst = tokio::spawn(async move { orchestrator.start_capture(&session_id).await });

        // Wait for the burst to reach its countdown
        let mut entered = false;
        for _ in 0..10_000 {
            let status = h
                .repository
                .get_session(&session.id)
                .await
                .unwrap()
                .unwrap()
                .status();
            if status.is_mid_burst() {
                entered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(entered, "burst never reached countdown");

        let err = h.orchestrator.start_capture(&session.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        burst.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_capture_on_completed_session_rejected() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 1).await;

        let session = h.orchestrator.create_session().await.unwrap();
        h.orchestrator.end_session(&session.id).await.unwrap();

        let err = h.orchestrator.start_capture(&session.id).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed(_)));
    }

    #[tokio::test]
    async fn test_capture_unknown_session() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 1).await;

        let err = h.orchestrator.start_capture("nope").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_new_session_takeover_closes_connections() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 1).await;

        let first = h.orchestrator.create_session().await.unwrap();
        let (_phone, _, mut rx) = h.hub.register_phone(&first.id).await;

        let second = h.orchestrator.create_session().await.unwrap();

        let first = h.repository.get_session(&first.id).await.unwrap().unwrap();
        assert_eq!(first.status(), SessionStatus::Completed);
        let second = h.repository.get_session(&second.id).await.unwrap().unwrap();
        assert_eq!(second.status(), SessionStatus::Active);

        // Displaced session's phone got session_ended and then the close
        let mut last = None;
        while let Some(msg) = rx.recv().await {
            last = Some(msg);
        }
        assert!(last.unwrap().contains("session_ended"));
        assert_eq!(h.hub.phone_count(&first.id).await, 0);
    }

    #[tokio::test]
    async fn test_end_session_broadcasts_and_closes() {
        let camera = Arc::new(SyntheticGateway::new());
        let h = harness(camera, 1).await;

        let session = h.orchestrator.create_session().await.unwrap();
        let (_kiosk, mut kiosk_rx) = h.hub.register_kiosk(&session.id).await;

        let ended = h.orchestrator.end_session(&session.id).await.unwrap();
        assert_eq!(ended.status(), SessionStatus::Completed);

        let mut last = None;
        while let Some(msg) = kiosk_rx.recv().await {
            last = Some(msg);
        }
        assert!(last.unwrap().contains("session_ended"));
        assert!(!h.hub.has_kiosk(&session.id).await);
    }
}
