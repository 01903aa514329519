//! PreviewGate - preview/capture hand-off
//!
//! ## Responsibilities
//!
//! - Single shared gate between the live preview stream and capture bursts
//! - Preview consults `wait_until_allowed` before every frame attempt
//! - The capture sequencer pauses the gate for the duration of a burst
//!
//! Without the gate, preview frame requests and captures would race for the
//! same device lock. The gate turns that race into a deterministic hand-off:
//! the burst pauses preview, runs to completion, and the returned permit
//! resumes preview when dropped, on every exit path.

use tokio::sync::watch;

/// Preview/capture coordination gate. Initial state is "preview allowed".
pub struct PreviewGate {
    allowed: watch::Sender<bool>,
}

impl PreviewGate {
    /// Create a new gate in the allowed state
    pub fn new() -> Self {
        let (allowed, _) = watch::channel(true);
        Self { allowed }
    }

    /// Clear the gate. Preview frame attempts suspend until the returned
    /// permit is dropped (or `resume` is called).
    pub fn pause(&self) -> PausePermit {
        self.allowed.send_replace(false);
        tracing::debug!("preview paused for capture");
        PausePermit {
            allowed: self.allowed.clone(),
        }
    }

    /// Set the gate, releasing all suspended preview callers
    pub fn resume(&self) {
        self.allowed.send_replace(true);
        tracing::debug!("preview resumed");
    }

    /// Suspend until the gate is set
    pub async fn wait_until_allowed(&self) {
        let mut rx = self.allowed.subscribe();
        // Only fails if the sender is gone, in which case nothing is gated
        let _ = rx.wait_for(|allowed| *allowed).await;
    }

    /// Snapshot of the gate state
    pub fn is_paused(&self) -> bool {
        !*self.allowed.borrow()
    }
}

impl Default for PreviewGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Pause permit - resumes preview on drop
pub struct PausePermit {
    allowed: watch::Sender<bool>,
}

impl Drop for PausePermit {
    fn drop(&mut self) {
        self.allowed.send_replace(true);
        tracing::debug!("preview resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_initially_allowed() {
        let gate = PreviewGate::new();
        assert!(!gate.is_paused());

        // Must not block
        timeout(Duration::from_millis(50), gate.wait_until_allowed())
            .await
            .expect("gate should be open initially");
    }

    #[tokio::test]
    async fn test_pause_blocks_waiters() {
        let gate = PreviewGate::new();
        let permit = gate.pause();
        assert!(gate.is_paused());

        let blocked = timeout(Duration::from_millis(50), gate.wait_until_allowed()).await;
        assert!(blocked.is_err(), "waiter should suspend while paused");

        drop(permit);
        timeout(Duration::from_millis(50), gate.wait_until_allowed())
            .await
            .expect("permit drop should release waiters");
    }

    #[tokio::test]
    async fn test_resume_releases_concurrent_waiter() {
        let gate = std::sync::Arc::new(PreviewGate::new());
        let permit = gate.pause();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait_until_allowed().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should finish after resume")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn test_paused_gate_keeps_frames_from_camera() {
        use crate::camera_gateway::{CameraGateway, SyntheticGateway};

        let gate = std::sync::Arc::new(PreviewGate::new());
        let camera = std::sync::Arc::new(SyntheticGateway::new());
        camera.connect().await.unwrap();

        let permit = gate.pause();

        let frame_task = {
            let gate = gate.clone();
            let camera = camera.clone();
            tokio::spawn(async move {
                gate.wait_until_allowed().await;
                camera.preview_frame().await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            !frame_task.is_finished(),
            "frame request must not reach the camera while paused"
        );

        drop(permit);
        let frame = timeout(Duration::from_millis(200), frame_task)
            .await
            .expect("frame request should complete after resume")
            .expect("task should not panic")
            .expect("frame should succeed");
        assert_eq!(&frame[0..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_explicit_resume() {
        let gate = PreviewGate::new();
        let permit = gate.pause();
        gate.resume();
        assert!(!gate.is_paused());
        // Dropping the stale permit afterwards keeps the gate open
        drop(permit);
        assert!(!gate.is_paused());
    }
}
