//! CameraGateway - single capture device behind a typed contract
//!
//! ## Responsibilities
//!
//! - connect/disconnect/capture/preview against one physical camera
//! - Serialize every device operation through one lock per gateway
//! - Force disconnected state after any device-level error
//!
//! Two backends satisfy the same contract: `GPhoto2Gateway` drives a tethered
//! camera through the gphoto2 CLI, `SyntheticGateway` generates deterministic
//! placeholder frames for demo and tests without hardware.
//!
//! The device is not assumed thread-safe. After a device error the camera
//! state is unknown, so the gateway drops to disconnected and lets the
//! caller (preview stream, capture sequencer) reconnect explicitly.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Connect/auto-detect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Full capture-and-download timeout
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
/// Single preview frame timeout
const PREVIEW_TIMEOUT: Duration = Duration::from_secs(5);

/// Abstract camera contract. The rest of the system depends only on this.
#[async_trait]
pub trait CameraGateway: Send + Sync {
    /// Connect to the camera. Idempotent: connecting while connected is a
    /// no-op success. Concurrent callers serialize on the gateway lock, so
    /// only one connection attempt runs; the rest observe its result.
    async fn connect(&self) -> Result<()>;

    /// Release the camera. Idempotent, never fails.
    async fn disconnect(&self);

    /// Capture a full-resolution image into `dest`. Requires connected
    /// state. A device error forces the gateway back to disconnected.
    async fn capture(&self, dest: &Path) -> Result<PathBuf>;

    /// Capture a single preview frame as JPEG bytes. Same preconditions
    /// and error policy as `capture`.
    async fn preview_frame(&self) -> Result<Bytes>;

    /// Snapshot of the connection state
    async fn is_connected(&self) -> bool;

    /// Whether the backend can produce live preview frames
    fn supports_preview(&self) -> bool {
        true
    }

    /// Connect if not already connected
    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }
        self.connect().await
    }
}

/// Select a backend by name ("gphoto2" or "synthetic")
pub fn create_camera(backend: &str) -> std::sync::Arc<dyn CameraGateway> {
    match backend {
        "synthetic" => std::sync::Arc::new(SyntheticGateway::new()),
        _ => std::sync::Arc::new(GPhoto2Gateway::new()),
    }
}

// ========================================
// gphoto2 backend
// ========================================

struct DeviceState {
    connected: bool,
}

/// Hardware gateway driving the gphoto2 CLI.
///
/// Each operation spawns a gphoto2 process with `kill_on_drop(true)` under a
/// timeout: if the timeout fires the future is cancelled, the Child is
/// dropped and the process receives SIGKILL, so an unresponsive camera
/// cannot accumulate zombie processes.
pub struct GPhoto2Gateway {
    state: Mutex<DeviceState>,
}

impl GPhoto2Gateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState { connected: false }),
        }
    }

    async fn run_gphoto2(args: &[&str], timeout: Duration) -> Result<Vec<u8>> {
        let child = Command::new("gphoto2")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CameraUnavailable(format!("gphoto2 spawn failed: {}", e)))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::CaptureFailed(format!(
                        "gphoto2 failed: {}",
                        stderr.trim()
                    )));
                }
                Ok(output.stdout)
            }
            Ok(Err(e)) => Err(Error::CaptureFailed(format!(
                "gphoto2 execution failed: {}",
                e
            ))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = timeout.as_secs(),
                    "gphoto2 timeout, process killed via kill_on_drop"
                );
                Err(Error::CaptureFailed(format!(
                    "gphoto2 timeout ({}s)",
                    timeout.as_secs()
                )))
            }
        }
    }
}

impl Default for GPhoto2Gateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraGateway for GPhoto2Gateway {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connected {
            tracing::debug!("camera already connected");
            return Ok(());
        }

        let stdout = Self::run_gphoto2(&["--auto-detect"], CONNECT_TIMEOUT)
            .await
            .map_err(|e| Error::CameraUnavailable(e.to_string()))?;

        let listing = String::from_utf8_lossy(&stdout);
        let detected = listing.lines().any(|line| line.contains("usb:"));
        if !detected {
            return Err(Error::CameraUnavailable("no camera detected".to_string()));
        }

        state.connected = true;
        tracing::info!(camera = %listing.lines().last().unwrap_or("").trim(), "Camera connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.connected {
            state.connected = false;
            tracing::info!("Camera disconnected");
        }
    }

    async fn capture(&self, dest: &Path) -> Result<PathBuf> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::NotConnected);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let dest_str = dest.to_string_lossy().to_string();
        let result = Self::run_gphoto2(
            &[
                "--capture-image-and-download",
                "--filename",
                &dest_str,
                "--force-overwrite",
            ],
            CAPTURE_TIMEOUT,
        )
        .await;

        match result {
            Ok(_) => {
                if !dest.exists() {
                    // Download reported success but produced nothing, camera
                    // state is no longer trustworthy
                    state.connected = false;
                    return Err(Error::CaptureFailed(
                        "capture produced no output file".to_string(),
                    ));
                }
                tracing::info!(path = %dest.display(), "Capture downloaded");
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                state.connected = false;
                tracing::error!(error = %e, "Capture failed, forcing disconnect");
                Err(Error::CaptureFailed(e.to_string()))
            }
        }
    }

    async fn preview_frame(&self) -> Result<Bytes> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::NotConnected);
        }

        match Self::run_gphoto2(&["--capture-preview", "--stdout"], PREVIEW_TIMEOUT).await {
            Ok(frame) if !frame.is_empty() => Ok(Bytes::from(frame)),
            Ok(_) => {
                state.connected = false;
                Err(Error::CaptureFailed("empty preview frame".to_string()))
            }
            Err(e) => {
                state.connected = false;
                tracing::warn!(error = %e, "Preview frame failed, forcing disconnect");
                Err(Error::CaptureFailed(e.to_string()))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

// ========================================
// Synthetic backend
// ========================================

/// Placeholder color palette cycled by the frame counters
const PALETTE: [[u8; 3]; 5] = [
    [75, 0, 130],   // indigo
    [138, 43, 226], // blue violet
    [255, 20, 147], // deep pink
    [0, 191, 255],  // deep sky blue
    [50, 205, 50],  // lime green
];

const CAPTURE_WIDTH: u32 = 1920;
const CAPTURE_HEIGHT: u32 = 1280;
const PREVIEW_WIDTH: u32 = 640;
const PREVIEW_HEIGHT: u32 = 480;

struct SyntheticState {
    connected: bool,
    capture_count: u64,
    preview_count: u64,
}

/// Deterministic synthetic camera for demo/tests without hardware.
///
/// Output depends only on internal frame counters, never on wall clock or
/// randomness: identical call sequences produce identical bytes.
pub struct SyntheticGateway {
    state: Mutex<SyntheticState>,
}

impl SyntheticGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                connected: false,
                capture_count: 0,
                preview_count: 0,
            }),
        }
    }

    fn placeholder_frame(width: u32, height: u32, counter: u64) -> RgbImage {
        let bg = PALETTE[(counter as usize) % PALETTE.len()];
        let band_x = ((counter * 16) % width as u64) as u32;
        let border = width / 48;

        RgbImage::from_fn(width, height, |x, y| {
            let on_border = x < border
                || y < border
                || x >= width - border
                || y >= height - border;
            let on_band = x >= band_x && x < band_x + border;
            if on_border || on_band {
                Rgb([255, 255, 255])
            } else {
                Rgb(bg)
            }
        })
    }

    fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .encode_image(img)
            .map_err(|e| Error::Internal(format!("placeholder encode failed: {}", e)))?;
        Ok(buf)
    }
}

impl Default for SyntheticGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraGateway for SyntheticGateway {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }
        state.connected = true;
        tracing::info!("Synthetic camera connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.connected = false;
        tracing::info!("Synthetic camera disconnected");
    }

    async fn capture(&self, dest: &Path) -> Result<PathBuf> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.capture_count += 1;

        let img = Self::placeholder_frame(CAPTURE_WIDTH, CAPTURE_HEIGHT, state.capture_count);
        let jpeg = Self::encode_jpeg(&img, 95)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &jpeg).await?;

        tracing::info!(
            path = %dest.display(),
            frame = state.capture_count,
            "Synthetic capture saved"
        );
        Ok(dest.to_path_buf())
    }

    async fn preview_frame(&self) -> Result<Bytes> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.preview_count += 1;

        let img = Self::placeholder_frame(PREVIEW_WIDTH, PREVIEW_HEIGHT, state.preview_count);
        let jpeg = Self::encode_jpeg(&img, 80)?;
        Ok(Bytes::from(jpeg))
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_idempotent() {
        let camera = SyntheticGateway::new();
        assert!(!camera.is_connected().await);

        camera.connect().await.unwrap();
        assert!(camera.is_connected().await);

        // Second connect is a no-op success
        camera.connect().await.unwrap();
        assert!(camera.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let camera = SyntheticGateway::new();
        camera.connect().await.unwrap();
        camera.disconnect().await;
        camera.disconnect().await;
        assert!(!camera.is_connected().await);
    }

    #[tokio::test]
    async fn test_capture_requires_connection() {
        let camera = SyntheticGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpg");

        let err = camera.capture(&dest).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_preview_requires_connection() {
        let camera = SyntheticGateway::new();
        let err = camera.preview_frame().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_capture_writes_jpeg() {
        let camera = SyntheticGateway::new();
        camera.connect().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("photo.jpg");
        let path = camera.capture(&dest).await.unwrap();

        let data = std::fs::read(path).unwrap();
        assert_eq!(&data[0..2], &[0xFF, 0xD8], "JPEG magic bytes");
    }

    #[tokio::test]
    async fn test_preview_frames_deterministic() {
        let a = SyntheticGateway::new();
        let b = SyntheticGateway::new();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let fa = a.preview_frame().await.unwrap();
        let fb = b.preview_frame().await.unwrap();
        assert_eq!(fa, fb, "same counter state must yield identical bytes");

        // Consecutive frames differ (counter advanced)
        let fa2 = a.preview_frame().await.unwrap();
        assert_ne!(fa, fa2);
    }

    #[tokio::test]
    async fn test_sustained_preview_rate() {
        let camera = SyntheticGateway::new();
        camera.connect().await.unwrap();
        for _ in 0..60 {
            let frame = camera.preview_frame().await.unwrap();
            assert_eq!(&frame[0..2], &[0xFF, 0xD8]);
        }
    }
}
