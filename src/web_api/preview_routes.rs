//! Live preview endpoints
//!
//! MJPEG stream for the kiosk viewfinder plus a single-frame pull for
//! polling clients. The stream consults the preview gate before every frame
//! attempt, so captures always win the device; frame errors back off and
//! retry until the consumer disconnects.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

use crate::error::Result;
use crate::state::AppState;

const MJPEG_BOUNDARY: &str = "booth_frame";
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    fps: Option<u32>,
}

/// Stream live camera preview as MJPEG (`multipart/x-mixed-replace`).
///
/// Usable directly in an `<img>` tag:
///
///     <img src="/api/camera/preview" />
///     <img src="/api/camera/preview?fps=15" />
///
/// The stream never terminates on camera errors; it reconnects with bounded
/// backoff until the client goes away.
pub async fn preview_stream(
    State(state): State<AppState>,
    Query(params): Query<PreviewParams>,
) -> impl IntoResponse {
    let fps = params.fps.unwrap_or(30).min(60);
    let frame_interval = if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(1000 / fps as u64)
    };

    let camera = state.camera.clone();
    let gate = state.preview_gate.clone();

    let stream = async_stream::stream! {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            // A running capture burst holds the gate; suspend here instead
            // of contending for the device lock
            gate.wait_until_allowed().await;

            if camera.ensure_connected().await.is_err() {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            match camera.preview_frame().await {
                Ok(frame) => {
                    backoff = INITIAL_BACKOFF;
                    yield Ok::<Bytes, Infallible>(mjpeg_part(&frame));
                    if !frame_interval.is_zero() {
                        tokio::time::sleep(frame_interval).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Preview frame failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
        ],
        Body::from_stream(stream),
    )
}

/// Single preview frame for polling clients
pub async fn preview_frame(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.preview_gate.wait_until_allowed().await;
    state.camera.ensure_connected().await?;
    let frame = state.camera.preview_frame().await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        frame,
    ))
}

/// Preview/camera status snapshot
pub async fn preview_status(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.camera.is_connected().await;
    Json(json!({
        "connected": connected,
        "supports_preview": connected && state.camera.supports_preview(),
        "preview_paused": state.preview_gate.is_paused(),
    }))
}

/// One multipart MJPEG part: boundary, headers with byte length, JPEG data
fn mjpeg_part(frame: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        frame.len()
    );

    let mut part = Vec::with_capacity(head.len() + frame.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(frame);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let text = String::from_utf8_lossy(&part[..part.len() - 6]);
        assert!(text.starts_with("--booth_frame\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(part.ends_with(b"\r\n"));
    }
}
