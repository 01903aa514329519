//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{
    CreateSessionResponse, GalleryResponse, PhotoResponse, SessionResponse,
};
use crate::qr_service;
use crate::realtime_hub::{BoothEvent, ClientMessage, PhotoSummary};
use crate::session_repository::SessionRow;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(super::health_check))
        .route("/api/health", get(super::health_check))
        // Sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/wifi-qr", get(global_wifi_qr))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/gallery", get(get_gallery))
        .route("/api/sessions/:id/capture", post(capture_photos))
        .route("/api/sessions/:id/end", post(end_session))
        .route("/api/sessions/:id/qr", get(session_qr))
        .route("/api/sessions/:id/wifi-qr", get(session_wifi_qr))
        .route("/api/sessions/:id/strip", get(session_strip))
        // Photos
        .route("/api/sessions/:id/photos", get(list_photos))
        .route(
            "/api/sessions/:id/photos/:photo_id/download",
            get(download_photo),
        )
        // Live preview
        .route("/api/camera/preview", get(super::preview_routes::preview_stream))
        .route(
            "/api/camera/preview/frame",
            get(super::preview_routes::preview_frame),
        )
        .route(
            "/api/camera/preview/status",
            get(super::preview_routes::preview_status),
        )
        // WebSocket channels
        .route("/ws/kiosk/:session_id", get(kiosk_websocket))
        .route("/ws/phone/:session_id", get(phone_websocket))
        // Captive portal (root level for device compatibility)
        .merge(super::captive_routes::captive_router())
        .with_state(state)
}

// ========================================
// Session Handlers
// ========================================

async fn create_session(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let session = state.orchestrator.create_session().await?;

    let response = CreateSessionResponse {
        id: session.id.clone(),
        upload_token: session.upload_token.clone(),
        gallery_url: state.config.gallery_url(&session.id),
        qr_code_url: state.config.qr_code_url(&session.id),
        wifi_qr_url: state.config.wifi_qr_url(&session.id),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let session = require_session(&state, &id).await?;
    Ok(Json(session_response(&state, &session).await))
}

async fn get_gallery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GalleryResponse>> {
    let session = require_session(&state, &id).await?;
    Ok(Json(gallery_response(&state, &session).await?))
}

/// Trigger the capture burst and return the resulting gallery. Runs the
/// full sequence: countdown ticks, shutters, background processing, fan-out.
async fn capture_photos(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GalleryResponse>> {
    state.orchestrator.start_capture(&id).await?;

    let session = require_session(&state, &id).await?;
    Ok(Json(gallery_response(&state, &session).await?))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let session = state.orchestrator.end_session(&id).await?;
    Ok(Json(session_response(&state, &session).await))
}

// ========================================
// QR / Strip Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct QrParams {
    size: Option<u32>,
}

fn qr_size(params: &QrParams) -> u32 {
    params.size.unwrap_or(256).clamp(64, 512)
}

async fn session_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<QrParams>,
) -> Result<impl IntoResponse> {
    let session = require_session(&state, &id).await?;
    let png = qr_service::render_qr_png(&state.config.gallery_url(&session.id), qr_size(&params))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, "max-age=3600".to_string()),
        ],
        png,
    ))
}

async fn session_wifi_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<QrParams>,
) -> Result<impl IntoResponse> {
    require_session(&state, &id).await?;
    let payload = qr_service::wifi_payload(&state.config.wifi_ssid, &state.config.wifi_password);
    let png = qr_service::render_qr_png(&payload, qr_size(&params))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, "max-age=3600".to_string()),
        ],
        png,
    ))
}

/// WiFi QR with no session required (kiosk idle screen)
async fn global_wifi_qr(
    State(state): State<AppState>,
    Query(params): Query<QrParams>,
) -> Result<impl IntoResponse> {
    let payload = qr_service::wifi_payload(&state.config.wifi_ssid, &state.config.wifi_password);
    let png = qr_service::render_qr_png(&payload, qr_size(&params))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        png,
    ))
}

async fn session_strip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let session = require_session(&state, &id).await?;
    let photos = state.repository.list_photos(&session.id).await?;
    if photos.is_empty() {
        return Err(Error::NotFound("no photos in session".to_string()));
    }

    // Latest burst only: the strip shows the last photos_per_capture shots
    let take = state.config.photos_per_capture as usize;
    let start = photos.len().saturating_sub(take);
    let rel_paths: Vec<String> = photos[start..].iter().map(|p| p.web_path.clone()).collect();

    let strip = state.processor.compose_strip(&rel_paths).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "inline; filename=\"booth_strip_{}.jpg\"",
                    &session.id[..8.min(session.id.len())]
                ),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        strip,
    ))
}

// ========================================
// Photo Handlers
// ========================================

async fn list_photos(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PhotoResponse>>> {
    let session = require_session(&state, &id).await?;
    let photos = state.repository.list_photos(&session.id).await?;

    let responses = photos
        .iter()
        .map(|p| {
            PhotoResponse::from_row(
                p,
                state.processor.photo_url(&p.web_path),
                state.processor.photo_url(&p.thumbnail_path),
            )
        })
        .collect();

    Ok(Json(responses))
}

async fn download_photo(
    State(state): State<AppState>,
    Path((id, photo_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let photo = state
        .repository
        .get_photo(&id, &photo_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("photo {} not found", photo_id)))?;

    let path = state.processor.photo_path(&photo.web_path);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| Error::NotFound("photo file not found".to_string()))?;

    let filename = format!(
        "booth_{}_{:02}.jpg",
        &id[..8.min(id.len())],
        photo.sequence
    );

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    ))
}

// ========================================
// Shared helpers
// ========================================

async fn require_session(state: &AppState, id: &str) -> Result<SessionRow> {
    state
        .repository
        .get_session(id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(id.to_string()))
}

async fn session_response(state: &AppState, session: &SessionRow) -> SessionResponse {
    SessionResponse::from_row(
        session,
        state.hub.has_kiosk(&session.id).await,
        state.hub.phone_count(&session.id).await,
    )
}

async fn gallery_response(state: &AppState, session: &SessionRow) -> Result<GalleryResponse> {
    let photos = state.repository.list_photos(&session.id).await?;
    let strip_url = if photos.is_empty() {
        None
    } else {
        Some(state.config.strip_url(&session.id))
    };

    let photo_responses = photos
        .iter()
        .map(|p| {
            PhotoResponse::from_row(
                p,
                state.processor.photo_url(&p.web_path),
                state.processor.photo_url(&p.thumbnail_path),
            )
        })
        .collect();

    Ok(GalleryResponse {
        session: session_response(state, session).await,
        photos: photo_responses,
        qr_code_url: state.config.qr_code_url(&session.id),
        strip_url,
    })
}

// ========================================
// WebSocket Handlers
// ========================================

/// Kiosk WebSocket upgrade. The session is verified before the upgrade, so
/// a dead session id is rejected at the handshake.
async fn kiosk_websocket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let session = require_session(&state, &session_id).await?;
    if session.status().is_terminal() {
        return Err(Error::SessionClosed(format!(
            "session {} already {}",
            session.id,
            session.status()
        )));
    }

    Ok(ws.on_upgrade(move |socket| handle_kiosk_socket(socket, state, session_id)))
}

async fn handle_kiosk_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.hub.register_kiosk(&session_id).await;

    state
        .hub
        .send_to_connection(
            conn_id,
            &BoothEvent::KioskConnected {
                session_id: session_id.clone(),
                phone_count: state.hub.phone_count(&session_id).await,
            },
        )
        .await;

    // Forward hub events to the wire
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_state = state.clone();
    let recv_session = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {
                        recv_state
                            .hub
                            .send_to_connection(conn_id, &BoothEvent::Pong)
                            .await;
                    }
                    Ok(ClientMessage::StartCapture) => {
                        // Captures run over HTTP so errors reach the caller;
                        // the socket command only acknowledges
                        recv_state
                            .hub
                            .send_to_connection(
                                conn_id,
                                &BoothEvent::Ack {
                                    session_id: recv_session.clone(),
                                    action: "start_capture".to_string(),
                                },
                            )
                            .await;
                    }
                    Ok(ClientMessage::EndSession) => {
                        if let Err(e) = recv_state.orchestrator.end_session(&recv_session).await {
                            tracing::warn!(
                                session_id = %recv_session,
                                error = %e,
                                "Kiosk end_session failed"
                            );
                        }
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(session_id = %recv_session, "Ignoring unknown kiosk message");
                    }
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(session_id = %recv_session, error = %e, "Kiosk WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state.hub.unregister(conn_id).await;
}

/// Phone WebSocket upgrade, same session verification as the kiosk.
async fn phone_websocket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let session = require_session(&state, &session_id).await?;
    if session.status().is_terminal() {
        return Err(Error::SessionClosed(format!(
            "session {} already {}",
            session.id,
            session.status()
        )));
    }

    Ok(ws.on_upgrade(move |socket| handle_phone_socket(socket, state, session_id)))
}

async fn handle_phone_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, phone_id, mut rx) = state.hub.register_phone(&session_id).await;

    // Current session snapshot so a late joiner sees existing photos
    match state.repository.list_photos(&session_id).await {
        Ok(photos) => {
            let summaries = photos
                .iter()
                .map(|p| PhotoSummary {
                    id: p.id.clone(),
                    sequence: p.sequence,
                    web_url: state.processor.photo_url(&p.web_path),
                    thumbnail_url: state.processor.photo_url(&p.thumbnail_path),
                })
                .collect();
            state
                .hub
                .send_to_connection(
                    conn_id,
                    &BoothEvent::SessionState {
                        session_id: session_id.clone(),
                        phone_id: phone_id.clone(),
                        photos: summaries,
                        kiosk_connected: state.hub.has_kiosk(&session_id).await,
                    },
                )
                .await;
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Session snapshot failed");
        }
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_state = state.clone();
    let recv_session = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if let Ok(ClientMessage::Ping) = serde_json::from_str::<ClientMessage>(&text) {
                        recv_state
                            .hub
                            .send_to_connection(conn_id, &BoothEvent::Pong)
                            .await;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(
                        session_id = %recv_session,
                        error = %e,
                        "Phone WebSocket error"
                    );
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state.hub.unregister(conn_id).await;
}
