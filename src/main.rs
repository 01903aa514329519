//! Booth Server
//!
//! Main entry point for the photo booth application.

use booth_server::{
    camera_gateway::create_camera,
    capture_orchestrator::{CaptureOrchestrator, CaptureSettings},
    db,
    photo_pipeline::PhotoProcessor,
    preview_gate::PreviewGate,
    realtime_hub::BoothHub,
    session_repository::SessionRepository,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booth_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Booth Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        public_url = %config.public_url,
        photos_dir = %config.photos_dir.display(),
        camera_backend = %config.camera_backend,
        photos_per_capture = config.photos_per_capture,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.photos_dir).await?;

    // Database
    let pool = db::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    // Core services
    let camera = create_camera(&config.camera_backend);
    let preview_gate = Arc::new(PreviewGate::new());
    let hub = Arc::new(BoothHub::new());
    let repository = SessionRepository::new(pool.clone());
    let processor = Arc::new(PhotoProcessor::new(
        config.photos_dir.clone(),
        config.web_max_width,
        config.thumbnail_max_width,
    ));

    let orchestrator = Arc::new(CaptureOrchestrator::new(
        camera.clone(),
        preview_gate.clone(),
        hub.clone(),
        repository.clone(),
        processor.clone(),
        CaptureSettings {
            photos_per_burst: config.photos_per_capture,
            countdown_seconds: config.countdown_seconds,
            settle_delay: Duration::from_millis(config.capture_delay_ms),
            save_raw: config.save_raw_images,
            session_expiry_minutes: config.session_expiry_minutes,
            public_url: config.public_url.clone(),
            photos_dir: config.photos_dir.clone(),
        },
    ));
    tracing::info!("CaptureOrchestrator initialized");

    // An initial connect is best-effort; the preview stream reconnects with
    // backoff once a camera shows up
    match camera.connect().await {
        Ok(()) => tracing::info!("Camera connected at startup"),
        Err(e) => tracing::warn!(error = %e, "Camera not available at startup"),
    }

    let state = AppState {
        pool,
        config: config.clone(),
        camera: camera.clone(),
        preview_gate,
        hub,
        repository,
        processor,
        orchestrator,
    };

    // Router with photo + frontend static serving
    let frontend_index = config.frontend_dir.join("index.html");
    let serve_frontend =
        ServeDir::new(&config.frontend_dir).not_found_service(ServeFile::new(frontend_index));

    let app = web_api::create_router(state)
        .nest_service("/photos", ServeDir::new(&config.photos_dir))
        .fallback_service(serve_frontend)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::info!(frontend_dir = %config.frontend_dir.display(), "Static file serving enabled");

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(camera))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then release the camera before the process exits
async fn shutdown_signal(camera: Arc<dyn booth_server::camera_gateway::CameraGateway>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }

    tracing::info!("Shutting down, disconnecting camera");
    camera.disconnect().await;
}
