//! Captive portal endpoints
//!
//! OS captive-portal probes get the "internet works" answers they expect so
//! phones stay on the booth WiFi, while `/portal` lands new joiners on the
//! active session's gallery.

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::state::AppState;

/// Portal landing page shown while a session is active
const PORTAL_HTML_ACTIVE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0, user-scalable=no">
    <title>SnapBooth</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #8B5CF6 0%, #EC4899 100%);
            min-height: 100vh;
            display: flex; align-items: center; justify-content: center;
            padding: 20px;
        }
        .container {
            background: white; border-radius: 24px; padding: 40px 30px;
            text-align: center; max-width: 360px; width: 100%;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
        }
        .logo { font-size: 48px; margin-bottom: 10px; }
        h1 { color: #8B5CF6; font-size: 32px; margin-bottom: 10px; }
        p { color: #666; margin-bottom: 20px; font-size: 16px; line-height: 1.5; }
        .button {
            display: block; width: 100%; border: none; cursor: pointer;
            background: linear-gradient(135deg, #8B5CF6 0%, #EC4899 100%);
            color: white; padding: 18px 40px; border-radius: 50px;
            font-size: 18px; font-weight: 600;
        }
        .url-box {
            background: #eee; padding: 10px; border-radius: 8px; margin-top: 15px;
            font-family: monospace; font-size: 14px; word-break: break-all; color: #8B5CF6;
        }
        .hint { margin-top: 15px; font-size: 12px; color: #999; }
    </style>
</head>
<body>
    <div class="container">
        <div class="logo">&#128248;</div>
        <h1>SnapBooth</h1>
        <p>You're connected to the photo booth!</p>
        <button class="button" onclick="openSession()">Open Photo Booth</button>
        <p class="hint">If nothing opens, visit this address in your browser:</p>
        <div class="url-box">SESSION_URL</div>
    </div>
    <script>
        function openSession() {
            // The success endpoint tells iOS the portal is done, then
            // forwards to the session gallery
            window.location.href = "/captive-success?redirect=" + encodeURIComponent("SESSION_URL");
        }
    </script>
</body>
</html>
"#;

/// Portal landing page shown while no session is active; refreshes itself
const PORTAL_HTML_WAITING: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0, user-scalable=no">
    <meta http-equiv="refresh" content="5">
    <title>SnapBooth</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #8B5CF6 0%, #EC4899 100%);
            min-height: 100vh;
            display: flex; align-items: center; justify-content: center;
            padding: 20px;
        }
        .container {
            background: white; border-radius: 24px; padding: 40px 30px;
            text-align: center; max-width: 360px; width: 100%;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
        }
        .logo { font-size: 48px; margin-bottom: 10px; }
        h1 { color: #8B5CF6; font-size: 32px; margin-bottom: 10px; }
        p { color: #666; margin-bottom: 20px; font-size: 16px; }
        .spinner {
            width: 40px; height: 40px; margin: 20px auto;
            border: 4px solid #f3f3f3; border-top: 4px solid #8B5CF6;
            border-radius: 50%; animation: spin 1s linear infinite;
        }
        @keyframes spin { to { transform: rotate(360deg); } }
        .hint { font-size: 13px; color: #999; }
    </style>
</head>
<body>
    <div class="container">
        <div class="logo">&#128248;</div>
        <h1>SnapBooth</h1>
        <p>Waiting for the photo booth session to start...</p>
        <div class="spinner"></div>
        <p class="hint">This page will refresh automatically</p>
    </div>
</body>
</html>
"#;

const APPLE_SUCCESS: &str =
    "<HTML><HEAD><TITLE>Success</TITLE></HEAD><BODY>Success</BODY></HTML>";

/// Captive portal routes mounted at the root
pub fn captive_router() -> Router<AppState> {
    Router::new()
        .route("/generate_204", get(android_check))
        .route("/hotspot-detect.html", get(apple_check))
        .route("/library/test/success.html", get(apple_check))
        .route("/connecttest.txt", get(windows_check))
        .route("/ncsi.txt", get(windows_ncsi_check))
        .route("/success.txt", get(success_check))
        .route("/captive-success", get(captive_success))
        .route("/redirect", get(generic_redirect))
        .route("/portal", get(portal_page))
        .route("/favicon.ico", get(favicon))
}

/// Android probe: 204 means "internet works", no popup
async fn android_check() -> impl IntoResponse {
    axum::http::StatusCode::NO_CONTENT
}

/// Apple/iOS probe: "Success" means no popup, stay connected
async fn apple_check() -> Html<&'static str> {
    Html(APPLE_SUCCESS)
}

/// Windows probe
async fn windows_check() -> &'static str {
    "Microsoft Connect Test"
}

/// Windows NCSI probe
async fn windows_ncsi_check() -> &'static str {
    "Microsoft NCSI"
}

/// Generic success probe, prevents redirect loops after the portal closed
async fn success_check() -> &'static str {
    "success"
}

#[derive(Debug, Deserialize)]
struct CaptiveSuccessParams {
    redirect: Option<String>,
}

/// Tells iOS/Android the portal is complete, optionally forwarding to the
/// session gallery
async fn captive_success(Query(params): Query<CaptiveSuccessParams>) -> Html<String> {
    match params.redirect {
        Some(redirect) => Html(format!(
            r#"<HTML>
<HEAD>
<TITLE>Success</TITLE>
<meta http-equiv="refresh" content="0;url={url}">
</HEAD>
<BODY>
Success
<script>window.location.href = "{url}";</script>
</BODY>
</HTML>"#,
            url = redirect
        )),
        None => Html(APPLE_SUCCESS.to_string()),
    }
}

async fn generic_redirect() -> Redirect {
    Redirect::temporary("/portal")
}

/// Portal landing page: join button when a session is live, waiting page
/// otherwise
async fn portal_page(State(state): State<AppState>) -> Html<String> {
    let active = match state.repository.latest_active_session().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Portal session lookup failed");
            None
        }
    };

    match active {
        Some(session) => {
            let session_url = state.config.gallery_url(&session.id);
            Html(PORTAL_HTML_ACTIVE.replace("SESSION_URL", &session_url))
        }
        None => Html(PORTAL_HTML_WAITING.to_string()),
    }
}

/// Empty favicon to keep probe logs clean
async fn favicon() -> impl IntoResponse {
    axum::http::StatusCode::NO_CONTENT
}
