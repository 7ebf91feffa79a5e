//! HTTP front door: `POST /<token>` with a JSON body, PNG out.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use log::{error, info};
use serde::Serialize;
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::config::ServerConfig;
use crate::{validate_with_profile, Capturer, DeviceProfile, Error, FinalImage};

/// Shared per-server state; every request still gets its own session.
#[derive(Clone)]
pub struct AppState {
    capturer: Capturer,
    token: Arc<str>,
    default_profile: Arc<DeviceProfile>,
}

impl AppState {
    pub fn new(capturer: Capturer, token: impl Into<Arc<str>>, default_profile: DeviceProfile) -> Self {
        Self {
            capturer,
            token: token.into(),
            default_profile: Arc::new(default_profile),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

fn image_response(image: FinalImage) -> Response {
    let length = image.len();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        image.into_bytes(),
    )
        .into_response()
}

/// Build the router. Every method and path reaches the same handler, which
/// checks the method first and the token second.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .fallback(handle)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed. Use POST instead.", "");
    }

    let presented = uri.path().split('/').find(|s| !s.is_empty()).unwrap_or("");
    if !bool::from(presented.as_bytes().ct_eq(state.token.as_bytes())) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid token", "");
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!("Error: {}", rejection.body_text());
            let status = rejection.status();
            return error_response(status, status.canonical_reason().unwrap_or("Bad Request"), rejection.body_text());
        }
    };

    let request = match parse_body(&body).and_then(|v| validate_with_profile(v, &state.default_profile)) {
        Ok(request) => request,
        Err(err) => {
            error!("Error: {}", err);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", err.to_string());
        }
    };

    match state.capturer.capture(request).await {
        Ok(image) => image_response(image),
        Err(failure) => {
            error!("Error: {}", failure);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", failure.to_string())
        }
    }
}

/// An empty body is treated as `{}`.
fn parse_body(body: &[u8]) -> crate::Result<Value> {
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| Error::InvalidParameters(format!("Malformed JSON body: {}", e)))
}

/// Bind and serve until Ctrl-C, then let in-flight captures finish.
pub async fn serve(config: &ServerConfig, capturer: Capturer) -> std::io::Result<()> {
    let state = AppState::new(capturer, config.token.as_str(), config.default_profile.clone());
    let app = router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("Screenshot API listening at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down; draining in-flight captures");
}
