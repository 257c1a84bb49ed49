//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::cache::Cache;
use crate::chat;
use crate::config::Config;
use crate::email::EmailService;
use crate::meetings;
use crate::minutes;
use crate::minutes::llm::LlmClient;
use crate::queue::JobQueue;
use crate::ratelimit::rate_limit_global;
use crate::recordings;
use crate::ws;
use crate::ws::rooms::RoomRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Server configuration
    pub config: Arc<Config>,
    /// Cache / presence store (degrades to no-ops without Redis)
    pub cache: Cache,
    /// Job queue (falls back to in-process execution without Redis)
    pub queue: Arc<JobQueue>,
    /// In-memory room registry for socket fan-out
    pub rooms: Arc<RoomRegistry>,
    /// Email service (optional, requires SMTP configuration)
    pub email: Option<Arc<EmailService>>,
    /// LLM client for minutes generation (optional, requires API key)
    pub llm: Option<Arc<LlmClient>>,
}

impl AppState {
    /// Assemble the context handed to job handlers. The HTTP minutes
    /// endpoint uses the same context to run the pipeline synchronously.
    #[must_use]
    pub fn job_context(&self) -> crate::queue::JobContext {
        crate::queue::JobContext {
            db: self.db.clone(),
            config: Arc::clone(&self.config),
            cache: self.cache.clone(),
            email: self.email.clone(),
            llm: self.llm.clone(),
            queue: Arc::clone(&self.queue),
        }
    }
}

/// Standard JSON envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Always true for successful responses.
    pub success: bool,
    /// Human-readable status message.
    pub message: String,
    /// Response payload, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Build a success envelope with a payload.
pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    })
}

/// Build a success envelope without a payload.
pub fn ok_empty(message: impl Into<String>) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data: None,
    })
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    // CORS is restricted to the configured client origin; development
    // without CLIENT_URL allows any origin.
    let cors = match state.config.client_url.as_deref() {
        Some(origin) => {
            let parsed = origin.parse::<HeaderValue>().ok();
            if parsed.is_none() {
                tracing::error!(origin = %origin, "Invalid CLIENT_URL, cross-origin requests will fail");
            }
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, AUTHORIZATION])
                .allow_credentials(true)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let api: Router<AppState> = Router::new()
        .nest("/api/auth", auth::router(state.clone()))
        .nest("/api/meetings", meetings::router(state.clone()))
        .nest("/api/chat", chat::router(state.clone()))
        .nest("/api/recordings", recordings::router(state.clone()))
        .nest("/api/meeting-minutes", minutes::router(state.clone()))
        .layer(from_fn_with_state(state.clone(), rate_limit_global));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::handler))
        .merge(api)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe.
async fn health() -> Json<ApiResponse<()>> {
    ok_empty("ok")
}
