//! Meeting Minutes
//!
//! AI-generated structured summaries: generation pipeline, LLM client, and
//! the HTTP surface.

mod handlers;
pub mod llm;
pub mod pipeline;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

use crate::api::AppState;
use crate::auth::require_auth;

/// Create the meeting-minutes router. Every route requires a bearer token.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list))
        .route("/{meeting_id}/generate", post(handlers::generate))
        .route("/{meeting_id}", get(handlers::get))
        .route("/{meeting_id}/resend-email", post(handlers::resend_email))
        .layer(axum_middleware::from_fn_with_state(state, require_auth))
}
