//! Meetings
//!
//! Meeting lifecycle: creation, scheduling, join/leave with host
//! succession, settings, transcripts, and the ICE configuration endpoint.

pub mod code;
mod handlers;
pub mod permissions;
pub mod service;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};

use crate::api::AppState;
use crate::auth::require_auth;

pub use handlers::{populate_meeting, MeetingView};

/// Create the meetings router. Every route requires a bearer token.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create).get(handlers::list))
        .route("/schedule", post(handlers::schedule))
        .route("/ice-servers", get(handlers::ice_servers))
        .route("/{meeting_id}", get(handlers::get))
        .route("/{meeting_id}/join", post(handlers::join))
        .route("/{meeting_id}/leave", post(handlers::leave))
        .route("/{meeting_id}/settings", put(handlers::update_settings))
        .route("/{meeting_id}/end", post(handlers::end))
        .route("/{meeting_id}/cancel", post(handlers::cancel))
        .route(
            "/{meeting_id}/transcripts",
            post(handlers::add_transcripts).get(handlers::get_transcripts),
        )
        .layer(axum_middleware::from_fn_with_state(state, require_auth))
}
