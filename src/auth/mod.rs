//! Authentication
//!
//! Bearer-token auth, password hashing, guest sessions, and the auth router.

mod handlers;
pub mod jwt;
mod middleware;
pub mod password;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};

use crate::api::AppState;
use crate::ratelimit::{rate_limit_login, rate_limit_register};

pub use middleware::{require_auth, AuthUser};

/// Create the authentication router.
///
/// Public routes:
/// - POST /register - Register a new account
/// - POST /login - Login with email/password
/// - POST /guest - Create a guest session
///
/// Protected routes:
/// - GET /me - Current user profile
/// - PUT /profile - Merge profile/preferences
/// - POST /logout - Stamp last seen
pub fn router(state: AppState) -> Router<AppState> {
    let login_route = Router::new()
        .route("/login", post(handlers::login))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_login,
        ));

    let register_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/guest", post(handlers::guest))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_register,
        ));

    let protected_routes = Router::new()
        .route("/me", get(handlers::me))
        .route("/profile", put(handlers::update_profile))
        .route("/logout", post(handlers::logout))
        .layer(axum_middleware::from_fn_with_state(state, require_auth));

    login_route.merge(register_routes).merge(protected_routes)
}
