//! Authentication Middleware

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::jwt::{user_id_from_claims, validate_token};
use crate::api::AppState;
use crate::db::{users, User};
use crate::error::ApiError;

/// Authenticated user injected into request extensions.
///
/// A minimal snapshot of safe-to-expose user data for handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User ID.
    pub id: Uuid,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Whether this is a guest account.
    pub is_guest: bool,
    /// Display name (profile display name or username).
    pub display_name: String,
    /// Avatar URL (if set).
    pub avatar: Option<String>,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        let display_name = user.display_name().to_string();
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_guest: user.is_guest,
            display_name,
            avatar: user.profile.0.avatar,
        }
    }
}

/// Middleware to require authentication.
///
/// Extracts the Bearer token from the Authorization header, validates it,
/// loads the user, and injects [`AuthUser`] into request extensions.
/// Inactive users are rejected with `Forbidden`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthenticated("Invalid authorization header".to_string()))?;

    let claims = validate_token(token, &state.config.jwt_secret)?;
    let user_id = user_id_from_claims(&claims)?;

    let user = users::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("User not found".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }

    request.extensions_mut().insert(AuthUser::from(user));
    Ok(next.run(request).await)
}

/// Extractor for the authenticated user in handlers.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthenticated("Missing authorization header".to_string()))
    }
}
