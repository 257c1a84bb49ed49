//! Authentication HTTP Handlers

use axum::{extract::State, Json};
use lazy_static::lazy_static;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::api::{ok, ok_empty, ApiResponse, AppState};
use crate::db::{users, User, UserProfile};
use crate::error::{ApiError, ApiResult};

use super::jwt::generate_token;
use super::middleware::AuthUser;
use super::password::{compare_user_password, hash_password};

// ============================================================================
// Request/Response Types
// ============================================================================

lazy_static! {
    /// Username validation regex (matches the DB constraint).
    static ref USERNAME_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9_\-]{3,30}$").unwrap();
}

/// Registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Username (3-30 alphanumeric, underscore, dash).
    #[validate(length(min = 3, max = 30), regex(path = "USERNAME_REGEX"))]
    pub username: String,
    /// Email address.
    #[validate(email)]
    pub email: String,
    /// Password (8-128 characters).
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    /// Initial profile (optional).
    pub profile: Option<UserProfile>,
}

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Guest session request.
#[derive(Debug, Deserialize, Validate)]
pub struct GuestRequest {
    /// Requested display name (3-30 chars).
    #[validate(length(min = 3, max = 30))]
    pub username: String,
}

/// Profile update request. Both fields are shallow-merged.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub profile: Option<Value>,
    pub preferences: Option<Value>,
}

/// User view returned by auth endpoints (no password hash).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_guest: bool,
    pub profile: UserProfile,
    pub preferences: Value,
    pub statistics: crate::db::UserStatistics,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username,
            email: user.email,
            is_guest: user.is_guest,
            profile: user.profile.0,
            preferences: user.preferences.0,
            statistics: user.statistics.0,
        }
    }
}

/// Authentication payload: user + bearer token.
#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub user: UserView,
    pub token: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new account.
///
/// POST /api/auth/register
#[tracing::instrument(skip(state, body), fields(username = %body.username))]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<ApiResponse<AuthPayload>>> {
    body.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let email = body.email.to_lowercase();

    if users::username_exists(&state.db, &body.username).await? {
        return Err(ApiError::Conflict("Username already taken".to_string()));
    }
    if users::email_exists(&state.db, &email).await? {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&body.password).map_err(ApiError::internal)?;
    let profile = body.profile.unwrap_or_default();

    let user = users::create_user(
        &state.db,
        &body.username,
        &email,
        Some(&password_hash),
        false,
        &profile,
    )
    .await?;

    let token = generate_token(user.id, &state.config.jwt_secret, state.config.jwt_expiry)?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok(ok(
        "Registration successful",
        AuthPayload {
            user: user.into(),
            token,
        },
    ))
}

/// Login with email and password.
///
/// POST /api/auth/login
#[tracing::instrument(skip(state, body))]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<ApiResponse<AuthPayload>>> {
    let user = users::find_user_by_email(&state.db, &body.email)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("Invalid email or password".to_string()))?;

    if !compare_user_password(&user, &body.password) {
        return Err(ApiError::Unauthenticated(
            "Invalid email or password".to_string(),
        ));
    }

    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }

    let token = generate_token(user.id, &state.config.jwt_secret, state.config.jwt_expiry)?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(ok(
        "Login successful",
        AuthPayload {
            user: user.into(),
            token,
        },
    ))
}

/// Create a guest session. Guests get a synthesized unique username/email
/// and can never log in with a password.
///
/// POST /api/auth/guest
#[tracing::instrument(skip(state, body), fields(requested = %body.username))]
pub async fn guest(
    State(state): State<AppState>,
    Json(body): Json<GuestRequest>,
) -> ApiResult<Json<ApiResponse<AuthPayload>>> {
    body.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let base: String = body
        .username
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(20)
        .collect::<String>()
        .to_lowercase();
    let base = if base.len() < 3 { "guest".to_string() } else { base };

    // Rejection-sample a unique suffix; collisions on 4 hex digits are rare
    // enough that a handful of tries always lands.
    let mut user = None;
    for _ in 0..5 {
        let suffix: u16 = rand::thread_rng().gen();
        let username = format!("{base}-{suffix:04x}");
        let email = format!("{username}@guest.invalid");
        let profile = UserProfile {
            display_name: Some(body.username.clone()),
            ..UserProfile::default()
        };

        match users::create_user(&state.db, &username, &email, None, true, &profile).await {
            Ok(created) => {
                user = Some(created);
                break;
            }
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let user =
        user.ok_or_else(|| ApiError::Conflict("Could not allocate guest account".to_string()))?;

    let token = generate_token(user.id, &state.config.jwt_secret, state.config.jwt_expiry)?;

    tracing::info!(user_id = %user.id, "Guest session created");

    Ok(ok(
        "Guest session created",
        AuthPayload {
            user: user.into(),
            token,
        },
    ))
}

/// Current user profile.
///
/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<ApiResponse<UserView>>> {
    let user = users::find_user_by_id(&state.db, auth_user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ok("Current user", user.into()))
}

/// Merge profile/preference updates.
///
/// PUT /api/auth/profile
#[tracing::instrument(skip(state, body), fields(user_id = %auth_user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ApiResponse<UserView>>> {
    let user = users::update_profile(
        &state.db,
        auth_user.id,
        body.profile.as_ref(),
        body.preferences.as_ref(),
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(ok("Profile updated", user.into()))
}

/// Logout. Stamps `last_seen_at`; the token itself simply expires.
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<ApiResponse<()>>> {
    users::touch_last_seen(&state.db, auth_user.id).await?;
    tracing::info!(user_id = %auth_user.id, "User logged out");
    Ok(ok_empty("Logged out"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
