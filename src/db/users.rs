//! User Queries

use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{User, UserProfile, UserStatistics};

/// Create a user. Registered accounts carry a password hash; guests do not.
pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: Option<&str>,
    is_guest: bool,
    profile: &UserProfile,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r"
        INSERT INTO users (id, username, email, password_hash, is_guest, profile, statistics)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        ",
    )
    .bind(Uuid::now_v7())
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(is_guest)
    .bind(Json(profile))
    .bind(Json(UserStatistics::default()))
    .fetch_one(pool)
    .await
}

/// Find a user by ID.
pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Find a user by email (case-insensitive; emails are stored lowercased).
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await
}

/// Check whether a username is taken.
pub async fn username_exists(pool: &PgPool, username: &str) -> Result<bool, sqlx::Error> {
    let exists: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(pool)
            .await?;
    Ok(exists.0)
}

/// Check whether an email is taken.
pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email.to_lowercase())
        .fetch_one(pool)
        .await?;
    Ok(exists.0)
}

/// Merge profile and preference patches into the user record.
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    profile_patch: Option<&serde_json::Value>,
    preferences_patch: Option<&serde_json::Value>,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r"
        UPDATE users
        SET profile = profile || COALESCE($2, '{}'::jsonb),
            preferences = preferences || COALESCE($3, '{}'::jsonb),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        ",
    )
    .bind(user_id)
    .bind(profile_patch.map(Json))
    .bind(preferences_patch.map(Json))
    .fetch_optional(pool)
    .await
}

/// Stamp `last_seen_at` (logout path).
pub async fn touch_last_seen(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_seen_at = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Increment hosting statistics (create/schedule path).
pub async fn increment_hosted(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    bump_statistics(pool, user_id, "meetingsHosted").await
}

/// Increment attendance statistics. Called exactly once per (user, meeting)
/// pair; the first-join guard lives in the meeting state machine.
pub async fn increment_attended(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    bump_statistics(pool, user_id, "meetingsAttended").await
}

/// Add attended minutes to the running total.
pub async fn add_meeting_time(
    pool: &PgPool,
    user_id: Uuid,
    minutes: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        UPDATE users
        SET statistics = jsonb_set(
                statistics,
                '{totalMeetingTimeMinutes}',
                to_jsonb(COALESCE((statistics->>'totalMeetingTimeMinutes')::bigint, 0) + $2)
            ),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .bind(minutes)
    .execute(pool)
    .await?;
    Ok(())
}

/// Increment one named counter plus `totalMeetings`.
async fn bump_statistics(pool: &PgPool, user_id: Uuid, counter: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        UPDATE users
        SET statistics = jsonb_set(
                jsonb_set(
                    statistics,
                    ARRAY[$2],
                    to_jsonb(COALESCE((statistics->>$2)::bigint, 0) + 1)
                ),
                '{totalMeetings}',
                to_jsonb(COALESCE((statistics->>'totalMeetings')::bigint, 0) + 1)
            ),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .bind(counter)
    .execute(pool)
    .await?;
    Ok(())
}
