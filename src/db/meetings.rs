//! Meeting Repository
//!
//! Authoritative persistence for meeting documents. All roster and lifecycle
//! mutations go through [`update_atomic`], which serializes concurrent
//! writers on a per-meeting row lock so join/leave races cannot lose
//! updates.

use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

use super::{ChatMessage, Meeting, MeetingStatus};

/// Find a meeting by its public `XXX-XXX-XXX` code.
pub async fn find_by_public_id(pool: &PgPool, meeting_id: &str) -> Result<Option<Meeting>, sqlx::Error> {
    sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE meeting_id = $1")
        .bind(meeting_id)
        .fetch_optional(pool)
        .await
}

/// Find a meeting by its row ID.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Meeting>, sqlx::Error> {
    sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Insert a new meeting. Rejects duplicate public codes via the unique
/// constraint; callers retry with a fresh code.
pub async fn insert(pool: &PgPool, meeting: &Meeting) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO meetings (
            id, meeting_id, title, description, host_user_id, password,
            scheduled_for, duration_minutes, status, settings, participants,
            recording, chat, transcripts, statistics, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ",
    )
    .bind(meeting.id)
    .bind(&meeting.meeting_id)
    .bind(&meeting.title)
    .bind(&meeting.description)
    .bind(meeting.host_user_id)
    .bind(&meeting.password)
    .bind(meeting.scheduled_for)
    .bind(meeting.duration_minutes)
    .bind(meeting.status)
    .bind(&meeting.settings)
    .bind(&meeting.participants)
    .bind(&meeting.recording)
    .bind(&meeting.chat)
    .bind(&meeting.transcripts)
    .bind(&meeting.statistics)
    .bind(meeting.created_at)
    .bind(meeting.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read-modify-write a meeting under a row lock.
///
/// Loads the document with `SELECT … FOR UPDATE`, applies the mutator, and
/// writes every mutable column back in the same transaction. The mutator is
/// synchronous so the lock is never held across an unrelated await point.
/// Returns the updated document together with the mutator's result.
pub async fn update_atomic<T, F>(
    pool: &PgPool,
    meeting_id: &str,
    mutator: F,
) -> ApiResult<(Meeting, T)>
where
    F: FnOnce(&mut Meeting) -> ApiResult<T>,
{
    let mut tx = pool.begin().await?;

    let mut meeting =
        sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE meeting_id = $1 FOR UPDATE")
            .bind(meeting_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    let outcome = mutator(&mut meeting)?;
    meeting.updated_at = chrono::Utc::now();

    sqlx::query(
        r"
        UPDATE meetings
        SET title = $2, description = $3, host_user_id = $4, password = $5,
            scheduled_for = $6, duration_minutes = $7, status = $8,
            settings = $9, participants = $10, recording = $11, chat = $12,
            transcripts = $13, statistics = $14, updated_at = $15
        WHERE meeting_id = $1
        ",
    )
    .bind(&meeting.meeting_id)
    .bind(&meeting.title)
    .bind(&meeting.description)
    .bind(meeting.host_user_id)
    .bind(&meeting.password)
    .bind(meeting.scheduled_for)
    .bind(meeting.duration_minutes)
    .bind(meeting.status)
    .bind(&meeting.settings)
    .bind(&meeting.participants)
    .bind(&meeting.recording)
    .bind(&meeting.chat)
    .bind(&meeting.transcripts)
    .bind(&meeting.statistics)
    .bind(meeting.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((meeting, outcome))
}

/// Page of meetings visible to a user (host or roster member), newest first.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    status: Option<MeetingStatus>,
    page: i64,
    limit: i64,
) -> Result<(Vec<Meeting>, i64), sqlx::Error> {
    let membership = serde_json::json!([{ "userId": user_id }]);
    let offset = (page.max(1) - 1) * limit;

    let meetings = sqlx::query_as::<_, Meeting>(
        r"
        SELECT * FROM meetings
        WHERE (host_user_id = $1 OR participants @> $2)
          AND ($3::meeting_status IS NULL OR status = $3)
        ORDER BY created_at DESC
        LIMIT $4 OFFSET $5
        ",
    )
    .bind(user_id)
    .bind(Json(&membership))
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*) FROM meetings
        WHERE (host_user_id = $1 OR participants @> $2)
          AND ($3::meeting_status IS NULL OR status = $3)
        ",
    )
    .bind(user_id)
    .bind(Json(&membership))
    .bind(status)
    .fetch_one(pool)
    .await?;

    Ok((meetings, total.0))
}

/// Append a chat message and bump the message counter in one statement.
/// Persistence happens before any broadcast, so a REST read after a
/// delivered `chat-message` event always sees the message.
pub async fn push_chat(
    pool: &PgPool,
    meeting_id: &str,
    message: &ChatMessage,
) -> ApiResult<()> {
    let result = sqlx::query(
        r"
        UPDATE meetings
        SET chat = chat || $2::jsonb,
            statistics = jsonb_set(
                statistics,
                '{chatMessages}',
                to_jsonb(COALESCE((statistics->>'chatMessages')::bigint, 0) + 1)
            ),
            updated_at = NOW()
        WHERE meeting_id = $1
        ",
    )
    .bind(meeting_id)
    .bind(Json(serde_json::json!([message])))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Meeting not found".to_string()));
    }
    Ok(())
}
