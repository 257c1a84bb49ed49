//! Meeting Minutes Queries

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

use super::{
    AiProcessing, Attendee, EmailDelivery, MinutesRecord, MinutesStatus, TranscriptSegment,
};

/// Find the minutes record for a meeting.
pub async fn find_by_meeting(
    pool: &PgPool,
    meeting_id: &str,
) -> Result<Option<MinutesRecord>, sqlx::Error> {
    sqlx::query_as::<_, MinutesRecord>("SELECT * FROM meeting_minutes WHERE meeting_id = $1")
        .bind(meeting_id)
        .fetch_optional(pool)
        .await
}

/// Page of minutes where the user appears as an attendee, newest first.
pub async fn list_for_attendee(
    pool: &PgPool,
    user_id: Uuid,
    page: i64,
    limit: i64,
) -> Result<(Vec<MinutesRecord>, i64), sqlx::Error> {
    let membership = serde_json::json!([{ "userId": user_id }]);
    let offset = (page.max(1) - 1) * limit;

    let records = sqlx::query_as::<_, MinutesRecord>(
        r"
        SELECT * FROM meeting_minutes
        WHERE attendees @> $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(Json(&membership))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM meeting_minutes WHERE attendees @> $1")
            .bind(Json(&membership))
            .fetch_one(pool)
            .await?;

    Ok((records, total.0))
}

/// Parameters for seeding a processing record.
pub struct ProcessingSeed<'a> {
    pub meeting_id: &'a str,
    pub title: &'a str,
    pub meeting_date: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub attendees: &'a [Attendee],
    pub transcripts: &'a [TranscriptSegment],
}

/// Upsert a record in `processing` state before the AI pass runs. Re-running
/// a failed generation reuses the row.
pub async fn upsert_processing(
    pool: &PgPool,
    seed: &ProcessingSeed<'_>,
) -> Result<MinutesRecord, sqlx::Error> {
    sqlx::query_as::<_, MinutesRecord>(
        r"
        INSERT INTO meeting_minutes (
            id, meeting_id, title, meeting_date, start_time, end_time,
            duration_minutes, attendees, transcripts, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'processing')
        ON CONFLICT (meeting_id) DO UPDATE
        SET title = EXCLUDED.title,
            meeting_date = EXCLUDED.meeting_date,
            start_time = EXCLUDED.start_time,
            end_time = EXCLUDED.end_time,
            duration_minutes = EXCLUDED.duration_minutes,
            attendees = EXCLUDED.attendees,
            transcripts = EXCLUDED.transcripts,
            status = 'processing',
            error = NULL,
            updated_at = NOW()
        RETURNING *
        ",
    )
    .bind(Uuid::now_v7())
    .bind(seed.meeting_id)
    .bind(seed.title)
    .bind(seed.meeting_date)
    .bind(seed.start_time)
    .bind(seed.end_time)
    .bind(seed.duration_minutes)
    .bind(Json(seed.attendees))
    .bind(Json(seed.transcripts))
    .fetch_one(pool)
    .await
}

/// Generated content persisted after the AI pass.
pub struct GeneratedContent {
    pub summary: String,
    pub agenda: Vec<String>,
    pub discussion_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<super::ActionItem>,
    pub highlights: Vec<String>,
    pub questions_raised: Vec<String>,
    pub follow_ups: Vec<super::FollowUp>,
}

/// Persist generated content with a final status. A degraded record (parse
/// failure) lands here too, with `status = failed` and the error recorded.
pub async fn store_content(
    pool: &PgPool,
    meeting_id: &str,
    content: &GeneratedContent,
    ai: Option<&AiProcessing>,
    status: MinutesStatus,
    error: Option<&str>,
) -> Result<MinutesRecord, sqlx::Error> {
    sqlx::query_as::<_, MinutesRecord>(
        r"
        UPDATE meeting_minutes
        SET summary = $2, agenda = $3, discussion_points = $4, decisions = $5,
            action_items = $6, highlights = $7, questions_raised = $8,
            follow_ups = $9, ai_processing = $10, status = $11, error = $12,
            updated_at = NOW()
        WHERE meeting_id = $1
        RETURNING *
        ",
    )
    .bind(meeting_id)
    .bind(&content.summary)
    .bind(Json(&content.agenda))
    .bind(Json(&content.discussion_points))
    .bind(Json(&content.decisions))
    .bind(Json(&content.action_items))
    .bind(Json(&content.highlights))
    .bind(Json(&content.questions_raised))
    .bind(Json(&content.follow_ups))
    .bind(ai.map(Json))
    .bind(status)
    .bind(error)
    .fetch_one(pool)
    .await
}

/// Read-modify-write the email delivery state under a row lock. Concurrent
/// email workers update different recipients of the same record.
pub async fn update_delivery_atomic<F>(
    pool: &PgPool,
    meeting_id: &str,
    mutator: F,
) -> ApiResult<EmailDelivery>
where
    F: FnOnce(&mut EmailDelivery),
{
    let mut tx = pool.begin().await?;

    let row: Option<(Json<EmailDelivery>,)> = sqlx::query_as(
        "SELECT email_delivery FROM meeting_minutes WHERE meeting_id = $1 FOR UPDATE",
    )
    .bind(meeting_id)
    .fetch_optional(&mut *tx)
    .await?;

    let mut delivery = row
        .ok_or_else(|| ApiError::NotFound("Meeting minutes not found".to_string()))?
        .0
         .0;

    mutator(&mut delivery);

    sqlx::query(
        "UPDATE meeting_minutes SET email_delivery = $2, updated_at = NOW() WHERE meeting_id = $1",
    )
    .bind(meeting_id)
    .bind(Json(&delivery))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(delivery)
}
