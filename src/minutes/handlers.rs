//! Meeting Minutes HTTP Handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ok, ok_empty, ApiResponse, AppState};
use crate::auth::AuthUser;
use crate::db::{
    meetings as repo, minutes as minutes_repo, MinutesRecord, RecipientState, RecipientStatus,
    TranscriptSegment,
};
use crate::error::{ApiError, ApiResult};
use crate::meetings::{permissions, state as meeting_state};
use crate::queue::{Job, JobPayload, MinutesEmailJob};

use super::pipeline;

/// Generation request body. The transcript batch is optional; segments are
/// merged into the meeting before the pipeline runs.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub transcripts: Vec<TranscriptSegment>,
}

/// Resend request body. Without an email, every attendee is re-queued.
#[derive(Debug, Default, Deserialize)]
pub struct ResendRequest {
    pub email: Option<String>,
}

/// List query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_page() -> i64 {
    1
}

const fn default_limit() -> i64 {
    10
}

/// Paged list envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesPage {
    pub minutes: Vec<MinutesRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Whether the caller may read a minutes record: host or attendee.
fn can_read(record: &MinutesRecord, user: &AuthUser) -> bool {
    record.attendees.iter().any(|a| a.user_id == user.id)
}

/// Generate minutes for a meeting. Host only; `Conflict` when a completed
/// record already exists. Runs synchronously (the "end meeting" flow calls
/// this with a long timeout budget).
///
/// POST /api/meeting-minutes/{meetingId}/generate
#[tracing::instrument(skip(state, body), fields(meeting_id = %meeting_id, user_id = %auth_user.id))]
pub async fn generate(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    body: Option<Json<GenerateRequest>>,
) -> ApiResult<Json<ApiResponse<MinutesRecord>>> {
    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if !permissions::is_host(&meeting, auth_user.id) {
        return Err(ApiError::Forbidden(
            "Only the host can generate minutes".to_string(),
        ));
    }

    // Merge the optional transcript batch before the pipeline snapshots it.
    let segments = body.map(|Json(b)| b.transcripts).unwrap_or_default();
    if !segments.is_empty() {
        repo::update_atomic(&state.db, &meeting_id, |meeting| {
            meeting_state::apply_transcripts(meeting, segments)
        })
        .await?;
    }

    let ctx = state.job_context();
    let record = pipeline::generate(&ctx, &meeting_id).await?;

    info!(status = ?record.status, "Minutes generated");
    Ok(ok("Minutes generated", record))
}

/// Fetch the minutes for one meeting. Host or attendee.
///
/// GET /api/meeting-minutes/{meetingId}
pub async fn get(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MinutesRecord>>> {
    let record = minutes_repo::find_by_meeting(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting minutes not found".to_string()))?;

    let meeting = repo::find_by_public_id(&state.db, &meeting_id).await?;
    let is_host = meeting
        .as_ref()
        .is_some_and(|m| permissions::is_host(m, auth_user.id));
    if !is_host && !can_read(&record, &auth_user) {
        return Err(ApiError::Forbidden(
            "Only attendees can read these minutes".to_string(),
        ));
    }

    Ok(ok("Meeting minutes", record))
}

/// List minutes where the caller appears as an attendee.
///
/// GET /api/meeting-minutes
pub async fn list(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<MinutesPage>>> {
    let limit = query.limit.clamp(1, 100);
    let (minutes, total) =
        minutes_repo::list_for_attendee(&state.db, auth_user.id, query.page, limit).await?;

    Ok(ok(
        "Meeting minutes",
        MinutesPage {
            minutes,
            total,
            page: query.page.max(1),
            limit,
        },
    ))
}

/// Re-queue minutes emails: every attendee with an address, or one
/// explicit override address.
///
/// POST /api/meeting-minutes/{meetingId}/resend-email
#[tracing::instrument(skip(state, body), fields(meeting_id = %meeting_id, user_id = %auth_user.id))]
pub async fn resend_email(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    body: Option<Json<ResendRequest>>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let record = minutes_repo::find_by_meeting(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting minutes not found".to_string()))?;

    let meeting = repo::find_by_public_id(&state.db, &meeting_id).await?;
    let is_host = meeting
        .as_ref()
        .is_some_and(|m| permissions::is_host(m, auth_user.id));
    if !is_host && !can_read(&record, &auth_user) {
        return Err(ApiError::Forbidden(
            "Only attendees can resend these minutes".to_string(),
        ));
    }

    let ctx = state.job_context();
    let override_email = body.and_then(|Json(b)| b.email);

    match override_email {
        Some(email) => {
            minutes_repo::update_delivery_atomic(&state.db, &meeting_id, |delivery| {
                match delivery.recipients.iter().position(|r| r.email == email) {
                    Some(i) => {
                        let recipient = &mut delivery.recipients[i];
                        recipient.status = RecipientState::Queued;
                        recipient.error = None;
                    }
                    None => delivery.recipients.push(RecipientStatus {
                        email: email.clone(),
                        status: RecipientState::Queued,
                        sent_at: None,
                        error: None,
                    }),
                }
            })
            .await?;

            ctx.queue
                .enqueue(Job::immediate(JobPayload::MinutesEmail(MinutesEmailJob {
                    to: email,
                    recipient_name: auth_user.display_name.clone(),
                    meeting_id: meeting_id.clone(),
                })))
                .await?;
        }
        None => {
            pipeline::enqueue_minutes_emails(&ctx, &meeting_id, &record.attendees).await?;
        }
    }

    Ok(ok_empty("Minutes emails queued"))
}
