//! Recordings
//!
//! Recording state flips, uploads (local disk), a per-user listing, and the
//! post-processing job that runs after an upload. The server stores the
//! files a client recorded; it never captures media itself.

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ok, ApiResponse, AppState};
use crate::auth::{require_auth, AuthUser};
use crate::db::{meetings as repo, Meeting, RecordingFile, RecordingState};
use crate::error::{ApiError, ApiResult};
use crate::meetings::permissions;
use crate::queue::{Job, JobContext, JobError, JobPayload, RecordingJob};

/// Accepted MIME types for recording uploads.
const ALLOWED_MIME_TYPES: [&str; 5] = [
    "video/mp4",
    "video/webm",
    "audio/mp3",
    "audio/wav",
    "audio/mpeg",
];

/// Create the recordings router. Every route requires a bearer token.
pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.max_recording_upload_size;

    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/my-recordings", get(my_recordings))
        .layer(axum_middleware::from_fn_with_state(state, require_auth))
}

/// Start/stop request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRequest {
    pub meeting_id: String,
}

/// Listing query parameters.
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

/// One meeting's recording state in the listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub meeting_id: String,
    pub title: String,
    pub recording: RecordingState,
}

/// Paged listing envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPage {
    pub recordings: Vec<RecordingEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Start recording. Requires the `canRecord` permission.
///
/// POST /api/recordings/start
pub async fn start(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<RecordingRequest>,
) -> ApiResult<Json<ApiResponse<RecordingState>>> {
    let user_id = auth_user.id;
    let (meeting, ()) = repo::update_atomic(&state.db, &body.meeting_id, |meeting| {
        if !permissions::can_record(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "You are not allowed to record".to_string(),
            ));
        }
        if meeting.recording.is_recording {
            return Err(ApiError::FailedPrecondition(
                "Recording is already running".to_string(),
            ));
        }
        meeting.recording.0.is_recording = true;
        meeting.recording.0.started_at = Some(Utc::now());
        meeting.recording.0.started_by = Some(user_id);
        Ok(())
    })
    .await?;

    info!(meeting_id = %meeting.meeting_id, user_id = %user_id, "Recording started");
    Ok(ok("Recording started", meeting.recording.0))
}

/// Stop recording. Fails when no recording is running.
///
/// POST /api/recordings/stop
pub async fn stop(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<RecordingRequest>,
) -> ApiResult<Json<ApiResponse<RecordingState>>> {
    let user_id = auth_user.id;
    let (meeting, ()) = repo::update_atomic(&state.db, &body.meeting_id, |meeting| {
        if !permissions::can_record(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "You are not allowed to record".to_string(),
            ));
        }
        if !meeting.recording.is_recording {
            return Err(ApiError::FailedPrecondition(
                "No recording is running".to_string(),
            ));
        }
        meeting.recording.0.is_recording = false;
        Ok(())
    })
    .await?;

    info!(meeting_id = %meeting.meeting_id, user_id = %user_id, "Recording stopped");
    Ok(ok("Recording stopped", meeting.recording.0))
}

/// Upload a recording file (multipart, `meetingId` + `file`, 500 MB cap,
/// MIME allowlist). Enqueues the post-processing job on success.
///
/// POST /api/recordings/upload
pub async fn upload(
    State(state): State<AppState>,
    auth_user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<RecordingFile>>> {
    let mut meeting_id: Option<String> = None;
    let mut stored: Option<(String, String, String, i64)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("meetingId") => {
                meeting_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
                    return Err(ApiError::BadRequest(format!(
                        "Unsupported recording type: {mime_type}"
                    )));
                }

                let original = field
                    .file_name()
                    .unwrap_or("recording")
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or("recording")
                    .to_string();
                let stored_name = format!("{}-{}", Uuid::now_v7(), original);

                let dir = std::path::Path::new(&state.config.upload_dir).join("recordings");
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(ApiError::internal)?;

                // Stream to disk; recordings are far too large to buffer.
                let mut out = tokio::fs::File::create(dir.join(&stored_name))
                    .await
                    .map_err(ApiError::internal)?;
                let mut size: i64 = 0;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Upload failed: {e}")))?
                {
                    size += chunk.len() as i64;
                    out.write_all(&chunk).await.map_err(ApiError::internal)?;
                }
                out.flush().await.map_err(ApiError::internal)?;

                stored = Some((original, stored_name, mime_type, size));
            }
            _ => {}
        }
    }

    let meeting_id =
        meeting_id.ok_or_else(|| ApiError::BadRequest("meetingId is required".to_string()))?;
    let (original, stored_name, mime_type, size) =
        stored.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;

    let user_id = auth_user.id;
    let file = RecordingFile {
        filename: stored_name.clone(),
        size,
        mime_type,
        uploaded_by: user_id,
        uploaded_at: Utc::now(),
        processed: false,
    };

    let file_for_roster = file.clone();
    let (meeting, ()) = repo::update_atomic(&state.db, &meeting_id, move |meeting| {
        if !permissions::can_record(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "You are not allowed to upload recordings".to_string(),
            ));
        }
        meeting.recording.0.files.push(file_for_roster);
        Ok(())
    })
    .await?;

    let job = Job::immediate(JobPayload::Recording(RecordingJob {
        meeting_id: meeting.meeting_id.clone(),
        filename: stored_name,
    }));
    if let Err(e) = state.queue.enqueue(job).await {
        warn!(meeting_id = %meeting.meeting_id, error = %e, "Post-process enqueue failed");
    }

    info!(
        meeting_id = %meeting.meeting_id,
        filename = %original,
        size,
        "Recording uploaded"
    );
    Ok(ok("Recording uploaded", file))
}

/// List meetings with recordings where the caller is host or participant.
///
/// GET /api/recordings/my-recordings
pub async fn my_recordings(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<RecordingPage>>> {
    let membership = serde_json::json!([{ "userId": auth_user.id }]);
    let limit = query.limit.clamp(1, 100);
    let offset = (query.page.max(1) - 1) * limit;

    let meetings: Vec<Meeting> = sqlx::query_as(
        r"
        SELECT * FROM meetings
        WHERE (host_user_id = $1 OR participants @> $2)
          AND jsonb_array_length(recording->'files') > 0
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        ",
    )
    .bind(auth_user.id)
    .bind(sqlx::types::Json(&membership))
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let total: (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*) FROM meetings
        WHERE (host_user_id = $1 OR participants @> $2)
          AND jsonb_array_length(recording->'files') > 0
        ",
    )
    .bind(auth_user.id)
    .bind(sqlx::types::Json(&membership))
    .fetch_one(&state.db)
    .await?;

    let recordings = meetings
        .into_iter()
        .map(|m| RecordingEntry {
            meeting_id: m.meeting_id,
            title: m.title,
            recording: m.recording.0,
        })
        .collect();

    Ok(ok(
        "Recordings",
        RecordingPage {
            recordings,
            total: total.0,
            page: query.page.max(1),
            limit,
        },
    ))
}

/// Post-processing worker: verify the stored file and flag the metadata.
pub async fn run_post_process_job(ctx: &JobContext, job: &RecordingJob) -> Result<(), JobError> {
    let path = std::path::Path::new(&ctx.config.upload_dir)
        .join("recordings")
        .join(&job.filename);

    let exists = tokio::fs::metadata(&path).await.is_ok();
    if !exists {
        return Err(JobError::permanent(format!(
            "Recording file missing: {}",
            job.filename
        )));
    }

    let filename = job.filename.clone();
    repo::update_atomic(&ctx.db, &job.meeting_id, move |meeting| {
        if let Some(file) = meeting
            .recording
            .0
            .files
            .iter_mut()
            .find(|f| f.filename == filename)
        {
            file.processed = true;
        }
        Ok(())
    })
    .await
    .map_err(|e| JobError::retryable(format!("Recording metadata update failed: {e}")))?;

    info!(meeting_id = %job.meeting_id, filename = %job.filename, "Recording post-processed");
    Ok(())
}
