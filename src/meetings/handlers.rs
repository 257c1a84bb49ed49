//! Meeting HTTP Handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::{ok, ApiResponse, AppState};
use crate::auth::AuthUser;
use crate::db::{meetings as repo, ChatMessage, Meeting, MeetingStatus, Participant};
use crate::error::{ApiError, ApiResult};

use super::service::{self, CreateInput};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Create/schedule request body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    pub password: Option<String>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i32,
    pub settings: Option<serde_json::Value>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

const fn default_duration() -> i32 {
    60
}

/// Join request body.
#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    pub password: Option<String>,
}

/// Settings patch body.
#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub settings: serde_json::Value,
}

/// Transcript append body.
#[derive(Debug, Deserialize)]
pub struct TranscriptsRequest {
    pub transcripts: Vec<crate::db::TranscriptSegment>,
}

/// List query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<MeetingStatus>,
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

/// Minimal user info attached to each populated participant.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Roster entry with the user record resolved.
#[derive(Debug, Serialize)]
pub struct PopulatedParticipant {
    #[serde(flatten)]
    pub participant: Participant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ParticipantUser>,
}

/// Full meeting view returned by the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingView {
    pub id: Uuid,
    pub meeting_id: String,
    pub title: String,
    pub description: String,
    pub host_user_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: MeetingStatus,
    pub settings: crate::db::MeetingSettings,
    pub participants: Vec<PopulatedParticipant>,
    pub recording: crate::db::RecordingState,
    pub chat: Vec<ChatMessage>,
    pub statistics: crate::db::MeetingStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Paged list envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingPage {
    pub meetings: Vec<MeetingView>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// One entry in the ICE configuration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE configuration response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

// ============================================================================
// View assembly
// ============================================================================

/// Resolve participant user records and build the full view.
pub async fn populate_meeting(state: &AppState, meeting: Meeting) -> ApiResult<MeetingView> {
    let user_ids: Vec<Uuid> = meeting.participants.iter().map(|p| p.user_id).collect();

    let users: Vec<crate::db::User> =
        sqlx::query_as("SELECT * FROM users WHERE id = ANY($1)")
            .bind(&user_ids)
            .fetch_all(&state.db)
            .await?;

    let participants = meeting
        .participants
        .0
        .into_iter()
        .map(|participant| {
            let user = users.iter().find(|u| u.id == participant.user_id).map(|u| {
                ParticipantUser {
                    id: u.id,
                    username: u.username.clone(),
                    display_name: u.display_name().to_string(),
                    avatar: u.profile.avatar.clone(),
                }
            });
            PopulatedParticipant { participant, user }
        })
        .collect();

    Ok(MeetingView {
        id: meeting.id,
        meeting_id: meeting.meeting_id,
        title: meeting.title,
        description: meeting.description,
        host_user_id: meeting.host_user_id,
        scheduled_for: meeting.scheduled_for,
        duration_minutes: meeting.duration_minutes,
        status: meeting.status,
        settings: meeting.settings.0,
        participants,
        recording: meeting.recording.0,
        chat: meeting.chat.0,
        statistics: meeting.statistics.0,
        created_at: meeting.created_at,
        updated_at: meeting.updated_at,
    })
}

fn to_create_input(body: CreateMeetingRequest) -> CreateInput {
    CreateInput {
        title: body.title,
        description: body.description,
        password: body.password,
        duration_minutes: body.duration_minutes,
        settings_patch: body.settings,
        scheduled_for: body.scheduled_for,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an instant meeting.
///
/// POST /api/meetings
pub async fn create(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<CreateMeetingRequest>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    body.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut input = to_create_input(body);
    input.scheduled_for = None;
    let meeting = service::create_meeting(&state, &auth_user, input).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Meeting created", view))
}

/// Schedule a future meeting.
///
/// POST /api/meetings/schedule
pub async fn schedule(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<CreateMeetingRequest>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    body.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let meeting = service::schedule_meeting(&state, &auth_user, to_create_input(body)).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Meeting scheduled", view))
}

/// List meetings the user hosts or participates in.
///
/// GET /api/meetings
pub async fn list(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<MeetingPage>>> {
    let limit = query.limit.clamp(1, 100);
    let (meetings, total) =
        repo::list_for_user(&state.db, auth_user.id, query.status, query.page, limit).await?;

    let mut views = Vec::with_capacity(meetings.len());
    for meeting in meetings {
        views.push(populate_meeting(&state, meeting).await?);
    }

    Ok(ok(
        "Meetings",
        MeetingPage {
            meetings: views,
            total,
            page: query.page.max(1),
            limit,
        },
    ))
}

/// ICE server configuration for WebRTC clients. STUN defaults plus TURN
/// from the environment when configured.
///
/// GET /api/meetings/ice-servers
pub async fn ice_servers(
    State(state): State<AppState>,
    _auth_user: AuthUser,
) -> Json<ApiResponse<IceConfig>> {
    let mut servers: Vec<IceServer> = state
        .config
        .stun_servers
        .iter()
        .map(|url| IceServer {
            urls: url.clone(),
            username: None,
            credential: None,
        })
        .collect();

    if let Some(turn_url) = &state.config.turn_server_url {
        servers.push(IceServer {
            urls: turn_url.clone(),
            username: state.config.turn_username.clone(),
            credential: state.config.turn_credential.clone(),
        });
    }

    ok("ICE servers", IceConfig { ice_servers: servers })
}

/// Fetch one meeting with populated participants.
///
/// GET /api/meetings/{meetingId}
pub async fn get(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Meeting", view))
}

/// Join a meeting.
///
/// POST /api/meetings/{meetingId}/join
pub async fn join(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    body: Option<Json<JoinRequest>>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let password = body.and_then(|Json(b)| b.password);
    let meeting =
        service::join_meeting(&state, &auth_user, &meeting_id, password.as_deref()).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Joined meeting", view))
}

/// Leave a meeting.
///
/// POST /api/meetings/{meetingId}/leave
pub async fn leave(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let (meeting, _effect) = service::leave_meeting(&state, &auth_user, &meeting_id).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Left meeting", view))
}

/// Update meeting settings. Host only.
///
/// PUT /api/meetings/{meetingId}/settings
pub async fn update_settings(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    Json(body): Json<SettingsRequest>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let meeting =
        service::update_settings(&state, &auth_user, &meeting_id, body.settings).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Settings updated", view))
}

/// End a meeting. Host only.
///
/// POST /api/meetings/{meetingId}/end
pub async fn end(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let meeting = service::end_meeting(&state, &auth_user, &meeting_id).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Meeting ended", view))
}

/// Cancel a scheduled meeting. Host only.
///
/// POST /api/meetings/{meetingId}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<MeetingView>>> {
    let meeting = service::cancel_meeting(&state, &auth_user, &meeting_id).await?;
    let view = populate_meeting(&state, meeting).await?;
    Ok(ok("Meeting cancelled", view))
}

/// Append transcript segments. Joined participants only.
///
/// POST /api/meetings/{meetingId}/transcripts
pub async fn add_transcripts(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
    Json(body): Json<TranscriptsRequest>,
) -> ApiResult<Json<ApiResponse<serde_json::Value>>> {
    let (_meeting, added) =
        service::add_transcripts(&state, &auth_user, &meeting_id, body.transcripts).await?;
    Ok(ok(
        "Transcripts stored",
        serde_json::json!({ "added": added }),
    ))
}

/// Fetch transcript segments. Participants only.
///
/// GET /api/meetings/{meetingId}/transcripts
pub async fn get_transcripts(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(meeting_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<crate::db::TranscriptSegment>>>> {
    let meeting = repo::find_by_public_id(&state.db, &meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if meeting.participant(auth_user.id).is_none() {
        return Err(ApiError::Forbidden(
            "Only participants can read transcripts".to_string(),
        ));
    }

    Ok(ok("Transcripts", meeting.transcripts.0))
}
