//! Meeting Lifecycle Service
//!
//! Drives the pure state machine through the repository's atomic
//! read-modify-write, and applies the cross-document side effects: user
//! statistics, reminder scheduling, reminder cancellation.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::db::{
    meetings as repo, users, Meeting, MeetingSettings, MeetingStatistics, MeetingStatus,
    Participant, ParticipantRole, ParticipantStatus, RecordingState, TranscriptSegment,
};
use crate::error::{ApiError, ApiResult};
use crate::queue::{Job, JobPayload, MomGenerationJob};
use crate::scheduler;

use super::code::generate_code;
use super::permissions;
use super::state::{self, LeaveEffect};

/// Attempts to mint a unique public code before giving up. Collisions on a
/// 36^9 space are vanishingly rare; retries cover them.
const CODE_MINT_ATTEMPTS: usize = 5;

/// Input for meeting creation.
pub struct CreateInput {
    pub title: String,
    pub description: String,
    pub password: Option<String>,
    pub duration_minutes: i32,
    pub settings_patch: Option<serde_json::Value>,
    /// `None` creates an instant meeting starting now.
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Create an instant meeting. The host is seeded as a joined participant.
pub async fn create_meeting(
    state: &AppState,
    host: &AuthUser,
    input: CreateInput,
) -> ApiResult<Meeting> {
    let now = Utc::now();
    let seed = Participant::joining(host.id, ParticipantRole::Host, now);
    let meeting = insert_with_fresh_code(state, host, input, now, seed).await?;

    users::increment_hosted(&state.db, host.id).await?;
    info!(meeting_id = %meeting.meeting_id, host = %host.id, "Meeting created");
    Ok(meeting)
}

/// Schedule a meeting for the future and enqueue its reminder ladder.
pub async fn schedule_meeting(
    state: &AppState,
    host: &AuthUser,
    input: CreateInput,
) -> ApiResult<Meeting> {
    let scheduled_for = input
        .scheduled_for
        .ok_or_else(|| ApiError::BadRequest("scheduledFor is required".to_string()))?;
    if scheduled_for <= Utc::now() {
        return Err(ApiError::BadRequest(
            "scheduledFor must be in the future".to_string(),
        ));
    }

    let now = Utc::now();
    let mut seed = Participant::joining(host.id, ParticipantRole::Host, now);
    seed.status = ParticipantStatus::Invited;

    let meeting = insert_with_fresh_code(state, host, input, now, seed).await?;

    users::increment_hosted(&state.db, host.id).await?;
    scheduler::schedule_reminders(&state.queue, &meeting, host).await;

    info!(
        meeting_id = %meeting.meeting_id,
        scheduled_for = %meeting.scheduled_for,
        "Meeting scheduled"
    );
    Ok(meeting)
}

async fn insert_with_fresh_code(
    state: &AppState,
    host: &AuthUser,
    input: CreateInput,
    now: DateTime<Utc>,
    seed_participant: Participant,
) -> ApiResult<Meeting> {
    let mut settings = MeetingSettings::default();
    if let Some(patch) = &input.settings_patch {
        let patch_map = patch
            .as_object()
            .ok_or_else(|| ApiError::BadRequest("settings must be an object".to_string()))?;
        let mut merged = serde_json::to_value(&settings)?;
        let map = merged.as_object_mut().expect("settings serialize to object");
        for (key, value) in patch_map {
            map.insert(key.clone(), value.clone());
        }
        settings = serde_json::from_value(merged)
            .map_err(|e| ApiError::BadRequest(format!("Invalid settings: {e}")))?;
    }
    if input.password.is_some() {
        settings.require_password = true;
    }

    // The host's seed entry is the first join of an instant meeting, so it
    // starts ongoing right away; only scheduled meetings (host invited)
    // begin in scheduled. This also keeps cancellation scoped to meetings
    // nobody has joined yet.
    let status = initial_status(&seed_participant);

    let mut joined_stats = MeetingStatistics::default();
    if seed_participant.status == ParticipantStatus::Joined {
        joined_stats.total_participants = 1;
        joined_stats.peak_participants = 1;
    }

    // Rejection sampling on the public code: insert and retry on collision.
    let mut last_err = None;
    for _ in 0..CODE_MINT_ATTEMPTS {
        let meeting = Meeting {
            id: Uuid::now_v7(),
            meeting_id: generate_code(),
            title: input.title.clone(),
            description: input.description.clone(),
            host_user_id: host.id,
            password: input.password.clone(),
            scheduled_for: input.scheduled_for.unwrap_or(now),
            duration_minutes: input.duration_minutes,
            status,
            settings: Json(settings.clone()),
            participants: Json(vec![seed_participant.clone()]),
            recording: Json(RecordingState::default()),
            chat: Json(vec![]),
            transcripts: Json(vec![]),
            statistics: Json(joined_stats.clone()),
            created_at: now,
            updated_at: now,
        };

        match repo::insert(&state.db, &meeting).await {
            Ok(()) => return Ok(meeting),
            Err(e) if is_unique_violation(&e) => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::internal(
        last_err.map_or_else(|| anyhow::anyhow!("code mint failed"), Into::into),
    ))
}

/// Join a meeting by public code.
pub async fn join_meeting(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
    password: Option<&str>,
) -> ApiResult<Meeting> {
    let now = Utc::now();
    let (meeting, effect) = repo::update_atomic(&state.db, meeting_id, |meeting| {
        state::apply_join(meeting, user.id, password, now)
    })
    .await?;

    if effect.first_join {
        users::increment_attended(&state.db, user.id).await?;
    }

    info!(
        meeting_id = %meeting.meeting_id,
        user_id = %user.id,
        first_join = effect.first_join,
        "User joined meeting"
    );
    Ok(meeting)
}

/// Leave a meeting. Applies host succession and end-on-empty.
pub async fn leave_meeting(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
) -> ApiResult<(Meeting, LeaveEffect)> {
    let now = Utc::now();
    let (meeting, effect) = repo::update_atomic(&state.db, meeting_id, |meeting| {
        state::apply_leave(meeting, user.id, now)
    })
    .await?;

    if effect.attended_minutes > 0 {
        users::add_meeting_time(&state.db, user.id, effect.attended_minutes).await?;
    }

    if let Some(new_host) = effect.new_host {
        info!(
            meeting_id = %meeting.meeting_id,
            old_host = %user.id,
            new_host = %new_host,
            "Host succession"
        );
    }
    if effect.ended {
        info!(meeting_id = %meeting.meeting_id, "Meeting ended: last participant left");
        enqueue_minutes_generation(state, &meeting).await;
    }

    Ok((meeting, effect))
}

/// Kick off background minutes generation for a finished meeting with
/// transcripts. The deterministic job ID keeps end + last-leave races
/// idempotent, and the pipeline itself refuses double generation.
async fn enqueue_minutes_generation(state: &AppState, meeting: &Meeting) {
    if meeting.transcripts.is_empty() {
        return;
    }

    let job = Job::with_id(
        format!("mom-{}", meeting.meeting_id),
        JobPayload::MomGeneration(MomGenerationJob {
            meeting_id: meeting.meeting_id.clone(),
        }),
        None,
    );
    if let Err(e) = state.queue.enqueue(job).await {
        tracing::warn!(meeting_id = %meeting.meeting_id, error = %e, "Minutes generation enqueue failed");
    }
}

/// End a meeting. Host only.
pub async fn end_meeting(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
) -> ApiResult<Meeting> {
    let now = Utc::now();
    let user_id = user.id;
    let (meeting, ()) = repo::update_atomic(&state.db, meeting_id, |meeting| {
        if !permissions::is_host(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "Only the host can end the meeting".to_string(),
            ));
        }
        state::apply_end(meeting, now)
    })
    .await?;

    info!(meeting_id = %meeting.meeting_id, "Meeting ended by host");
    enqueue_minutes_generation(state, &meeting).await;
    Ok(meeting)
}

/// Cancel a scheduled meeting. Host only; removes pending reminders.
pub async fn cancel_meeting(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
) -> ApiResult<Meeting> {
    let user_id = user.id;
    let (meeting, ()) = repo::update_atomic(&state.db, meeting_id, |meeting| {
        if !permissions::is_host(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "Only the host can cancel the meeting".to_string(),
            ));
        }
        state::apply_cancel(meeting)
    })
    .await?;

    scheduler::cancel_reminders(&state.queue, meeting_id).await;

    info!(meeting_id = %meeting.meeting_id, "Meeting cancelled");
    Ok(meeting)
}

/// Merge a settings patch. Host only.
pub async fn update_settings(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
    patch: serde_json::Value,
) -> ApiResult<Meeting> {
    let user_id = user.id;
    let (meeting, ()) = repo::update_atomic(&state.db, meeting_id, |meeting| {
        if !permissions::is_host(meeting, user_id) {
            return Err(ApiError::Forbidden(
                "Only the host can change settings".to_string(),
            ));
        }
        state::apply_settings_patch(meeting, &patch)
    })
    .await?;

    Ok(meeting)
}

/// Append transcript segments. Joined participants only; duplicates by
/// timestamp are skipped.
pub async fn add_transcripts(
    state: &AppState,
    user: &AuthUser,
    meeting_id: &str,
    segments: Vec<TranscriptSegment>,
) -> ApiResult<(Meeting, usize)> {
    let user_id = user.id;
    repo::update_atomic(&state.db, meeting_id, move |meeting| {
        let joined = meeting
            .participant(user_id)
            .is_some_and(|p| p.status == ParticipantStatus::Joined);
        if !joined {
            return Err(ApiError::Forbidden(
                "Only joined participants can submit transcripts".to_string(),
            ));
        }
        state::apply_transcripts(meeting, segments)
    })
    .await
}

/// Lifecycle status a new meeting is persisted with, derived from the
/// host's seed entry: a joined host is the first join, an invited host
/// means the meeting is still waiting to start.
fn initial_status(seed: &Participant) -> MeetingStatus {
    if seed.status == ParticipantStatus::Joined {
        MeetingStatus::Ongoing
    } else {
        MeetingStatus::Scheduled
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_seed_starts_ongoing() {
        let seed = Participant::joining(Uuid::now_v7(), ParticipantRole::Host, Utc::now());
        assert_eq!(initial_status(&seed), MeetingStatus::Ongoing);
    }

    #[test]
    fn test_scheduled_seed_stays_scheduled() {
        let mut seed = Participant::joining(Uuid::now_v7(), ParticipantRole::Host, Utc::now());
        seed.status = ParticipantStatus::Invited;
        assert_eq!(initial_status(&seed), MeetingStatus::Scheduled);
    }
}
