//! Meeting State Machine
//!
//! Pure transition functions over the meeting document. Every mutation runs
//! inside the repository's `update_atomic`, so these functions never touch
//! the database. They take the loaded document, enforce the lifecycle and
//! roster invariants, and report side effects for the caller to apply
//! (statistics increments, reminder cancellation, fan-out).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    Meeting, MeetingStatus, Participant, ParticipantRole, ParticipantStatus,
};
use crate::error::{ApiError, ApiResult};

/// Side effects of a join.
#[derive(Debug, Clone, Copy)]
pub struct JoinEffect {
    /// First time this user joined this meeting: increment their
    /// attendance statistics exactly once.
    pub first_join: bool,
    /// The join moved the meeting from `scheduled` to `ongoing`.
    pub became_ongoing: bool,
}

/// Side effects of a leave.
#[derive(Debug, Clone, Copy)]
pub struct LeaveEffect {
    /// Host succession happened; the new host's user ID.
    pub new_host: Option<Uuid>,
    /// The last joined participant left and the meeting ended.
    pub ended: bool,
    /// Minutes the leaver spent in the meeting this session.
    pub attended_minutes: i64,
}

/// Join a meeting.
///
/// Rejoin is idempotent: an already-joined participant changes nothing and
/// increments nothing. A returning participant flips back to joined in
/// place with a fresh `joined_at`. The first join of a scheduled meeting
/// moves it to `ongoing`.
pub fn apply_join(
    meeting: &mut Meeting,
    user_id: Uuid,
    password: Option<&str>,
    now: DateTime<Utc>,
) -> ApiResult<JoinEffect> {
    match meeting.status {
        MeetingStatus::Ended => {
            return Err(ApiError::Gone("Meeting has ended".to_string()));
        }
        MeetingStatus::Cancelled => {
            return Err(ApiError::Gone("Meeting was cancelled".to_string()));
        }
        MeetingStatus::Scheduled | MeetingStatus::Ongoing => {}
    }

    if meeting.settings.require_password {
        let supplied = password.unwrap_or_default();
        if meeting.password.as_deref() != Some(supplied) {
            return Err(ApiError::Unauthenticated(
                "Invalid meeting password".to_string(),
            ));
        }
    }

    let at_capacity =
        count_joined(&meeting.participants) >= meeting.settings.max_participants as usize;

    let mut first_join = false;
    let existing = meeting
        .participants
        .iter_mut()
        .find(|p| p.user_id == user_id);

    match existing {
        Some(participant) if participant.status == ParticipantStatus::Joined => {
            // Idempotent rejoin: nothing to change.
        }
        Some(participant) => {
            // Returning participant: capacity applies, stats do not.
            if at_capacity {
                return Err(ApiError::ResourceExhausted("Meeting is full".to_string()));
            }
            participant.status = ParticipantStatus::Joined;
            participant.joined_at = now;
            participant.left_at = None;
        }
        None => {
            if at_capacity {
                return Err(ApiError::ResourceExhausted("Meeting is full".to_string()));
            }
            meeting.participants.push(Participant::joining(
                user_id,
                ParticipantRole::Participant,
                now,
            ));
            first_join = true;
        }
    }

    let joined = count_joined(&meeting.participants) as i64;
    meeting.statistics.total_participants = joined;
    if joined > meeting.statistics.peak_participants {
        meeting.statistics.peak_participants = joined;
    }

    let became_ongoing = meeting.status == MeetingStatus::Scheduled;
    if became_ongoing {
        meeting.status = MeetingStatus::Ongoing;
    }

    Ok(JoinEffect {
        first_join,
        became_ongoing,
    })
}

/// Leave a meeting.
///
/// If the leaver was the host, the first joined co-host (by join order)
/// inherits; failing that, the first joined participant. When nobody
/// remains joined the meeting ends.
pub fn apply_leave(
    meeting: &mut Meeting,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> ApiResult<LeaveEffect> {
    let leaver = meeting
        .participants
        .iter_mut()
        .find(|p| p.user_id == user_id && p.status == ParticipantStatus::Joined)
        .ok_or_else(|| ApiError::NotFound("You are not in this meeting".to_string()))?;

    let was_host = leaver.role == ParticipantRole::Host;
    let attended_minutes = (now - leaver.joined_at).num_minutes().max(0);
    leaver.status = ParticipantStatus::Left;
    leaver.left_at = Some(now);

    meeting.statistics.total_participants = count_joined(&meeting.participants) as i64;

    let mut new_host = None;
    if was_host {
        if let Some(successor_id) = pick_successor(&meeting.participants) {
            if let Some(old_host) = meeting
                .participants
                .iter_mut()
                .find(|p| p.user_id == user_id)
            {
                old_host.role = ParticipantRole::Participant;
            }
            if let Some(successor) = meeting
                .participants
                .iter_mut()
                .find(|p| p.user_id == successor_id)
            {
                successor.role = ParticipantRole::Host;
            }
            meeting.host_user_id = successor_id;
            new_host = Some(successor_id);
        }
    }

    let mut ended = false;
    if count_joined(&meeting.participants) == 0 && meeting.status == MeetingStatus::Ongoing {
        meeting.status = MeetingStatus::Ended;
        meeting.statistics.total_duration = elapsed_minutes(meeting.scheduled_for, now);
        ended = true;
    }

    Ok(LeaveEffect {
        new_host,
        ended,
        attended_minutes,
    })
}

/// End a meeting. Authorization (host-only) is the caller's job.
pub fn apply_end(meeting: &mut Meeting, now: DateTime<Utc>) -> ApiResult<()> {
    if meeting.status.is_terminal() {
        return Err(ApiError::FailedPrecondition(
            "Meeting is already over".to_string(),
        ));
    }
    meeting.status = MeetingStatus::Ended;
    meeting.statistics.total_duration = elapsed_minutes(meeting.scheduled_for, now);
    Ok(())
}

/// Cancel a meeting. Only valid from `scheduled`.
pub fn apply_cancel(meeting: &mut Meeting) -> ApiResult<()> {
    if meeting.status != MeetingStatus::Scheduled {
        return Err(ApiError::FailedPrecondition(
            "Only scheduled meetings can be cancelled".to_string(),
        ));
    }
    meeting.status = MeetingStatus::Cancelled;
    Ok(())
}

/// Shallow-merge a settings patch. Unknown keys are rejected by the
/// settings schema; supplied keys replace, missing keys stay.
pub fn apply_settings_patch(meeting: &mut Meeting, patch: &serde_json::Value) -> ApiResult<()> {
    let patch_map = patch
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Settings must be an object".to_string()))?;

    let mut merged = serde_json::to_value(&meeting.settings.0)?;
    let merged_map = merged.as_object_mut().expect("settings serialize to object");
    for (key, value) in patch_map {
        merged_map.insert(key.clone(), value.clone());
    }

    meeting.settings.0 = serde_json::from_value(merged)
        .map_err(|e| ApiError::BadRequest(format!("Invalid settings: {e}")))?;
    Ok(())
}

/// Append transcript segments, deduplicating on millisecond timestamps.
/// Returns the number of segments actually added.
pub fn apply_transcripts(
    meeting: &mut Meeting,
    segments: Vec<crate::db::TranscriptSegment>,
) -> ApiResult<usize> {
    let mut added = 0;
    for segment in segments {
        let duplicate = meeting
            .transcripts
            .iter()
            .any(|t| t.timestamp == segment.timestamp);
        if !duplicate {
            meeting.transcripts.push(segment);
            added += 1;
        }
    }
    Ok(added)
}

fn count_joined(participants: &[Participant]) -> usize {
    participants
        .iter()
        .filter(|p| p.status == ParticipantStatus::Joined)
        .count()
}

/// First joined co-host in join order, else first joined participant.
fn pick_successor(participants: &[Participant]) -> Option<Uuid> {
    let joined = |role: ParticipantRole| {
        participants
            .iter()
            .filter(move |p| p.status == ParticipantStatus::Joined && p.role == role)
            .min_by_key(|p| p.joined_at)
            .map(|p| p.user_id)
    };
    joined(ParticipantRole::CoHost).or_else(|| joined(ParticipantRole::Participant))
}

fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (((to - from).num_seconds() as f64) / 60.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        MeetingSettings, MeetingStatistics, RecordingState, TranscriptSegment,
    };
    use chrono::Duration;
    use sqlx::types::Json;

    fn meeting_with(host: Uuid, status: MeetingStatus) -> Meeting {
        let now = Utc::now();
        Meeting {
            id: Uuid::now_v7(),
            meeting_id: "ABC-123-XYZ".into(),
            title: "Weekly sync".into(),
            description: String::new(),
            host_user_id: host,
            password: None,
            scheduled_for: now,
            duration_minutes: 60,
            status,
            settings: Json(MeetingSettings::default()),
            participants: Json(vec![]),
            recording: Json(RecordingState::default()),
            chat: Json(vec![]),
            transcripts: Json(vec![]),
            statistics: Json(MeetingStatistics::default()),
            created_at: now,
            updated_at: now,
        }
    }

    fn join(meeting: &mut Meeting, user: Uuid) -> JoinEffect {
        apply_join(meeting, user, None, Utc::now()).unwrap()
    }

    #[test]
    fn test_first_join_transitions_to_ongoing() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);

        let effect = join(&mut meeting, host);
        assert!(effect.first_join);
        assert!(effect.became_ongoing);
        assert_eq!(meeting.status, MeetingStatus::Ongoing);
        assert_eq!(meeting.statistics.peak_participants, 1);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let user = Uuid::now_v7();
        let mut meeting = meeting_with(user, MeetingStatus::Scheduled);

        let first = join(&mut meeting, user);
        let snapshot = serde_json::to_value(&meeting.participants.0).unwrap();
        let second = join(&mut meeting, user);

        assert!(first.first_join);
        assert!(!second.first_join);
        assert_eq!(
            snapshot,
            serde_json::to_value(&meeting.participants.0).unwrap()
        );
        assert_eq!(meeting.participants.len(), 1);
    }

    #[test]
    fn test_join_leave_join_counts_stats_once() {
        let host = Uuid::now_v7();
        let user = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);
        join(&mut meeting, host);

        let first = join(&mut meeting, user);
        assert!(first.first_join);

        apply_leave(&mut meeting, user, Utc::now()).unwrap();
        let again = join(&mut meeting, user);

        assert!(!again.first_join);
        let entry = meeting.participant(user).unwrap();
        assert_eq!(entry.status, ParticipantStatus::Joined);
        assert!(entry.left_at.is_none());
        assert_eq!(meeting.participants.len(), 2);
    }

    #[test]
    fn test_capacity_enforced() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);
        meeting.settings.0.max_participants = 2;

        join(&mut meeting, host);
        join(&mut meeting, Uuid::now_v7());

        let err = apply_join(&mut meeting, Uuid::now_v7(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::ResourceExhausted(_)));
        assert_eq!(meeting.participants.len(), 2);
    }

    #[test]
    fn test_join_terminal_states_fails_gone() {
        let host = Uuid::now_v7();
        for status in [MeetingStatus::Ended, MeetingStatus::Cancelled] {
            let mut meeting = meeting_with(host, status);
            let err = apply_join(&mut meeting, Uuid::now_v7(), None, Utc::now()).unwrap_err();
            assert!(matches!(err, ApiError::Gone(_)));
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);
        meeting.settings.0.require_password = true;
        meeting.password = Some("sekrit".into());

        let err = apply_join(&mut meeting, Uuid::now_v7(), Some("nope"), Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));

        assert!(apply_join(&mut meeting, Uuid::now_v7(), Some("sekrit"), Utc::now()).is_ok());
    }

    #[test]
    fn test_host_succession_prefers_cohost() {
        let host = Uuid::now_v7();
        let cohost = Uuid::now_v7();
        let participant = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);

        join(&mut meeting, host);
        promote_to_host_seed(&mut meeting, host);
        join(&mut meeting, participant);
        join(&mut meeting, cohost);
        meeting
            .participants
            .iter_mut()
            .find(|p| p.user_id == cohost)
            .unwrap()
            .role = ParticipantRole::CoHost;

        let effect = apply_leave(&mut meeting, host, Utc::now()).unwrap();

        assert_eq!(effect.new_host, Some(cohost));
        assert_eq!(meeting.host_user_id, cohost);
        assert_eq!(meeting.status, MeetingStatus::Ongoing);
        assert_eq!(
            meeting.participant(cohost).unwrap().role,
            ParticipantRole::Host
        );
        assert_eq!(
            meeting.participant(host).unwrap().role,
            ParticipantRole::Participant
        );
        // Exactly one joined host.
        let hosts = meeting
            .participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Host && p.status == ParticipantStatus::Joined)
            .count();
        assert_eq!(hosts, 1);
    }

    #[test]
    fn test_host_succession_falls_back_to_oldest_participant() {
        let host = Uuid::now_v7();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);

        let t0 = Utc::now();
        apply_join(&mut meeting, host, None, t0).unwrap();
        promote_to_host_seed(&mut meeting, host);
        apply_join(&mut meeting, first, None, t0 + Duration::seconds(1)).unwrap();
        apply_join(&mut meeting, second, None, t0 + Duration::seconds(2)).unwrap();

        let effect = apply_leave(&mut meeting, host, Utc::now()).unwrap();
        assert_eq!(effect.new_host, Some(first));
    }

    #[test]
    fn test_last_leaver_ends_meeting() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);
        join(&mut meeting, host);
        promote_to_host_seed(&mut meeting, host);

        let effect = apply_leave(&mut meeting, host, Utc::now()).unwrap();
        assert!(effect.ended);
        assert!(effect.new_host.is_none());
        assert_eq!(meeting.status, MeetingStatus::Ended);
    }

    #[test]
    fn test_peak_participants_is_monotone() {
        let host = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);

        join(&mut meeting, host);
        join(&mut meeting, other);
        assert_eq!(meeting.statistics.peak_participants, 2);

        apply_leave(&mut meeting, other, Utc::now()).unwrap();
        assert_eq!(meeting.statistics.peak_participants, 2);
        assert_eq!(meeting.statistics.total_participants, 1);
    }

    #[test]
    fn test_cancel_only_from_scheduled() {
        let host = Uuid::now_v7();
        let mut scheduled = meeting_with(host, MeetingStatus::Scheduled);
        assert!(apply_cancel(&mut scheduled).is_ok());
        assert_eq!(scheduled.status, MeetingStatus::Cancelled);

        for status in [
            MeetingStatus::Ongoing,
            MeetingStatus::Ended,
            MeetingStatus::Cancelled,
        ] {
            let mut meeting = meeting_with(host, status);
            let err = apply_cancel(&mut meeting).unwrap_err();
            assert!(matches!(err, ApiError::FailedPrecondition(_)));
        }
    }

    #[test]
    fn test_end_terminal_fails() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Ended);
        assert!(apply_end(&mut meeting, Utc::now()).is_err());
    }

    #[test]
    fn test_settings_patch_is_shallow_merge() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Scheduled);

        apply_settings_patch(
            &mut meeting,
            &serde_json::json!({"enableChat": false, "maxParticipants": 10}),
        )
        .unwrap();

        assert!(!meeting.settings.enable_chat);
        assert_eq!(meeting.settings.max_participants, 10);
        // Untouched keys keep their values.
        assert!(meeting.settings.allow_guests);
    }

    #[test]
    fn test_transcripts_dedupe_by_timestamp() {
        let host = Uuid::now_v7();
        let mut meeting = meeting_with(host, MeetingStatus::Ongoing);

        let segment = |ts: i64, text: &str| TranscriptSegment {
            speaker_id: None,
            speaker_name: "Ada".into(),
            text: text.into(),
            timestamp: ts,
        };

        let added =
            apply_transcripts(&mut meeting, vec![segment(1000, "a"), segment(2000, "b")]).unwrap();
        assert_eq!(added, 2);

        let added =
            apply_transcripts(&mut meeting, vec![segment(1000, "dup"), segment(3000, "c")])
                .unwrap();
        assert_eq!(added, 1);
        assert_eq!(meeting.transcripts.len(), 3);
    }

    /// Seed helper: the service layer creates the host entry with role host;
    /// tests that join via `apply_join` need the promotion done manually.
    fn promote_to_host_seed(meeting: &mut Meeting, host: Uuid) {
        meeting
            .participants
            .iter_mut()
            .find(|p| p.user_id == host)
            .unwrap()
            .role = ParticipantRole::Host;
    }
}
