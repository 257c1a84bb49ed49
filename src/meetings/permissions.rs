//! Permission Derivation
//!
//! Per-action checks derived from the roster entry, the meeting settings,
//! and the host pointer. The host always passes every check.

use uuid::Uuid;

use crate::db::{Meeting, ParticipantRole};

/// Whether the user is the meeting host.
#[must_use]
pub fn is_host(meeting: &Meeting, user_id: Uuid) -> bool {
    if meeting.host_user_id == user_id {
        return true;
    }
    meeting
        .participant(user_id)
        .is_some_and(|p| p.role == ParticipantRole::Host)
}

/// Whether the user is host or co-host.
#[must_use]
fn is_host_or_cohost(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host(meeting, user_id)
        || meeting
            .participant(user_id)
            .is_some_and(|p| p.role == ParticipantRole::CoHost)
}

/// Whether the user may start/stop/upload recordings.
#[must_use]
pub fn can_record(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host_or_cohost(meeting, user_id)
        || meeting
            .participant(user_id)
            .is_some_and(|p| p.permissions.can_record)
}

/// Whether the user may send chat messages.
#[must_use]
pub fn can_chat(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host(meeting, user_id) || meeting.settings.enable_chat
}

/// Whether the user may share their screen.
#[must_use]
pub fn can_screen_share(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host_or_cohost(meeting, user_id) || meeting.settings.enable_screen_share
}

/// Whether the user may mute other participants.
#[must_use]
pub fn can_mute_others(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host(meeting, user_id)
        || meeting
            .participant(user_id)
            .is_some_and(|p| p.permissions.can_mute_others)
}

/// Whether the user may remove other participants.
#[must_use]
pub fn can_remove_others(meeting: &Meeting, user_id: Uuid) -> bool {
    is_host(meeting, user_id)
        || meeting
            .participant(user_id)
            .is_some_and(|p| p.permissions.can_remove_others)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        MeetingSettings, MeetingStatistics, MeetingStatus, Participant, ParticipantStatus,
        RecordingState,
    };
    use chrono::Utc;
    use sqlx::types::Json;

    fn meeting(host: Uuid, members: Vec<Participant>) -> Meeting {
        let now = Utc::now();
        Meeting {
            id: Uuid::now_v7(),
            meeting_id: "ABC-123-XYZ".into(),
            title: "t".into(),
            description: String::new(),
            host_user_id: host,
            password: None,
            scheduled_for: now,
            duration_minutes: 60,
            status: MeetingStatus::Ongoing,
            settings: Json(MeetingSettings::default()),
            participants: Json(members),
            recording: Json(RecordingState::default()),
            chat: Json(vec![]),
            transcripts: Json(vec![]),
            statistics: Json(MeetingStatistics::default()),
            created_at: now,
            updated_at: now,
        }
    }

    fn member(user_id: Uuid, role: ParticipantRole) -> Participant {
        let mut p = Participant::joining(user_id, role, Utc::now());
        p.status = ParticipantStatus::Joined;
        p
    }

    #[test]
    fn test_host_pointer_counts_as_host() {
        let host = Uuid::now_v7();
        let m = meeting(host, vec![]);
        assert!(is_host(&m, host));
        assert!(!is_host(&m, Uuid::now_v7()));
    }

    #[test]
    fn test_chat_disabled_blocks_participants_not_host() {
        let host = Uuid::now_v7();
        let user = Uuid::now_v7();
        let mut m = meeting(
            host,
            vec![
                member(host, ParticipantRole::Host),
                member(user, ParticipantRole::Participant),
            ],
        );
        m.settings.0.enable_chat = false;

        assert!(can_chat(&m, host));
        assert!(!can_chat(&m, user));
    }

    #[test]
    fn test_cohost_can_record() {
        let host = Uuid::now_v7();
        let cohost = Uuid::now_v7();
        let user = Uuid::now_v7();
        let m = meeting(
            host,
            vec![
                member(cohost, ParticipantRole::CoHost),
                member(user, ParticipantRole::Participant),
            ],
        );

        assert!(can_record(&m, cohost));
        assert!(!can_record(&m, user));
    }

    #[test]
    fn test_granted_permission_allows_mute() {
        let host = Uuid::now_v7();
        let user = Uuid::now_v7();
        let mut p = member(user, ParticipantRole::Participant);
        p.permissions.can_mute_others = true;
        let m = meeting(host, vec![p]);

        assert!(can_mute_others(&m, user));
        assert!(!can_remove_others(&m, user));
        assert!(can_remove_others(&m, host));
    }
}
