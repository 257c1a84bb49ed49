//! Database Models
//!
//! Meeting documents keep their nested collections (participants, chat,
//! transcripts, statistics) as JSONB columns; all wire names are camelCase
//! to match the browser client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Users
// ============================================================================

/// User model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: Uuid,
    /// Unique username (3-30 chars).
    pub username: String,
    /// Unique email, lowercased.
    pub email: String,
    /// Bcrypt password hash. Absent for guests.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// Whether this is a guest account.
    pub is_guest: bool,
    /// Profile data (display name, avatar, bio).
    pub profile: Json<UserProfile>,
    /// Free-form client preferences.
    pub preferences: Json<serde_json::Value>,
    /// Aggregate meeting statistics.
    pub statistics: Json<UserStatistics>,
    /// Whether the account is active. Inactive users cannot authenticate.
    pub is_active: bool,
    /// Last seen timestamp (updated on logout).
    pub last_seen_at: Option<DateTime<Utc>>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Display name for fan-out payloads: profile display name, falling
    /// back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.profile
            .display_name
            .as_deref()
            .unwrap_or(&self.username)
    }
}

/// User profile data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Display name shown to other participants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Short bio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Aggregate per-user meeting statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStatistics {
    pub total_meetings: i64,
    pub meetings_hosted: i64,
    pub meetings_attended: i64,
    pub total_meeting_time_minutes: i64,
}

// ============================================================================
// Meetings
// ============================================================================

/// Meeting lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "meeting_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    /// Scheduled for the future; no one has joined yet.
    Scheduled,
    /// At least one participant has joined.
    Ongoing,
    /// Terminal: ended by the host or by the last participant leaving.
    Ended,
    /// Terminal: cancelled before anyone joined.
    Cancelled,
}

impl MeetingStatus {
    /// Terminal states cannot transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Cancelled)
    }
}

/// Meeting model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Meeting {
    /// Unique row ID.
    pub id: Uuid,
    /// Public 9-alphanumeric code formatted `XXX-XXX-XXX`.
    pub meeting_id: String,
    /// Meeting title (max 100 chars).
    pub title: String,
    /// Meeting description (max 500 chars).
    pub description: String,
    /// Current host. Updated on host succession.
    pub host_user_id: Uuid,
    /// Join password, if `settings.requirePassword`.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Scheduled start time.
    pub scheduled_for: DateTime<Utc>,
    /// Planned duration in minutes.
    pub duration_minutes: i32,
    /// Lifecycle status.
    pub status: MeetingStatus,
    /// Meeting settings.
    pub settings: Json<MeetingSettings>,
    /// Participant roster. At most one entry per user.
    pub participants: Json<Vec<Participant>>,
    /// Recording state and uploaded files.
    pub recording: Json<RecordingState>,
    /// Append-only chat log.
    pub chat: Json<Vec<ChatMessage>>,
    /// Transcript segments, deduplicated by timestamp.
    pub transcripts: Json<Vec<TranscriptSegment>>,
    /// Aggregate meeting statistics.
    pub statistics: Json<MeetingStatistics>,
    /// When the meeting was created.
    pub created_at: DateTime<Utc>,
    /// When the meeting was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// Count of participants currently joined.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Joined)
            .count()
    }

    /// Find a participant entry by user ID.
    #[must_use]
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_participants() -> i32 {
    50
}

/// Per-meeting settings. Missing keys fall back to the product defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeetingSettings {
    pub allow_guests: bool,
    pub require_password: bool,
    pub enable_recording: bool,
    pub enable_chat: bool,
    pub enable_screen_share: bool,
    pub enable_raise_hand: bool,
    pub enable_reactions: bool,
    pub max_participants: i32,
    pub waiting_room: bool,
    pub mute_on_entry: bool,
    pub video_on_entry: bool,
}

impl Default for MeetingSettings {
    fn default() -> Self {
        Self {
            allow_guests: default_true(),
            require_password: false,
            enable_recording: false,
            enable_chat: default_true(),
            enable_screen_share: default_true(),
            enable_raise_hand: default_true(),
            enable_reactions: default_true(),
            max_participants: default_max_participants(),
            waiting_room: false,
            mute_on_entry: false,
            video_on_entry: false,
        }
    }
}

/// Participant role within a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "co-host")]
    CoHost,
    #[serde(rename = "participant")]
    Participant,
}

/// Participant presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Joined,
    Left,
    Removed,
    Invited,
}

/// Per-participant permission grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantPermissions {
    pub can_share: bool,
    pub can_record: bool,
    pub can_mute_others: bool,
    pub can_remove_others: bool,
}

impl Default for ParticipantPermissions {
    fn default() -> Self {
        Self {
            can_share: true,
            can_record: false,
            can_mute_others: false,
            can_remove_others: false,
        }
    }
}

/// Client-reported media state. Reconciled from broadcasts, never
/// authoritative on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub hand_raised: bool,
}

/// One roster entry. Status flips in place on leave/rejoin; the entry is
/// never duplicated for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub permissions: ParticipantPermissions,
    #[serde(default)]
    pub media_state: MediaState,
}

impl Participant {
    /// A fresh roster entry for a user joining now.
    #[must_use]
    pub fn joining(user_id: Uuid, role: ParticipantRole, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            joined_at: now,
            left_at: None,
            role,
            status: ParticipantStatus::Joined,
            permissions: ParticipantPermissions::default(),
            media_state: MediaState::default(),
        }
    }
}

/// Aggregate meeting statistics. `peak_participants` is monotone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeetingStatistics {
    pub total_participants: i64,
    pub peak_participants: i64,
    pub chat_messages: i64,
    /// Actual duration in minutes, computed at end.
    pub total_duration: i64,
}

/// Recording state for a meeting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingState {
    pub is_recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<Uuid>,
    pub files: Vec<RecordingFile>,
}

/// Metadata for an uploaded recording file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFile {
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
    /// Set by the recording post-processing worker.
    #[serde(default)]
    pub processed: bool,
}

/// Chat message sender snapshot, denormalized so the log survives profile
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSender {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Chat message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageType {
    Text,
    File,
}

/// Attached file metadata for file-type chat messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFile {
    pub filename: String,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
}

/// One entry in the append-only chat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender: ChatSender,
    pub message: String,
    #[serde(rename = "type")]
    pub message_type: ChatMessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<ChatFile>,
}

/// One transcript segment. Deduplicated by millisecond `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<Uuid>,
    pub speaker_name: String,
    pub text: String,
    /// Segment start, epoch milliseconds.
    pub timestamp: i64,
}

// ============================================================================
// Meeting minutes
// ============================================================================

/// Minutes generation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "minutes_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MinutesStatus {
    Processing,
    Completed,
    Failed,
}

/// Action item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
}

/// Action item completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
}

/// One action item extracted from the meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub priority: ActionPriority,
    pub status: ActionStatus,
}

/// One follow-up item extracted from the meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub status: ActionStatus,
}

/// Attendee snapshot computed from the participant roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: ParticipantRole,
    pub join_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leave_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
}

/// Metadata about the AI pass that produced the minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProcessing {
    pub model: String,
    pub processed_at: DateTime<Utc>,
    pub tokens_used: i64,
    pub confidence: f64,
}

/// Email delivery state for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientState {
    Pending,
    Queued,
    Sent,
    Failed,
}

/// Per-recipient delivery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientStatus {
    pub email: String,
    pub status: RecipientState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate email delivery state for a minutes record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailDelivery {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    pub recipients: Vec<RecipientStatus>,
}

/// Meeting minutes record. One per meeting.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesRecord {
    pub id: Uuid,
    pub meeting_id: String,
    pub title: String,
    pub meeting_date: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub attendees: Json<Vec<Attendee>>,
    pub agenda: Json<Vec<String>>,
    pub transcripts: Json<Vec<TranscriptSegment>>,
    pub summary: String,
    pub discussion_points: Json<Vec<String>>,
    pub decisions: Json<Vec<String>>,
    pub action_items: Json<Vec<ActionItem>>,
    pub highlights: Json<Vec<String>>,
    pub questions_raised: Json<Vec<String>>,
    pub follow_ups: Json<Vec<FollowUp>>,
    pub ai_processing: Option<Json<AiProcessing>>,
    pub email_delivery: Json<EmailDelivery>,
    pub status: MinutesStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: MeetingSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.allow_guests);
        assert!(settings.enable_chat);
        assert!(!settings.require_password);
        assert_eq!(settings.max_participants, 50);
    }

    #[test]
    fn test_participant_role_wire_names() {
        assert_eq!(
            serde_json::to_string(&ParticipantRole::CoHost).unwrap(),
            "\"co-host\""
        );
        assert_eq!(
            serde_json::to_string(&ParticipantRole::Host).unwrap(),
            "\"host\""
        );
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let msg = ChatMessage {
            sender: ChatSender {
                id: Uuid::nil(),
                username: "ada".into(),
                avatar: None,
            },
            message: "hello".into(),
            message_type: ChatMessageType::Text,
            timestamp: Utc::now(),
            file: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["sender"]["username"], "ada");
        assert!(json.get("file").is_none());
    }
}
