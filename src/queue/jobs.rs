//! Job Types
//!
//! Typed payloads for the four named queues. Jobs serialize to JSON for the
//! Redis backing store; deterministic IDs make scheduled reminders
//! idempotent to enqueue and cancellable by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueName {
    Email,
    Reminder,
    MomGeneration,
    Recording,
}

impl QueueName {
    /// All queues, for worker startup.
    pub const ALL: [Self; 4] = [
        Self::Email,
        Self::Reminder,
        Self::MomGeneration,
        Self::Recording,
    ];

    /// Stable name used in Redis keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Reminder => "reminder",
            Self::MomGeneration => "momGeneration",
            Self::Recording => "recording",
        }
    }

    /// Worker pool size per queue.
    #[must_use]
    pub const fn concurrency(self) -> usize {
        match self {
            Self::Email => 5,
            Self::Reminder | Self::MomGeneration | Self::Recording => 2,
        }
    }

    /// Total delivery attempts before dead-lettering.
    #[must_use]
    pub const fn max_attempts(self) -> u32 {
        match self {
            Self::Email | Self::Reminder => 3,
            Self::MomGeneration | Self::Recording => 2,
        }
    }

    /// Base delay for exponential backoff.
    #[must_use]
    pub const fn backoff_base_secs(self) -> u64 {
        match self {
            Self::Email | Self::Reminder | Self::Recording => 5,
            Self::MomGeneration => 10,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for a scheduled reminder tick. The worker re-loads the meeting
/// and no-ops if it was cancelled or deleted in the meantime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderJob {
    pub meeting_id: String,
    pub user_id: Uuid,
    /// Human label for the template ("in 30 minutes").
    pub time_label: String,
    pub minutes_before: i64,
}

/// Payload for a reminder email, carrying a snapshot sufficient to render
/// the template without re-loading the meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEmailJob {
    pub to: String,
    pub recipient_name: String,
    pub meeting_id: String,
    pub title: String,
    pub scheduled_for: DateTime<Utc>,
    pub time_label: String,
}

/// Payload for a minutes email. The worker loads the minutes record to
/// render the full summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesEmailJob {
    pub to: String,
    pub recipient_name: String,
    pub meeting_id: String,
}

/// Payload for AI minutes generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomGenerationJob {
    pub meeting_id: String,
}

/// Payload for recording post-processing after an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingJob {
    pub meeting_id: String,
    pub filename: String,
}

/// Typed job payload. Unknown variants fail deserialization and are dropped
/// with a log line rather than crashing a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobPayload {
    #[serde(rename = "meeting-reminder")]
    ReminderEmail(ReminderEmailJob),
    #[serde(rename = "meeting-minutes")]
    MinutesEmail(MinutesEmailJob),
    Reminder(ReminderJob),
    MomGeneration(MomGenerationJob),
    Recording(RecordingJob),
}

impl JobPayload {
    /// The queue this payload belongs on.
    #[must_use]
    pub const fn queue(&self) -> QueueName {
        match self {
            Self::ReminderEmail(_) | Self::MinutesEmail(_) => QueueName::Email,
            Self::Reminder(_) => QueueName::Reminder,
            Self::MomGeneration(_) => QueueName::MomGeneration,
            Self::Recording(_) => QueueName::Recording,
        }
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job ID. Random for ad-hoc jobs, deterministic for scheduled
    /// reminders (`reminder-<meetingId>-<minutes>`).
    pub id: String,
    pub queue: QueueName,
    pub payload: JobPayload,
    /// Zero-based delivery attempt counter.
    #[serde(default)]
    pub attempt: u32,
    /// Earliest execution time, epoch milliseconds. Zero means immediate.
    #[serde(default)]
    pub not_before_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// An immediate job with a random ID.
    #[must_use]
    pub fn immediate(payload: JobPayload) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), payload, None)
    }

    /// A job with a caller-chosen ID, optionally delayed.
    #[must_use]
    pub fn with_id(id: String, payload: JobPayload, not_before: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            queue: payload.queue(),
            payload,
            attempt: 0,
            not_before_ms: not_before.map_or(0, |t| t.timestamp_millis()),
            created_at: Utc::now(),
        }
    }

    /// Whether the job is still in the future relative to `now`.
    #[must_use]
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.not_before_ms > now.timestamp_millis()
    }

    /// Backoff delay before the next attempt (exponential on the per-queue
    /// base).
    #[must_use]
    pub fn backoff_delay(&self) -> std::time::Duration {
        let base = self.queue.backoff_base_secs();
        std::time::Duration::from_secs(base.saturating_mul(1_u64 << self.attempt.min(16)))
    }
}

/// Worker-side job failure, classified for the retry policy.
#[derive(Debug)]
pub struct JobError {
    pub retryable: bool,
    pub message: String,
}

impl JobError {
    /// A transient failure the queue should retry with backoff.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// A permanent failure; retrying cannot help.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_routing() {
        let payload = JobPayload::MomGeneration(MomGenerationJob {
            meeting_id: "ABC-123-XYZ".into(),
        });
        assert_eq!(payload.queue(), QueueName::MomGeneration);
        assert_eq!(payload.queue().max_attempts(), 2);
        assert_eq!(payload.queue().backoff_base_secs(), 10);
    }

    #[test]
    fn test_payload_wire_tag() {
        let payload = JobPayload::ReminderEmail(ReminderEmailJob {
            to: "ada@example.com".into(),
            recipient_name: "Ada".into(),
            meeting_id: "ABC-123-XYZ".into(),
            title: "Standup".into(),
            scheduled_for: Utc::now(),
            time_label: "in 15 minutes".into(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "meeting-reminder");
    }

    #[test]
    fn test_backoff_is_exponential() {
        let mut job = Job::immediate(JobPayload::MomGeneration(MomGenerationJob {
            meeting_id: "ABC-123-XYZ".into(),
        }));
        assert_eq!(job.backoff_delay().as_secs(), 10);
        job.attempt = 1;
        assert_eq!(job.backoff_delay().as_secs(), 20);
        job.attempt = 2;
        assert_eq!(job.backoff_delay().as_secs(), 40);
    }

    #[test]
    fn test_delayed_detection() {
        let now = Utc::now();
        let job = Job::with_id(
            "reminder-ABC-123-XYZ-30".into(),
            JobPayload::Reminder(ReminderJob {
                meeting_id: "ABC-123-XYZ".into(),
                user_id: Uuid::now_v7(),
                time_label: "in 30 minutes".into(),
                minutes_before: 30,
            }),
            Some(now + chrono::Duration::minutes(30)),
        );
        assert!(job.is_delayed(now));
        assert!(!job.is_delayed(now + chrono::Duration::minutes(31)));
    }
}
