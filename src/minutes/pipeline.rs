//! Minutes Generation Pipeline
//!
//! Collects the meeting's roster and transcripts, asks the LLM for a
//! structured summary, normalizes the result, persists it, and fans out one
//! minutes email per attendee with a real address. A parse failure never
//! reaches the caller as an error: the record is persisted degraded with
//! `status = failed` so the email step can still deliver what exists.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    meetings as repo, minutes as minutes_repo, ActionItem, ActionPriority, ActionStatus,
    AiProcessing, Attendee, FollowUp, Meeting, MinutesRecord, MinutesStatus, ParticipantStatus,
    RecipientState, RecipientStatus, TranscriptSegment, User,
};
use crate::error::{ApiError, ApiResult};
use crate::queue::{Job, JobContext, JobError, JobPayload, MinutesEmailJob, MomGenerationJob};

/// Fixed confidence recorded for successful generations.
const CONFIDENCE: f64 = 0.85;

// ============================================================================
// LLM response shape (lenient)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawMinutes {
    summary: String,
    agenda: Vec<String>,
    discussion_points: Vec<String>,
    decisions: Vec<String>,
    action_items: Vec<RawItem>,
    highlights: Vec<String>,
    questions_raised: Vec<String>,
    follow_ups: Vec<RawItem>,
}

/// Lenient action/follow-up item: models return varied field names and
/// free-form priorities.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawItem {
    description: Option<String>,
    item: Option<String>,
    task: Option<String>,
    assignee: Option<String>,
    deadline: Option<String>,
    priority: Option<String>,
}

impl RawItem {
    fn description(&self) -> Option<String> {
        self.description
            .clone()
            .or_else(|| self.item.clone())
            .or_else(|| self.task.clone())
            .filter(|d| !d.trim().is_empty())
    }
}

fn parse_priority(raw: Option<&str>) -> ActionPriority {
    match raw.map(str::to_lowercase).as_deref() {
        Some("high") => ActionPriority::High,
        Some("low") => ActionPriority::Low,
        _ => ActionPriority::Medium,
    }
}

fn parse_deadline(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
}

fn normalize_action_items(raw: Vec<RawItem>) -> Vec<ActionItem> {
    raw.into_iter()
        .filter_map(|item| {
            let description = item.description()?;
            Some(ActionItem {
                description,
                assignee: item.assignee.clone(),
                deadline: parse_deadline(item.deadline.as_deref()),
                priority: parse_priority(item.priority.as_deref()),
                status: ActionStatus::Pending,
            })
        })
        .collect()
}

fn normalize_follow_ups(raw: Vec<RawItem>) -> Vec<FollowUp> {
    raw.into_iter()
        .filter_map(|item| {
            let description = item.description()?;
            Some(FollowUp {
                description,
                assignee: item.assignee.clone(),
                deadline: parse_deadline(item.deadline.as_deref()),
                status: ActionStatus::Pending,
            })
        })
        .collect()
}

// ============================================================================
// Attendees & prompt
// ============================================================================

/// Attendees are the participants who ever joined, with their join/leave
/// deltas.
pub(crate) fn compute_attendees(
    meeting: &Meeting,
    users: &[User],
    now: DateTime<Utc>,
) -> Vec<Attendee> {
    meeting
        .participants
        .iter()
        .filter(|p| {
            matches!(
                p.status,
                ParticipantStatus::Joined | ParticipantStatus::Left
            )
        })
        .map(|p| {
            let user = users.iter().find(|u| u.id == p.user_id);
            let leave_time = p.left_at;
            let until = leave_time.unwrap_or(now);
            Attendee {
                user_id: p.user_id,
                name: user.map_or_else(|| "Unknown".to_string(), |u| u.display_name().to_string()),
                email: user.and_then(|u| (!u.is_guest).then(|| u.email.clone())),
                role: p.role,
                join_time: p.joined_at,
                leave_time,
                duration_minutes: (until - p.joined_at).num_minutes().max(0),
            }
        })
        .collect()
}

fn format_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map_or_else(|| "00:00:00".to_string(), |t| t.format("%H:%M:%S").to_string())
}

/// Structured prompt: meeting header, attendee table, transcript lines,
/// and the exact JSON contract the parser expects.
pub(crate) fn build_prompt(
    meeting: &Meeting,
    attendees: &[Attendee],
    transcripts: &[TranscriptSegment],
) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str("You are an assistant that writes meeting minutes.\n\n");
    prompt.push_str(&format!("Meeting title: {}\n", meeting.title));
    prompt.push_str(&format!(
        "Date: {}\n",
        meeting.scheduled_for.format("%Y-%m-%d")
    ));
    prompt.push_str(&format!(
        "Duration: {} minutes\n\nAttendees (name | email | role):\n",
        meeting.duration_minutes
    ));

    for attendee in attendees {
        prompt.push_str(&format!(
            "- {} | {} | {:?}\n",
            attendee.name,
            attendee.email.as_deref().unwrap_or("-"),
            attendee.role
        ));
    }

    prompt.push_str("\nTranscript:\n");
    if transcripts.is_empty() {
        prompt.push_str("(no transcript recorded)\n");
    }
    for segment in transcripts {
        prompt.push_str(&format!(
            "[{}] ({}): {}\n",
            segment.speaker_name,
            format_timestamp(segment.timestamp),
            segment.text
        ));
    }

    prompt.push_str(
        "\nRespond with a single JSON object, no prose, with exactly these keys:\n\
         summary (string), agenda (string[]), discussionPoints (string[]),\n\
         decisions (string[]), actionItems ({description, assignee?, deadline?, priority?}[]),\n\
         highlights (string[]), questionsRaised (string[]),\n\
         followUps ({description, assignee?, deadline?}[]).\n\
         Deadlines use YYYY-MM-DD. Priorities are low, medium, or high.\n",
    );

    prompt
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the full pipeline for a meeting. Returns the stored record.
///
/// Fails with `Conflict` when a completed record already exists (the LLM is
/// never re-invoked for a finished meeting), `Unavailable` when the LLM
/// times out (retryable on the worker path).
pub async fn generate(ctx: &JobContext, meeting_id: &str) -> ApiResult<MinutesRecord> {
    let meeting = repo::find_by_public_id(&ctx.db, meeting_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Meeting not found".to_string()))?;

    if let Some(existing) = minutes_repo::find_by_meeting(&ctx.db, meeting_id).await? {
        if existing.status == MinutesStatus::Completed {
            return Err(ApiError::Conflict(
                "Minutes already generated for this meeting".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let user_ids: Vec<Uuid> = meeting.participants.iter().map(|p| p.user_id).collect();
    let roster: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE id = ANY($1)")
        .bind(&user_ids)
        .fetch_all(&ctx.db)
        .await?;
    let attendees = compute_attendees(&meeting, &roster, now);

    let start_time = meeting
        .participants
        .iter()
        .filter(|p| p.status != ParticipantStatus::Invited)
        .map(|p| p.joined_at)
        .min();
    let end_time = meeting.participants.iter().filter_map(|p| p.left_at).max();

    minutes_repo::upsert_processing(
        &ctx.db,
        &minutes_repo::ProcessingSeed {
            meeting_id: &meeting.meeting_id,
            title: &meeting.title,
            meeting_date: meeting.scheduled_for,
            start_time,
            end_time,
            duration_minutes: meeting.duration_minutes,
            attendees: &attendees,
            transcripts: &meeting.transcripts,
        },
    )
    .await?;

    let Some(llm) = &ctx.llm else {
        let record = store_degraded(ctx, &meeting.meeting_id, "LLM not configured").await?;
        return Ok(record);
    };

    let prompt = build_prompt(&meeting, &attendees, &meeting.transcripts);
    let output = match llm.generate(&prompt).await {
        Ok(output) => output,
        Err(e @ ApiError::Unavailable(_)) => return Err(e),
        Err(e) => {
            warn!(meeting_id = %meeting.meeting_id, error = %e, "LLM call failed");
            let record =
                store_degraded(ctx, &meeting.meeting_id, "AI generation failed").await?;
            enqueue_minutes_emails(ctx, &meeting.meeting_id, &attendees).await?;
            return Ok(record);
        }
    };

    let record = match serde_json::from_str::<RawMinutes>(&output.text) {
        Ok(raw) => {
            let content = minutes_repo::GeneratedContent {
                summary: if raw.summary.is_empty() {
                    "No summary available".to_string()
                } else {
                    raw.summary
                },
                agenda: raw.agenda,
                discussion_points: raw.discussion_points,
                decisions: raw.decisions,
                action_items: normalize_action_items(raw.action_items),
                highlights: raw.highlights,
                questions_raised: raw.questions_raised,
                follow_ups: normalize_follow_ups(raw.follow_ups),
            };
            let ai = AiProcessing {
                model: llm.model().to_string(),
                processed_at: now,
                tokens_used: output.tokens_used,
                confidence: CONFIDENCE,
            };
            minutes_repo::store_content(
                &ctx.db,
                &meeting.meeting_id,
                &content,
                Some(&ai),
                MinutesStatus::Completed,
                None,
            )
            .await?
        }
        Err(e) => {
            warn!(meeting_id = %meeting.meeting_id, error = %e, "LLM response was not valid JSON");
            store_degraded(ctx, &meeting.meeting_id, "AI response could not be parsed").await?
        }
    };

    enqueue_minutes_emails(ctx, &meeting.meeting_id, &attendees).await?;

    info!(
        meeting_id = %meeting.meeting_id,
        status = ?record.status,
        attendees = attendees.len(),
        "Minutes pipeline finished"
    );
    Ok(record)
}

/// Persist an empty-content record marked failed. The email step still
/// runs so attendees get whatever exists.
async fn store_degraded(
    ctx: &JobContext,
    meeting_id: &str,
    error: &str,
) -> ApiResult<MinutesRecord> {
    let content = minutes_repo::GeneratedContent {
        summary: "Minutes generation failed; no AI summary is available.".to_string(),
        agenda: vec![],
        discussion_points: vec![],
        decisions: vec![],
        action_items: vec![],
        highlights: vec![],
        questions_raised: vec![],
        follow_ups: vec![],
    };
    Ok(minutes_repo::store_content(
        &ctx.db,
        meeting_id,
        &content,
        None,
        MinutesStatus::Failed,
        Some(error),
    )
    .await?)
}

/// Seed the per-recipient delivery list and enqueue one email job per
/// attendee with an address.
pub(crate) async fn enqueue_minutes_emails(
    ctx: &JobContext,
    meeting_id: &str,
    attendees: &[Attendee],
) -> ApiResult<()> {
    let recipients: Vec<(String, String)> = attendees
        .iter()
        .filter_map(|a| a.email.clone().map(|email| (email, a.name.clone())))
        .collect();
    if recipients.is_empty() {
        return Ok(());
    }

    minutes_repo::update_delivery_atomic(&ctx.db, meeting_id, |delivery| {
        for (email, _) in &recipients {
            if !delivery.recipients.iter().any(|r| &r.email == email) {
                delivery.recipients.push(RecipientStatus {
                    email: email.clone(),
                    status: RecipientState::Pending,
                    sent_at: None,
                    error: None,
                });
            }
        }
    })
    .await?;

    for (email, name) in recipients {
        let job = Job::immediate(JobPayload::MinutesEmail(MinutesEmailJob {
            to: email.clone(),
            recipient_name: name,
            meeting_id: meeting_id.to_string(),
        }));
        if ctx.queue.enqueue(job).await.is_ok() {
            let _ = minutes_repo::update_delivery_atomic(&ctx.db, meeting_id, |delivery| {
                if let Some(r) = delivery.recipients.iter_mut().find(|r| r.email == email) {
                    r.status = RecipientState::Queued;
                }
            })
            .await;
        }
    }
    Ok(())
}

/// Queue worker entry point.
pub async fn run_generation_job(
    ctx: &JobContext,
    job: &MomGenerationJob,
) -> Result<(), JobError> {
    match generate(ctx, &job.meeting_id).await {
        Ok(_) => Ok(()),
        // Already generated elsewhere: nothing to do.
        Err(ApiError::Conflict(_)) => Ok(()),
        Err(ApiError::Unavailable(message)) => Err(JobError::retryable(message)),
        Err(e) => Err(JobError::permanent(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ParticipantRole;

    #[test]
    fn test_normalize_action_items_defaults() {
        let raw = vec![
            RawItem {
                description: Some("Ship the fix".into()),
                priority: Some("HIGH".into()),
                deadline: Some("2026-09-01".into()),
                ..RawItem::default()
            },
            RawItem {
                item: Some("Write docs".into()),
                deadline: Some("next week".into()),
                ..RawItem::default()
            },
            // No description in any field: dropped.
            RawItem::default(),
        ];

        let items = normalize_action_items(raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].priority, ActionPriority::High);
        assert_eq!(
            items[0].deadline,
            NaiveDate::from_ymd_opt(2026, 9, 1)
        );
        assert_eq!(items[0].status, ActionStatus::Pending);
        assert_eq!(items[1].priority, ActionPriority::Medium);
        assert!(items[1].deadline.is_none());
    }

    #[test]
    fn test_raw_minutes_tolerates_missing_keys() {
        let raw: RawMinutes = serde_json::from_str(r#"{"summary": "short"}"#).unwrap();
        assert_eq!(raw.summary, "short");
        assert!(raw.decisions.is_empty());
    }

    #[test]
    fn test_prompt_contains_contract_and_transcript() {
        use crate::db::{MeetingSettings, MeetingStatistics, MeetingStatus, RecordingState};
        use sqlx::types::Json;

        let now = Utc::now();
        let meeting = Meeting {
            id: Uuid::now_v7(),
            meeting_id: "ABC-123-XYZ".into(),
            title: "Planning".into(),
            description: String::new(),
            host_user_id: Uuid::now_v7(),
            password: None,
            scheduled_for: now,
            duration_minutes: 45,
            status: MeetingStatus::Ended,
            settings: Json(MeetingSettings::default()),
            participants: Json(vec![]),
            recording: Json(RecordingState::default()),
            chat: Json(vec![]),
            transcripts: Json(vec![]),
            statistics: Json(MeetingStatistics::default()),
            created_at: now,
            updated_at: now,
        };
        let attendees = vec![Attendee {
            user_id: Uuid::now_v7(),
            name: "Ada".into(),
            email: Some("ada@example.com".into()),
            role: ParticipantRole::Host,
            join_time: now,
            leave_time: None,
            duration_minutes: 45,
        }];
        let transcripts = vec![TranscriptSegment {
            speaker_id: None,
            speaker_name: "Ada".into(),
            text: "Let's begin.".into(),
            timestamp: 1_700_000_000_000,
        }];

        let prompt = build_prompt(&meeting, &attendees, &transcripts);
        assert!(prompt.contains("Planning"));
        assert!(prompt.contains("Ada | ada@example.com"));
        assert!(prompt.contains("[Ada] ("));
        assert!(prompt.contains("Let's begin."));
        assert!(prompt.contains("actionItems"));
        assert!(prompt.contains("followUps"));
    }

    #[test]
    fn test_parse_fenced_llm_payload_end_to_end() {
        let fenced = "```json\n{\"summary\":\"ok\",\"actionItems\":[{\"description\":\"x\"}]}\n```";
        let stripped = crate::minutes::llm::strip_code_fences(fenced);
        let raw: RawMinutes = serde_json::from_str(stripped).unwrap();
        assert_eq!(raw.summary, "ok");
        assert_eq!(raw.action_items.len(), 1);
    }
}
