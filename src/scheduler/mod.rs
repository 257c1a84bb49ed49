//! Reminder Scheduler
//!
//! Thin layer over the job queue: one delayed reminder job per rung of the
//! 60/30/15/5-minute ladder, with deterministic IDs so cancellation can
//! remove them by name. The reminder worker re-validates against the
//! repository at fire time, so a cancelled meeting never emails anyone even
//! if a job slips through.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::auth::AuthUser;
use crate::db::{meetings as repo, users, Meeting, MeetingStatus};
use crate::queue::{Job, JobContext, JobError, JobPayload, JobQueue, QueueName, ReminderEmailJob, ReminderJob};

/// Minutes-before-start rungs for reminder delivery.
pub const REMINDER_LADDER: [i64; 4] = [60, 30, 15, 5];

/// Deterministic job ID for one reminder rung.
#[must_use]
pub fn reminder_job_id(meeting_id: &str, minutes_before: i64) -> String {
    format!("reminder-{meeting_id}-{minutes_before}")
}

/// Human label for the email template.
#[must_use]
pub fn time_label(minutes_before: i64) -> String {
    if minutes_before == 60 {
        "in 1 hour".to_string()
    } else {
        format!("in {minutes_before} minutes")
    }
}

/// Rungs of the ladder whose fire time still lies in the future.
#[must_use]
pub fn due_reminders(
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<(i64, DateTime<Utc>)> {
    REMINDER_LADDER
        .iter()
        .filter_map(|&minutes| {
            let fire_at = scheduled_for - Duration::minutes(minutes);
            (fire_at > now).then_some((minutes, fire_at))
        })
        .collect()
}

/// Enqueue the reminder ladder for a scheduled meeting.
pub async fn schedule_reminders(queue: &JobQueue, meeting: &Meeting, user: &AuthUser) {
    let now = Utc::now();
    for (minutes, fire_at) in due_reminders(meeting.scheduled_for, now) {
        let job = Job::with_id(
            reminder_job_id(&meeting.meeting_id, minutes),
            JobPayload::Reminder(ReminderJob {
                meeting_id: meeting.meeting_id.clone(),
                user_id: user.id,
                time_label: time_label(minutes),
                minutes_before: minutes,
            }),
            Some(fire_at),
        );

        if let Err(e) = queue.enqueue(job).await {
            warn!(
                meeting_id = %meeting.meeting_id,
                minutes,
                error = %e,
                "Failed to schedule reminder"
            );
        } else {
            debug!(meeting_id = %meeting.meeting_id, minutes, fire_at = %fire_at, "Reminder scheduled");
        }
    }
}

/// Remove all four reminder rungs for a meeting.
pub async fn cancel_reminders(queue: &JobQueue, meeting_id: &str) {
    for minutes in REMINDER_LADDER {
        queue
            .cancel(QueueName::Reminder, &reminder_job_id(meeting_id, minutes))
            .await;
    }
    info!(meeting_id = %meeting_id, "Reminders cancelled");
}

/// Reminder worker: re-load the meeting, no-op if it was cancelled or
/// deleted, otherwise enqueue one reminder email per registered attendee.
pub async fn run_reminder_job(ctx: &JobContext, job: &ReminderJob) -> Result<(), JobError> {
    let meeting = repo::find_by_public_id(&ctx.db, &job.meeting_id)
        .await
        .map_err(|e| JobError::retryable(format!("Meeting load failed: {e}")))?;

    let Some(meeting) = meeting else {
        debug!(meeting_id = %job.meeting_id, "Reminder no-op: meeting deleted");
        return Ok(());
    };
    if meeting.status == MeetingStatus::Cancelled {
        debug!(meeting_id = %job.meeting_id, "Reminder no-op: meeting cancelled");
        return Ok(());
    }

    let mut enqueued = 0usize;
    for participant in meeting.participants.iter() {
        let user = users::find_user_by_id(&ctx.db, participant.user_id)
            .await
            .map_err(|e| JobError::retryable(format!("User load failed: {e}")))?;
        let Some(user) = user else { continue };
        // Guests carry synthesized addresses; nothing to deliver to.
        if user.is_guest {
            continue;
        }

        let email_job = Job::immediate(JobPayload::ReminderEmail(ReminderEmailJob {
            to: user.email.clone(),
            recipient_name: user.display_name().to_string(),
            meeting_id: meeting.meeting_id.clone(),
            title: meeting.title.clone(),
            scheduled_for: meeting.scheduled_for,
            time_label: job.time_label.clone(),
        }));
        if let Err(e) = ctx.queue.enqueue(email_job).await {
            warn!(meeting_id = %meeting.meeting_id, error = %e, "Reminder email enqueue failed");
        } else {
            enqueued += 1;
        }
    }

    info!(
        meeting_id = %meeting.meeting_id,
        time_label = %job.time_label,
        recipients = enqueued,
        "Reminder processed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_deterministic() {
        assert_eq!(
            reminder_job_id("ABC-123-XYZ", 30),
            "reminder-ABC-123-XYZ-30"
        );
    }

    #[test]
    fn test_full_ladder_for_distant_meeting() {
        let now = Utc::now();
        let rungs = due_reminders(now + Duration::minutes(90), now);
        let minutes: Vec<i64> = rungs.iter().map(|(m, _)| *m).collect();
        assert_eq!(minutes, vec![60, 30, 15, 5]);

        // Each fire time precedes the start by its rung.
        for (m, fire_at) in rungs {
            assert_eq!(
                (now + Duration::minutes(90)) - fire_at,
                Duration::minutes(m)
            );
        }
    }

    #[test]
    fn test_past_rungs_are_skipped() {
        let now = Utc::now();
        let rungs = due_reminders(now + Duration::minutes(45), now);
        let minutes: Vec<i64> = rungs.iter().map(|(m, _)| *m).collect();
        assert_eq!(minutes, vec![30, 15, 5]);
    }

    #[test]
    fn test_imminent_meeting_gets_no_reminders() {
        let now = Utc::now();
        assert!(due_reminders(now + Duration::minutes(3), now).is_empty());
        assert!(due_reminders(now - Duration::minutes(10), now).is_empty());
    }

    #[test]
    fn test_time_labels() {
        assert_eq!(time_label(60), "in 1 hour");
        assert_eq!(time_label(15), "in 15 minutes");
    }
}
