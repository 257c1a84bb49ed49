//! Email Dispatcher
//!
//! SMTP delivery for reminder and minutes emails over a single lettre
//! transport. The dispatcher is a stateless renderer; per-recipient
//! delivery status for minutes emails is persisted into the minutes
//! record's `emailDelivery`. Transport-level failures bubble up as
//! retryable; permanent SMTP rejections are recorded and not retried.

use anyhow::{Context, Result};
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{minutes as minutes_repo, MinutesRecord, RecipientState, RecipientStatus};
use crate::queue::{JobContext, JobError, MinutesEmailJob, ReminderEmailJob};

/// Email service for transactional mail via SMTP.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
}

impl EmailService {
    /// Create a new email service from server configuration.
    ///
    /// Requires SMTP to be fully configured (`config.has_smtp()`).
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.email_host.as_ref().context("EMAIL_HOST is required")?;
        let username = config.email_user.as_ref().context("EMAIL_USER is required")?;
        let password = config.email_pass.as_ref().context("EMAIL_PASS is required")?;
        let from = config.email_from.as_ref().unwrap_or(username);

        let from_address: Mailbox = from
            .parse()
            .context("EMAIL_FROM is not a valid email address")?;

        let creds = Credentials::new(username.clone(), password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("Failed to create SMTP transport")?
            .port(config.email_port)
            .credentials(creds)
            .build();

        Ok(Self {
            mailer,
            from_address,
        })
    }

    /// Verify the SMTP connection at startup.
    pub async fn test_connection(&self) -> Result<()> {
        self.mailer
            .test_connection()
            .await
            .context("SMTP connection test failed")?;
        Ok(())
    }

    /// Send one HTML email.
    async fn send_html(
        &self,
        to: &str,
        subject: &str,
        html: String,
    ) -> Result<(), lettre::transport::smtp::Error> {
        let to_mailbox: Mailbox = match to.parse() {
            Ok(mb) => mb,
            Err(e) => {
                // Unparseable address is permanent by definition; surface it
                // through the response-code-free path below.
                warn!(to = %to, error = %e, "Invalid recipient address");
                return Ok(());
            }
        };

        let email = Message::builder()
            .from(self.from_address.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .expect("static message structure");

        self.mailer.send(email).await.map(|_| ())
    }

    /// Send a meeting reminder.
    pub async fn send_reminder(
        &self,
        job: &ReminderEmailJob,
    ) -> Result<(), lettre::transport::smtp::Error> {
        let subject = format!("Reminder: \"{}\" starts {}", job.title, job.time_label);
        let html = render_reminder(job);
        self.send_html(&job.to, &subject, html).await
    }

    /// Send a minutes summary.
    pub async fn send_minutes(
        &self,
        to: &str,
        recipient_name: &str,
        record: &MinutesRecord,
    ) -> Result<(), lettre::transport::smtp::Error> {
        let subject = format!("Meeting minutes: {}", record.title);
        let html = render_minutes(recipient_name, record);
        self.send_html(to, &subject, html).await
    }
}

// ============================================================================
// Templates
// ============================================================================

fn render_reminder(job: &ReminderEmailJob) -> String {
    format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto">
  <h2 style="color:#2b6cb0">Your meeting starts {label}</h2>
  <p>Hi {name},</p>
  <p><strong>{title}</strong> is scheduled for {when} UTC.</p>
  <p style="background:#edf2f7;padding:12px;border-radius:6px">
    Meeting code: <strong>{code}</strong>
  </p>
  <p>See you there!</p>
</div>"#,
        label = escape(&job.time_label),
        name = escape(&job.recipient_name),
        title = escape(&job.title),
        when = job.scheduled_for.format("%Y-%m-%d %H:%M"),
        code = escape(&job.meeting_id),
    )
}

fn render_minutes(recipient_name: &str, record: &MinutesRecord) -> String {
    let list = |items: &[String]| -> String {
        if items.is_empty() {
            "<li><em>None</em></li>".to_string()
        } else {
            items
                .iter()
                .map(|i| format!("<li>{}</li>", escape(i)))
                .collect()
        }
    };

    let action_items: String = if record.action_items.is_empty() {
        "<li><em>None</em></li>".to_string()
    } else {
        record
            .action_items
            .iter()
            .map(|item| {
                let assignee = item
                    .assignee
                    .as_deref()
                    .map(|a| format!(" &mdash; {}", escape(a)))
                    .unwrap_or_default();
                let deadline = item
                    .deadline
                    .map(|d| format!(" (due {d})"))
                    .unwrap_or_default();
                format!(
                    "<li>{}{assignee}{deadline}</li>",
                    escape(&item.description)
                )
            })
            .collect()
    };

    format!(
        r#"<div style="font-family:sans-serif;max-width:600px;margin:0 auto">
  <h2 style="color:#2b6cb0">Minutes: {title}</h2>
  <p>Hi {name}, here is the summary of your meeting on {date}.</p>
  <h3>Summary</h3>
  <p>{summary}</p>
  <h3>Decisions</h3>
  <ul>{decisions}</ul>
  <h3>Action items</h3>
  <ul>{action_items}</ul>
  <h3>Highlights</h3>
  <ul>{highlights}</ul>
</div>"#,
        title = escape(&record.title),
        name = escape(recipient_name),
        date = record.meeting_date.format("%Y-%m-%d"),
        summary = escape(&record.summary),
        decisions = list(&record.decisions.0),
        highlights = list(&record.highlights.0),
    )
}

/// Minimal HTML escaping for interpolated values.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ============================================================================
// Queue workers
// ============================================================================

/// Email worker: meeting reminder.
pub async fn run_reminder_email(ctx: &JobContext, job: &ReminderEmailJob) -> Result<(), JobError> {
    let Some(email) = &ctx.email else {
        warn!(to = %job.to, "Reminder email skipped: SMTP not configured");
        return Ok(());
    };

    match email.send_reminder(job).await {
        Ok(()) => {
            info!(to = %job.to, meeting_id = %job.meeting_id, "Reminder email sent");
            Ok(())
        }
        Err(e) if e.is_permanent() => {
            // SMTP rejected the message outright; retrying cannot help.
            Err(JobError::permanent(format!("SMTP rejection: {e}")))
        }
        Err(e) => Err(JobError::retryable(format!("SMTP transport error: {e}"))),
    }
}

/// Email worker: minutes delivery with per-recipient status tracking.
pub async fn run_minutes_email(ctx: &JobContext, job: &MinutesEmailJob) -> Result<(), JobError> {
    let Some(email) = &ctx.email else {
        warn!(to = %job.to, "Minutes email skipped: SMTP not configured");
        return Ok(());
    };

    let record = minutes_repo::find_by_meeting(&ctx.db, &job.meeting_id)
        .await
        .map_err(|e| JobError::retryable(format!("Minutes load failed: {e}")))?
        .ok_or_else(|| JobError::permanent("Minutes record missing"))?;

    let result = email.send_minutes(&job.to, &job.recipient_name, &record).await;

    let (recipient_state, error_text, job_result) = match result {
        Ok(()) => (RecipientState::Sent, None, Ok(())),
        Err(e) if e.is_permanent() => {
            // Permanent rejection: recorded, not retried, and the outer
            // operation does not fail.
            (RecipientState::Failed, Some(e.to_string()), Ok(()))
        }
        Err(e) => (
            RecipientState::Failed,
            Some(e.to_string()),
            Err(JobError::retryable(format!("SMTP transport error: {e}"))),
        ),
    };

    // Retryable failures keep the recipient in `queued` so the retry can
    // flip it; terminal outcomes are recorded now.
    if job_result.is_ok() {
        let to = job.to.clone();
        let update = minutes_repo::update_delivery_atomic(&ctx.db, &job.meeting_id, |delivery| {
            let now = Utc::now();
            match delivery.recipients.iter().position(|r| r.email == to) {
                Some(i) => {
                    let recipient = &mut delivery.recipients[i];
                    recipient.status = recipient_state;
                    recipient.sent_at = Some(now);
                    recipient.error = error_text.clone();
                }
                None => delivery.recipients.push(RecipientStatus {
                    email: to.clone(),
                    status: recipient_state,
                    sent_at: Some(now),
                    error: error_text.clone(),
                }),
            }

            let all_done = delivery
                .recipients
                .iter()
                .all(|r| matches!(r.status, RecipientState::Sent | RecipientState::Failed));
            if all_done {
                delivery.sent = delivery
                    .recipients
                    .iter()
                    .any(|r| r.status == RecipientState::Sent);
                delivery.sent_at = Some(now);
            }
        })
        .await;

        if let Err(e) = update {
            warn!(meeting_id = %job.meeting_id, error = %e, "Delivery status update failed");
        }
    }

    if job_result.is_ok() {
        info!(to = %job.to, meeting_id = %job.meeting_id, status = ?recipient_state, "Minutes email processed");
    }
    job_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&c"), "a&lt;b&gt;&amp;c");
    }

    #[test]
    fn test_reminder_template_mentions_code_and_label() {
        let job = ReminderEmailJob {
            to: "ada@example.com".into(),
            recipient_name: "Ada".into(),
            meeting_id: "ABC-123-XYZ".into(),
            title: "Weekly <sync>".into(),
            scheduled_for: Utc::now(),
            time_label: "in 15 minutes".into(),
        };
        let html = render_reminder(&job);
        assert!(html.contains("ABC-123-XYZ"));
        assert!(html.contains("in 15 minutes"));
        assert!(html.contains("Weekly &lt;sync&gt;"));
    }
}
