//! SES feedback (bounce, complaint, delivery) applied to logs and preferences.
//!
//! Queue bodies are either SNS envelopes whose `Message` field holds the
//! notification as a JSON string, or the raw SES notification itself.

use std::fmt;

use chrono::Utc;
use serde::Deserialize;
use serde_with::{json::JsonString, serde_as};
use tracing::{info, warn};

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        email::{EmailLog, EmailPreference, EmailStatus, EmailType, NewEmailLog},
        user::User,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Bounce,
    Complaint,
    Delivery,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Bounce => "Bounce",
            NotificationKind::Complaint => "Complaint",
            NotificationKind::Delivery => "Delivery",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesNotification {
    pub notification_type: String,
    #[serde(default)]
    pub mail: Option<MailInfo>,
    #[serde(default)]
    pub bounce: Option<Bounce>,
    #[serde(default)]
    pub complaint: Option<Complaint>,
    #[serde(default)]
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailInfo {
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecipient {
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounce {
    pub bounce_type: String,
    #[serde(rename = "bounceSubType", default)]
    pub bounce_sub_type: String,
    #[serde(default)]
    pub bounced_recipients: Vec<FeedbackRecipient>,
}

impl Bounce {
    pub fn is_hard(&self) -> bool {
        self.bounce_type == "Permanent"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    #[serde(default)]
    pub complained_recipients: Vec<FeedbackRecipient>,
    #[serde(default)]
    pub complaint_feedback_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde_as(as = "JsonString")]
    #[serde(rename = "Message")]
    message: SesNotification,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueBody {
    Sns(SnsEnvelope),
    Raw(SesNotification),
}

pub fn parse_notification(body: &str) -> Result<SesNotification, AppError> {
    let parsed: QueueBody = serde_json::from_str(body)
        .map_err(|err| AppError::BadRequest(format!("invalid notification body: {err}")))?;
    Ok(match parsed {
        QueueBody::Sns(envelope) => envelope.message,
        QueueBody::Raw(notification) => notification,
    })
}

impl SesNotification {
    pub fn message_id(&self) -> &str {
        self.mail
            .as_ref()
            .map(|mail| mail.message_id.as_str())
            .unwrap_or_default()
    }

    /// Addresses the notification is about, for its own kind.
    pub fn recipients(&self) -> Vec<String> {
        if let Some(bounce) = &self.bounce {
            return bounce
                .bounced_recipients
                .iter()
                .map(|r| r.email_address.clone())
                .collect();
        }
        if let Some(complaint) = &self.complaint {
            return complaint
                .complained_recipients
                .iter()
                .map(|r| r.email_address.clone())
                .collect();
        }
        self.delivery
            .as_ref()
            .map(|delivery| delivery.recipients.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub skipped: Option<String>,
    pub recipients: usize,
    pub logs_updated: usize,
    pub logs_created: usize,
    pub preferences_updated: usize,
    pub lines: Vec<String>,
}

/// Applies one notification. With `dry_run` nothing is written.
pub async fn process_notification(
    db: &DbPool,
    expected: NotificationKind,
    notification: &SesNotification,
    dry_run: bool,
) -> Result<NotificationReport, AppError> {
    let mut report = NotificationReport::default();
    if notification.notification_type != expected.as_str() {
        report.lines.push(format!(
            "Skipping non-{} notification: {}",
            expected.as_str().to_lowercase(),
            notification.notification_type
        ));
        report.skipped = Some(notification.notification_type.clone());
        return Ok(report);
    }

    let message_id = notification.message_id();
    let recipients = notification.recipients();
    report.recipients = recipients.len();
    report.lines.push(match (expected, &notification.bounce, &notification.complaint) {
        (NotificationKind::Bounce, Some(bounce), _) => format!(
            "Processing bounce: {}/{} for {} recipients",
            bounce.bounce_type,
            bounce.bounce_sub_type,
            recipients.len()
        ),
        (NotificationKind::Complaint, _, Some(complaint)) => format!(
            "Processing complaint: {} for {} recipients",
            complaint.complaint_feedback_type.as_deref().unwrap_or("unknown"),
            recipients.len()
        ),
        _ => format!("Processing {expected} for {} recipients", recipients.len()),
    });

    for address in recipients {
        report.lines.push(format!("  - {address}"));
        if dry_run {
            report
                .lines
                .push(format!("    [DRY RUN] Would process {expected} for {address}"));
            continue;
        }
        apply_to_logs(db, expected, notification, message_id, &address, &mut report).await?;
        apply_to_preferences(db, expected, notification, &address, &mut report).await?;
    }
    Ok(report)
}

async fn apply_to_logs(
    db: &DbPool,
    kind: NotificationKind,
    notification: &SesNotification,
    message_id: &str,
    address: &str,
    report: &mut NotificationReport,
) -> Result<(), AppError> {
    let logs = EmailLog::find_by_message(db, message_id, address).await?;
    if logs.is_empty() {
        let (status, subject) = match kind {
            NotificationKind::Bounce => (EmailStatus::Bounced, "Bounce notification"),
            NotificationKind::Complaint => (EmailStatus::Complained, "Complaint notification"),
            NotificationKind::Delivery => (EmailStatus::Delivered, "Delivery notification"),
        };
        let mut log = EmailLog::create(
            db,
            NewEmailLog {
                email_type: EmailType::Unknown,
                recipient_email: address,
                recipient_user_id: None,
                subject,
                status,
                ses_message_id: Some(message_id),
            },
        )
        .await?;
        let now = Utc::now();
        match kind {
            NotificationKind::Bounce => {
                if let Some(bounce) = &notification.bounce {
                    log.bounce_type = Some(bounce.bounce_type.clone());
                    log.bounce_subtype = Some(bounce.bounce_sub_type.clone());
                }
                log.bounced_at = Some(now);
            }
            NotificationKind::Complaint => {
                log.complaint_feedback_type = notification
                    .complaint
                    .as_ref()
                    .and_then(|c| c.complaint_feedback_type.clone());
                log.complained_at = Some(now);
            }
            NotificationKind::Delivery => log.delivered_at = Some(now),
        }
        log.save(db).await?;
        info!(%address, %kind, log_id = log.id, "created log entry for unmatched notification");
        report.logs_created += 1;
        return Ok(());
    }

    for mut log in logs {
        let applied = match kind {
            NotificationKind::Bounce => {
                let (bounce_type, subtype) = notification
                    .bounce
                    .as_ref()
                    .map(|b| (b.bounce_type.as_str(), b.bounce_sub_type.as_str()))
                    .unwrap_or(("Undetermined", ""));
                log.apply_bounced(bounce_type, subtype)
            }
            NotificationKind::Complaint => log.apply_complained(
                notification
                    .complaint
                    .as_ref()
                    .and_then(|c| c.complaint_feedback_type.as_deref())
                    .unwrap_or("unknown"),
            ),
            NotificationKind::Delivery => log.apply_delivered(),
        };
        match applied {
            Ok(()) => {
                log.save(db).await?;
                report.logs_updated += 1;
                info!(log_id = log.id, %kind, "updated email log");
            }
            Err(AppError::InvalidTransition { from, to }) => {
                warn!(log_id = log.id, %from, %to, "ignoring notification for log in final state");
                report
                    .lines
                    .push(format!("    Log {} is already {from}, not moving to {to}", log.id));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

async fn apply_to_preferences(
    db: &DbPool,
    kind: NotificationKind,
    notification: &SesNotification,
    address: &str,
    report: &mut NotificationReport,
) -> Result<(), AppError> {
    if kind == NotificationKind::Delivery {
        return Ok(());
    }
    let Some(user) = User::find_by_email(db, address).await? else {
        warn!(%address, %kind, "no user found for feedback address");
        report.lines.push(format!("    No user found for email: {address}"));
        return Ok(());
    };
    let mut prefs = EmailPreference::get_or_create(db, user.id).await?;
    let now = Utc::now();
    match kind {
        NotificationKind::Bounce => {
            let hard = notification.bounce.as_ref().map_or(false, Bounce::is_hard);
            prefs.record_bounce(hard, now);
        }
        NotificationKind::Complaint => prefs.record_complaint(now),
        NotificationKind::Delivery => {}
    }
    prefs.save(db).await?;
    report.preferences_updated += 1;
    report
        .lines
        .push(format!("    Updated preferences for user: {}", user.username));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNCE: &str = r#"{
        "notificationType": "Bounce",
        "mail": {"messageId": "ses-message-id-123"},
        "bounce": {
            "bounceType": "Permanent",
            "bounceSubType": "General",
            "bouncedRecipients": [{"emailAddress": "test@example.com"}]
        }
    }"#;

    #[test]
    fn parses_raw_notification() {
        let notification = parse_notification(BOUNCE).unwrap();
        assert_eq!(notification.notification_type, "Bounce");
        assert_eq!(notification.message_id(), "ses-message-id-123");
        assert_eq!(notification.recipients(), vec!["test@example.com"]);
        assert!(notification.bounce.unwrap().is_hard());
    }

    #[test]
    fn parses_sns_envelope() {
        let envelope = serde_json::json!({
            "Type": "Notification",
            "Message": r#"{"notificationType":"Complaint","mail":{"messageId":"m-1"},"complaint":{"complainedRecipients":[{"emailAddress":"a@example.com"}],"complaintFeedbackType":"abuse"}}"#
        });
        let notification = parse_notification(&envelope.to_string()).unwrap();
        assert_eq!(notification.notification_type, "Complaint");
        let complaint = notification.complaint.clone().unwrap();
        assert_eq!(complaint.complaint_feedback_type.as_deref(), Some("abuse"));
        assert_eq!(notification.recipients(), vec!["a@example.com"]);
    }

    #[test]
    fn delivery_lists_plain_addresses() {
        let body = r#"{"notificationType":"Delivery","mail":{"messageId":"m-2"},"delivery":{"recipients":["b@example.com"]}}"#;
        let notification = parse_notification(body).unwrap();
        assert_eq!(notification.recipients(), vec!["b@example.com"]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_notification("not json").is_err());
        assert!(parse_notification(r#"{"Message": "{broken"}"#).is_err());
    }
}
