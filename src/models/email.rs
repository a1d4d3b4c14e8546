//! Email preferences and the per-send delivery log.
//!
//! A log row walks `pending -> sent | failed`, then `sent -> delivered |
//! bounced | complained`. Feedback (bounce or complaint) is also accepted on a
//! delivered row because SES reports complaints after delivery. Everything
//! else is rejected and leaves the row untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{db::DbPool, error::AppError};

/// Soft bounces tolerated before an address is treated as undeliverable.
pub const SOFT_BOUNCE_LIMIT: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Registration,
    VacationInvitation,
    ActivityNotification,
    AccountNotification,
    PasswordReset,
    PasswordChange,
    Marketing,
    UnsubscribeConfirmation,
    Test,
    Unknown,
}

impl EmailType {
    pub const ALL: [EmailType; 10] = [
        EmailType::Registration,
        EmailType::VacationInvitation,
        EmailType::ActivityNotification,
        EmailType::AccountNotification,
        EmailType::PasswordReset,
        EmailType::PasswordChange,
        EmailType::Marketing,
        EmailType::UnsubscribeConfirmation,
        EmailType::Test,
        EmailType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmailType::Registration => "registration",
            EmailType::VacationInvitation => "vacation_invitation",
            EmailType::ActivityNotification => "activity_notification",
            EmailType::AccountNotification => "account_notification",
            EmailType::PasswordReset => "password_reset",
            EmailType::PasswordChange => "password_change",
            EmailType::Marketing => "marketing",
            EmailType::UnsubscribeConfirmation => "unsubscribe_confirmation",
            EmailType::Test => "test",
            EmailType::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> EmailType {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .unwrap_or(EmailType::Unknown)
    }

    /// Security mail must reach the user even after they opt out.
    pub fn is_security(self) -> bool {
        matches!(self, EmailType::PasswordReset | EmailType::PasswordChange)
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Delivered,
    Bounced,
    Complained,
    Failed,
}

impl EmailStatus {
    pub const ALL: [EmailStatus; 6] = [
        EmailStatus::Pending,
        EmailStatus::Sent,
        EmailStatus::Delivered,
        EmailStatus::Bounced,
        EmailStatus::Complained,
        EmailStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Delivered => "delivered",
            EmailStatus::Bounced => "bounced",
            EmailStatus::Complained => "complained",
            EmailStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<EmailStatus> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }

    pub fn can_transition_to(self, next: EmailStatus) -> bool {
        use EmailStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Delivered)
                | (Sent, Bounced)
                | (Sent, Complained)
                | (Delivered, Bounced)
                | (Delivered, Complained)
        )
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of asking whether a message may go to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDecision {
    Allowed,
    Suppressed(String),
}

impl SendDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SendDecision::Allowed)
    }

    pub fn reason(&self) -> &str {
        match self {
            SendDecision::Allowed => "OK",
            SendDecision::Suppressed(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailPreference {
    pub user_id: i64,
    pub receive_vacation_invitations: bool,
    pub receive_activity_notifications: bool,
    pub receive_password_reset_emails: bool,
    pub receive_account_notifications: bool,
    pub receive_marketing_emails: bool,
    pub unsubscribe_token: String,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub is_email_valid: bool,
    pub bounce_count: i64,
    pub complaint_received: bool,
    pub last_bounce_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PREFERENCE_COLUMNS: &str = "user_id, receive_vacation_invitations, receive_activity_notifications, receive_password_reset_emails, receive_account_notifications, receive_marketing_emails, unsubscribe_token, unsubscribed_at, is_email_valid, bounce_count, complaint_received, last_bounce_at, created_at, updated_at";

impl EmailPreference {
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            receive_vacation_invitations: true,
            receive_activity_notifications: true,
            receive_password_reset_emails: true,
            receive_account_notifications: true,
            receive_marketing_emails: false,
            unsubscribe_token: Uuid::new_v4().to_string(),
            unsubscribed_at: None,
            is_email_valid: true,
            bounce_count: 0,
            complaint_received: false,
            last_bounce_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed_at.is_some()
    }

    pub fn can_receive_emails(&self) -> bool {
        !self.is_unsubscribed() && self.is_email_valid && !self.complaint_received
    }

    /// Turns off every category except security mail.
    pub fn unsubscribe_all(&mut self, now: DateTime<Utc>) {
        self.unsubscribed_at = Some(now);
        self.receive_vacation_invitations = false;
        self.receive_activity_notifications = false;
        self.receive_account_notifications = false;
        self.receive_marketing_emails = false;
        self.updated_at = now;
    }

    pub fn resubscribe(&mut self, now: DateTime<Utc>) {
        self.unsubscribed_at = None;
        self.updated_at = now;
    }

    pub fn record_bounce(&mut self, hard: bool, now: DateTime<Utc>) {
        self.bounce_count += 1;
        self.last_bounce_at = Some(now);
        if hard || self.bounce_count >= SOFT_BOUNCE_LIMIT {
            self.is_email_valid = false;
        }
        self.updated_at = now;
    }

    pub fn record_complaint(&mut self, now: DateTime<Utc>) {
        self.complaint_received = true;
        self.is_email_valid = false;
        self.updated_at = now;
    }

    /// Clears durable suppression after an operator verified the address.
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_email_valid = true;
        self.bounce_count = 0;
        self.complaint_received = false;
        self.last_bounce_at = None;
        self.updated_at = now;
    }

    pub fn decide(&self, email_type: EmailType) -> SendDecision {
        if email_type == EmailType::UnsubscribeConfirmation {
            return SendDecision::Allowed;
        }
        if email_type.is_security() {
            return if self.receive_password_reset_emails {
                SendDecision::Allowed
            } else {
                SendDecision::Suppressed(format!(
                    "Email type {email_type} is disabled by user preferences"
                ))
            };
        }
        if self.complaint_received {
            return SendDecision::Suppressed("User filed a spam complaint".into());
        }
        if !self.is_email_valid {
            return SendDecision::Suppressed("Email address is invalid after bounces".into());
        }
        if self.is_unsubscribed() {
            return SendDecision::Suppressed("User has unsubscribed from all emails".into());
        }
        let enabled = match email_type {
            EmailType::VacationInvitation => self.receive_vacation_invitations,
            EmailType::ActivityNotification => self.receive_activity_notifications,
            EmailType::Registration | EmailType::AccountNotification => {
                self.receive_account_notifications
            }
            EmailType::Marketing => self.receive_marketing_emails,
            _ => true,
        };
        if enabled {
            SendDecision::Allowed
        } else {
            SendDecision::Suppressed(format!(
                "Email type {email_type} is disabled by user preferences"
            ))
        }
    }

    pub async fn find(db: &DbPool, user_id: i64) -> sqlx::Result<Option<EmailPreference>> {
        sqlx::query_as::<_, EmailPreference>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM email_preferences WHERE user_id = ?1"
        ))
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_token(db: &DbPool, token: &str) -> sqlx::Result<Option<EmailPreference>> {
        sqlx::query_as::<_, EmailPreference>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM email_preferences WHERE unsubscribe_token = ?1"
        ))
        .bind(token)
        .fetch_optional(db)
        .await
    }

    pub async fn get_or_create(db: &DbPool, user_id: i64) -> sqlx::Result<EmailPreference> {
        if let Some(existing) = EmailPreference::find(db, user_id).await? {
            return Ok(existing);
        }
        let fresh = EmailPreference::new(user_id, Utc::now());
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO email_preferences ({PREFERENCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ))
        .bind(fresh.user_id)
        .bind(fresh.receive_vacation_invitations)
        .bind(fresh.receive_activity_notifications)
        .bind(fresh.receive_password_reset_emails)
        .bind(fresh.receive_account_notifications)
        .bind(fresh.receive_marketing_emails)
        .bind(&fresh.unsubscribe_token)
        .bind(fresh.unsubscribed_at)
        .bind(fresh.is_email_valid)
        .bind(fresh.bounce_count)
        .bind(fresh.complaint_received)
        .bind(fresh.last_bounce_at)
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .execute(db)
        .await?;
        EmailPreference::find(db, user_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn save(&self, db: &DbPool) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE email_preferences SET receive_vacation_invitations = ?1, receive_activity_notifications = ?2,
               receive_password_reset_emails = ?3, receive_account_notifications = ?4, receive_marketing_emails = ?5,
               unsubscribed_at = ?6, is_email_valid = ?7, bounce_count = ?8, complaint_received = ?9,
               last_bounce_at = ?10, updated_at = ?11 WHERE user_id = ?12"#,
        )
        .bind(self.receive_vacation_invitations)
        .bind(self.receive_activity_notifications)
        .bind(self.receive_password_reset_emails)
        .bind(self.receive_account_notifications)
        .bind(self.receive_marketing_emails)
        .bind(self.unsubscribed_at)
        .bind(self.is_email_valid)
        .bind(self.bounce_count)
        .bind(self.complaint_received)
        .bind(self.last_bounce_at)
        .bind(self.updated_at)
        .bind(self.user_id)
        .execute(db)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailLog {
    pub id: i64,
    pub email_type: String,
    pub recipient_email: String,
    pub recipient_user_id: Option<i64>,
    pub subject: String,
    pub status: String,
    pub ses_message_id: Option<String>,
    pub error_message: Option<String>,
    pub bounce_type: Option<String>,
    pub bounce_subtype: Option<String>,
    pub complaint_feedback_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub complained_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewEmailLog<'a> {
    pub email_type: EmailType,
    pub recipient_email: &'a str,
    pub recipient_user_id: Option<i64>,
    pub subject: &'a str,
    pub status: EmailStatus,
    pub ses_message_id: Option<&'a str>,
}

const LOG_COLUMNS: &str = "id, email_type, recipient_email, recipient_user_id, subject, status, ses_message_id, error_message, bounce_type, bounce_subtype, complaint_feedback_type, created_at, sent_at, delivered_at, bounced_at, complained_at";

impl EmailLog {
    pub fn status(&self) -> EmailStatus {
        EmailStatus::parse(&self.status).unwrap_or(EmailStatus::Pending)
    }

    pub fn email_type(&self) -> EmailType {
        EmailType::parse(&self.email_type)
    }

    fn advance(&mut self, next: EmailStatus) -> Result<DateTime<Utc>, AppError> {
        let current = self.status();
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.status = next.as_str().to_string();
        Ok(Utc::now())
    }

    pub fn apply_sent(&mut self, message_id: &str) -> Result<(), AppError> {
        let now = self.advance(EmailStatus::Sent)?;
        self.ses_message_id = Some(message_id.to_string());
        self.sent_at = Some(now);
        Ok(())
    }

    pub fn apply_failed(&mut self, error: &str) -> Result<(), AppError> {
        self.advance(EmailStatus::Failed)?;
        self.error_message = Some(error.to_string());
        Ok(())
    }

    pub fn apply_delivered(&mut self) -> Result<(), AppError> {
        let now = self.advance(EmailStatus::Delivered)?;
        self.delivered_at = Some(now);
        Ok(())
    }

    pub fn apply_bounced(&mut self, bounce_type: &str, bounce_subtype: &str) -> Result<(), AppError> {
        let now = self.advance(EmailStatus::Bounced)?;
        self.bounce_type = Some(bounce_type.to_string());
        self.bounce_subtype = Some(bounce_subtype.to_string());
        self.bounced_at = Some(now);
        Ok(())
    }

    pub fn apply_complained(&mut self, feedback_type: &str) -> Result<(), AppError> {
        let now = self.advance(EmailStatus::Complained)?;
        self.complaint_feedback_type = Some(feedback_type.to_string());
        self.complained_at = Some(now);
        Ok(())
    }

    pub async fn create(db: &DbPool, new: NewEmailLog<'_>) -> sqlx::Result<EmailLog> {
        let now = Utc::now();
        let sent_at = (new.status == EmailStatus::Sent).then_some(now);
        let result = sqlx::query(
            r#"INSERT INTO email_logs (email_type, recipient_email, recipient_user_id, subject, status, ses_message_id, created_at, sent_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(new.email_type.as_str())
        .bind(new.recipient_email)
        .bind(new.recipient_user_id)
        .bind(new.subject)
        .bind(new.status.as_str())
        .bind(new.ses_message_id)
        .bind(now)
        .bind(sent_at)
        .execute(db)
        .await?;
        EmailLog::find(db, result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find(db: &DbPool, id: i64) -> sqlx::Result<Option<EmailLog>> {
        sqlx::query_as::<_, EmailLog>(&format!("SELECT {LOG_COLUMNS} FROM email_logs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_message(
        db: &DbPool,
        ses_message_id: &str,
        recipient_email: &str,
    ) -> sqlx::Result<Vec<EmailLog>> {
        sqlx::query_as::<_, EmailLog>(&format!(
            "SELECT {LOG_COLUMNS} FROM email_logs WHERE ses_message_id = ?1 AND recipient_email = ?2"
        ))
        .bind(ses_message_id)
        .bind(recipient_email)
        .fetch_all(db)
        .await
    }

    pub async fn list_for_recipient(db: &DbPool, recipient_email: &str) -> sqlx::Result<Vec<EmailLog>> {
        sqlx::query_as::<_, EmailLog>(&format!(
            "SELECT {LOG_COLUMNS} FROM email_logs WHERE recipient_email = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(recipient_email)
        .fetch_all(db)
        .await
    }

    pub async fn list_since(db: &DbPool, since: DateTime<Utc>) -> sqlx::Result<Vec<EmailLog>> {
        sqlx::query_as::<_, EmailLog>(&format!(
            "SELECT {LOG_COLUMNS} FROM email_logs WHERE created_at >= ?1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(since)
        .fetch_all(db)
        .await
    }

    /// Persists the status columns after an `apply_*` transition.
    pub async fn save(&self, db: &DbPool) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE email_logs SET status = ?1, ses_message_id = ?2, error_message = ?3, bounce_type = ?4,
               bounce_subtype = ?5, complaint_feedback_type = ?6, sent_at = ?7, delivered_at = ?8,
               bounced_at = ?9, complained_at = ?10 WHERE id = ?11"#,
        )
        .bind(&self.status)
        .bind(&self.ses_message_id)
        .bind(&self.error_message)
        .bind(&self.bounce_type)
        .bind(&self.bounce_subtype)
        .bind(&self.complaint_feedback_type)
        .bind(self.sent_at)
        .bind(self.delivered_at)
        .bind(self.bounced_at)
        .bind(self.complained_at)
        .bind(self.id)
        .execute(db)
        .await?;
        Ok(())
    }
}
