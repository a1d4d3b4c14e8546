//! Transactional mail: preference check, rendering, delivery and logging.
//!
//! Transport failures never propagate. They are recorded as `failed`
//! rows and reported back in the [`SendReport`].

use askama::Template;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::{
    auth::AuthenticatedUser,
    error::AppError,
    models::{
        email::{EmailLog, EmailPreference, EmailStatus, EmailType, NewEmailLog, SendDecision},
        password_reset::RESET_TOKEN_TTL_MINUTES,
        trip::Trip,
        user::User,
    },
    services::mailer::{html_to_text, OutgoingEmail},
    state::AppState,
};

/// Who a message goes to. Addresses without an account carry no user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub user_id: Option<i64>,
}

impl Recipient {
    pub fn user(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            user_id: Some(user.id),
        }
    }

    pub fn address(email: &str) -> Self {
        Self {
            email: email.to_string(),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Suppressed { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub email_type: EmailType,
    pub recipient: String,
    pub outcome: SendOutcome,
}

impl SendReport {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, SendOutcome::Sent { .. })
    }
}

#[derive(Template)]
#[template(path = "emails/registration_confirmation.html")]
struct RegistrationEmail<'a> {
    username: &'a str,
    user_email: &'a str,
    site_url: String,
    vacations_url: String,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/vacation_invitation.html")]
struct InvitationEmail<'a> {
    destination: &'a str,
    start_date: String,
    end_date: String,
    notes: &'a str,
    inviter_name: &'a str,
    user_email: &'a str,
    temp_password: Option<&'a str>,
    login_url: String,
    vacation_url: String,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/password_reset.html")]
struct PasswordResetEmail<'a> {
    username: &'a str,
    reset_url: String,
    valid_minutes: i64,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/password_change.html")]
struct PasswordChangeEmail<'a> {
    username: &'a str,
    changed_at: String,
    reset_url: String,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/activity_notification.html")]
struct ActivityEmail<'a> {
    username: &'a str,
    suggester: &'a str,
    activity_name: &'a str,
    activity_date: String,
    destination: &'a str,
    vacation_url: String,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/unsubscribe_confirmation.html")]
struct UnsubscribeConfirmationEmail<'a> {
    username: &'a str,
    user_email: &'a str,
    resubscribe_url: String,
    site_url: String,
    unsubscribe_url: Option<String>,
}

#[derive(Template)]
#[template(path = "emails/test_email.html")]
struct TestEmail<'a> {
    sent_at: String,
    backend: &'a str,
    unsubscribe_url: Option<String>,
}

/// Checks preferences and returns the unsubscribe link for the footer.
async fn preflight(
    state: &AppState,
    email_type: EmailType,
    recipient: &Recipient,
) -> Result<Result<Option<String>, String>, AppError> {
    let Some(user_id) = recipient.user_id else {
        return Ok(Ok(None));
    };
    let prefs = EmailPreference::get_or_create(&state.db, user_id).await?;
    match prefs.decide(email_type) {
        SendDecision::Allowed => {
            let footer = (!email_type.is_security()
                && email_type != EmailType::UnsubscribeConfirmation)
                .then(|| {
                    state
                        .config
                        .absolute_url(&format!("/unsubscribe/{}", prefs.unsubscribe_token))
                });
            Ok(Ok(footer))
        }
        SendDecision::Suppressed(reason) => Ok(Err(reason)),
    }
}

/// Renders `build` only when the recipient accepts this type of mail.
async fn send_templated<T, F>(
    state: &AppState,
    email_type: EmailType,
    recipient: &Recipient,
    subject: &str,
    build: F,
) -> Result<SendReport, AppError>
where
    T: Template,
    F: FnOnce(Option<String>) -> T,
{
    let unsubscribe_url = match preflight(state, email_type, recipient).await? {
        Ok(url) => url,
        Err(reason) => {
            info!(
                email_type = %email_type,
                recipient = %recipient.email,
                %reason,
                "email suppressed"
            );
            return Ok(SendReport {
                email_type,
                recipient: recipient.email.clone(),
                outcome: SendOutcome::Suppressed { reason },
            });
        }
    };
    let html = build(unsubscribe_url).render()?;
    dispatch(state, email_type, recipient, subject, html).await
}

async fn dispatch(
    state: &AppState,
    email_type: EmailType,
    recipient: &Recipient,
    subject: &str,
    html: String,
) -> Result<SendReport, AppError> {
    let mut log = EmailLog::create(
        &state.db,
        NewEmailLog {
            email_type,
            recipient_email: &recipient.email,
            recipient_user_id: recipient.user_id,
            subject,
            status: EmailStatus::Pending,
            ses_message_id: None,
        },
    )
    .await?;

    let message = OutgoingEmail {
        from: state.config.email.from_address.clone(),
        to: recipient.email.clone(),
        subject: subject.to_string(),
        text: html_to_text(&html),
        html,
    };

    let outcome = match state.mailer.send(&message).await {
        Ok(message_id) => {
            log.apply_sent(&message_id)?;
            info!(
                email_type = %email_type,
                recipient = %recipient.email,
                %message_id,
                "email sent"
            );
            SendOutcome::Sent { message_id }
        }
        Err(err) => {
            let error = format!("{err:#}");
            log.apply_failed(&error)?;
            warn!(
                email_type = %email_type,
                recipient = %recipient.email,
                %error,
                "email delivery failed"
            );
            SendOutcome::Failed { error }
        }
    };
    log.save(&state.db).await?;

    Ok(SendReport {
        email_type,
        recipient: recipient.email.clone(),
        outcome,
    })
}

/// Logs and discards a pipeline error so the triggering request carries on.
pub fn settle(result: Result<SendReport, AppError>, email_type: EmailType, recipient: &str) {
    if let Err(err) = result {
        warn!(%email_type, %recipient, "email pipeline error: {err}");
    }
}

pub async fn send_registration(state: &AppState, user: &User) -> Result<SendReport, AppError> {
    send_templated(
        state,
        EmailType::Registration,
        &Recipient::user(user),
        "Welcome to Organisize - Registration Successful!",
        |unsubscribe_url| RegistrationEmail {
            username: &user.username,
            user_email: &user.email,
            site_url: state.config.absolute_url("/"),
            vacations_url: state.config.absolute_url("/vacations"),
            unsubscribe_url,
        },
    )
    .await
}

/// Invites `recipient` to `trip`. New accounts get their temporary password.
pub async fn send_vacation_invitation(
    state: &AppState,
    trip: &Trip,
    inviter_name: &str,
    recipient: &Recipient,
    temp_password: Option<&str>,
) -> Result<SendReport, AppError> {
    let subject = format!("You're invited to join a vacation to {}!", trip.destination);
    send_templated(
        state,
        EmailType::VacationInvitation,
        recipient,
        &subject,
        |unsubscribe_url| InvitationEmail {
            destination: &trip.destination,
            start_date: long_date(trip.start_date),
            end_date: long_date(trip.end_date),
            notes: &trip.notes,
            inviter_name,
            user_email: &recipient.email,
            temp_password,
            login_url: state.config.absolute_url("/accounts/login"),
            vacation_url: state.config.absolute_url(&format!("/vacations/{}", trip.id)),
            unsubscribe_url,
        },
    )
    .await
}

pub async fn send_password_reset(
    state: &AppState,
    user: &User,
    raw_token: &str,
) -> Result<SendReport, AppError> {
    send_templated(
        state,
        EmailType::PasswordReset,
        &Recipient::user(user),
        "Organisize - Password Reset Request",
        |unsubscribe_url| PasswordResetEmail {
            username: &user.username,
            reset_url: state
                .config
                .absolute_url(&format!("/accounts/reset/{raw_token}")),
            valid_minutes: RESET_TOKEN_TTL_MINUTES,
            unsubscribe_url,
        },
    )
    .await
}

pub async fn send_password_change(state: &AppState, user: &User) -> Result<SendReport, AppError> {
    send_templated(
        state,
        EmailType::PasswordChange,
        &Recipient::user(user),
        "Organisize - Your Password Was Changed",
        |unsubscribe_url| PasswordChangeEmail {
            username: &user.username,
            changed_at: Utc::now().format("%B %d, %Y at %H:%M UTC").to_string(),
            reset_url: state.config.absolute_url("/accounts/password_reset"),
            unsubscribe_url,
        },
    )
    .await
}

/// Tells every other participant of `trip` about a new suggestion.
///
/// A pipeline error for one participant is logged and skipped; the
/// returned reports cover the participants that were processed.
pub async fn notify_activity_suggested(
    state: &AppState,
    trip: &Trip,
    suggester: &AuthenticatedUser,
    activity_name: &str,
    activity_date: NaiveDate,
) -> Result<Vec<SendReport>, AppError> {
    let subject = format!("New activity suggested for {}", trip.destination);
    let mut reports = Vec::new();
    for participant in trip.participants(&state.db).await? {
        if participant.id == suggester.id {
            continue;
        }
        let result = send_templated(
            state,
            EmailType::ActivityNotification,
            &Recipient::user(&participant),
            &subject,
            |unsubscribe_url| ActivityEmail {
                username: &participant.username,
                suggester: &suggester.username,
                activity_name,
                activity_date: long_date(activity_date),
                destination: &trip.destination,
                vacation_url: state.config.absolute_url(&format!("/vacations/{}", trip.id)),
                unsubscribe_url,
            },
        )
        .await;
        match result {
            Ok(report) => reports.push(report),
            Err(err) => settle(Err(err), EmailType::ActivityNotification, &participant.email),
        }
    }
    Ok(reports)
}

pub async fn send_unsubscribe_confirmation(
    state: &AppState,
    user: &User,
    prefs: &EmailPreference,
) -> Result<SendReport, AppError> {
    send_templated(
        state,
        EmailType::UnsubscribeConfirmation,
        &Recipient::user(user),
        "Organisize - Unsubscribe Confirmation",
        |unsubscribe_url| UnsubscribeConfirmationEmail {
            username: &user.username,
            user_email: &user.email,
            resubscribe_url: state
                .config
                .absolute_url(&format!("/unsubscribe/{}", prefs.unsubscribe_token)),
            site_url: state.config.absolute_url("/"),
            unsubscribe_url,
        },
    )
    .await
}

/// Operator smoke test of the configured transport.
pub async fn send_test(state: &AppState, address: &str) -> Result<SendReport, AppError> {
    let backend = format!("{:?}", state.config.email.backend);
    send_templated(
        state,
        EmailType::Test,
        &Recipient::address(address),
        "Organisize - Test Email",
        |unsubscribe_url| TestEmail {
            sent_at: Utc::now().to_rfc3339(),
            backend: &backend,
            unsubscribe_url,
        },
    )
    .await
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}
