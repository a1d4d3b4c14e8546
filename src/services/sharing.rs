use tracing::info;

use crate::{
    auth::{self, AuthenticatedUser},
    error::AppError,
    models::{
        email::{EmailPreference, EmailType},
        trip::Trip,
        user::User,
    },
    services::email::{self, Recipient, SendReport},
    state::AppState,
};

/// What happened to each address of a share request.
#[derive(Debug, Default)]
pub struct ShareSummary {
    pub added: Vec<String>,
    pub created: Vec<String>,
    pub already_shared: Vec<String>,
    pub reports: Vec<SendReport>,
}

impl ShareSummary {
    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("Shared with {}.", self.added.join(", ")));
        }
        if !self.created.is_empty() {
            parts.push(format!(
                "Created accounts and sent invitations to {}.",
                self.created.join(", ")
            ));
        }
        if !self.already_shared.is_empty() {
            parts.push(format!(
                "Already had access: {}.",
                self.already_shared.join(", ")
            ));
        }
        parts.join(" ")
    }
}

/// Adds every address as a collaborator. Unknown addresses get an account
/// with a temporary password that is mailed along with the invitation.
pub async fn share_trip(
    state: &AppState,
    trip: &Trip,
    inviter: &AuthenticatedUser,
    emails: &[String],
) -> Result<ShareSummary, AppError> {
    let inviter_name = match User::find_by_id(&state.db, inviter.id).await? {
        Some(user) => user.display_name(),
        None => inviter.username.clone(),
    };
    let mut summary = ShareSummary::default();

    for address in emails {
        let (user, temp_password) = match User::find_by_email(&state.db, address).await? {
            Some(user) => (user, None),
            None => {
                let temp_password = auth::generate_temporary_password();
                let username = User::available_username_for(&state.db, address).await?;
                let hash = auth::hash_password(&temp_password)?;
                let user = User::create(&state.db, &username, address, &hash).await?;
                EmailPreference::get_or_create(&state.db, user.id).await?;
                info!(user_id = user.id, trip_id = trip.id, "created account for invitee");
                (user, Some(temp_password))
            }
        };

        if user.id == trip.owner_id || !Trip::add_collaborator(&state.db, trip.id, user.id).await? {
            summary.already_shared.push(user.email.clone());
            continue;
        }
        if temp_password.is_some() {
            summary.created.push(user.email.clone());
        } else {
            summary.added.push(user.email.clone());
        }

        let report = email::send_vacation_invitation(
            state,
            trip,
            &inviter_name,
            &Recipient::user(&user),
            temp_password.as_deref(),
        )
        .await;
        match report {
            Ok(report) => summary.reports.push(report),
            Err(err) => email::settle(Err(err), EmailType::VacationInvitation, &user.email),
        }
    }
    Ok(summary)
}
