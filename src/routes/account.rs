use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::{self, CurrentUser},
    error::AppError,
    models::{
        email::{EmailPreference, EmailType},
        trip::Trip,
        user::User,
    },
    routes::Nav,
    services::email,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route(
            "/email-preferences",
            get(preferences_form).post(preferences_submit),
        )
        .route(
            "/password_change",
            get(password_change_form).post(password_change_submit),
        )
        .route("/password_change/done", get(password_change_done))
        .route(
            "/password_reset",
            get(password_reset_form).post(password_reset_submit),
        )
        .route("/password_reset/done", get(password_reset_done))
        .route("/reset/complete", get(reset_complete))
        .route("/reset/:token", get(reset_form).post(reset_submit))
}

#[derive(Template)]
#[template(path = "account/profile.html")]
struct ProfileTemplate {
    nav: Nav,
    user: User,
    prefs: EmailPreference,
    trip_count: i64,
}

async fn profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let user = User::find_by_id(&state.db, me.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let prefs = EmailPreference::get_or_create(&state.db, me.id).await?;
    let trip_count = Trip::count_owned_by(&state.db, me.id).await?;
    Ok(AskamaTemplateResponse::into_response(ProfileTemplate {
        nav: Nav::for_user(me),
        user,
        prefs,
        trip_count,
    }))
}

#[derive(Template)]
#[template(path = "account/email_preferences.html")]
struct PreferencesTemplate {
    nav: Nav,
    prefs: EmailPreference,
    message: Option<String>,
}

async fn preferences_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let prefs = EmailPreference::get_or_create(&state.db, me.id).await?;
    Ok(AskamaTemplateResponse::into_response(PreferencesTemplate {
        nav: Nav::for_user(me),
        prefs,
        message: None,
    }))
}

/// Checkbox flags as posted by the preference forms. Unchecked boxes are absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreferenceFlags {
    pub action: String,
    pub receive_vacation_invitations: Option<String>,
    pub receive_activity_notifications: Option<String>,
    pub receive_password_reset_emails: Option<String>,
    pub receive_account_notifications: Option<String>,
    pub receive_marketing_emails: Option<String>,
}

impl PreferenceFlags {
    pub fn apply(&self, prefs: &mut EmailPreference) {
        prefs.receive_vacation_invitations = self.receive_vacation_invitations.is_some();
        prefs.receive_activity_notifications = self.receive_activity_notifications.is_some();
        prefs.receive_password_reset_emails = self.receive_password_reset_emails.is_some();
        prefs.receive_account_notifications = self.receive_account_notifications.is_some();
        prefs.receive_marketing_emails = self.receive_marketing_emails.is_some();
        prefs.updated_at = Utc::now();
    }
}

async fn preferences_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<PreferenceFlags>,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let mut prefs = EmailPreference::get_or_create(&state.db, me.id).await?;
    let message = if form.action == "resubscribe" {
        prefs.resubscribe(Utc::now());
        "You have been resubscribed to emails."
    } else {
        form.apply(&mut prefs);
        "Your email preferences have been updated."
    };
    prefs.save(&state.db).await?;
    info!(user_id = me.id, action = %form.action, "email preferences updated");
    Ok(AskamaTemplateResponse::into_response(PreferencesTemplate {
        nav: Nav::for_user(me),
        prefs,
        message: Some(message.into()),
    }))
}

#[derive(Template)]
#[template(path = "account/password_change.html")]
struct PasswordChangeTemplate {
    nav: Nav,
    error: Option<String>,
}

async fn password_change_form(current: CurrentUser) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    Ok(AskamaTemplateResponse::into_response(PasswordChangeTemplate {
        nav: Nav::for_user(me),
        error: None,
    }))
}

#[derive(Deserialize)]
struct PasswordChangeForm {
    #[serde(default)]
    old_password: String,
    #[serde(default)]
    new_password1: String,
    #[serde(default)]
    new_password2: String,
}

async fn password_change_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<PasswordChangeForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let changed = auth::change_password(
        &state,
        me.id,
        &me.session_id,
        &form.old_password,
        &form.new_password1,
        &form.new_password2,
    )
    .await;
    match changed {
        Ok(user) => {
            info!(user_id = user.id, "password changed");
            email::settle(
                email::send_password_change(&state, &user).await,
                EmailType::PasswordChange,
                &user.email,
            );
            Ok(Redirect::to("/accounts/password_change/done").into_response())
        }
        // Form errors on this page answer 200, not 400.
        Err(AppError::BadRequest(msg)) => Ok(AskamaTemplateResponse::into_response(
            PasswordChangeTemplate {
                nav: Nav::for_user(me),
                error: Some(msg),
            },
        )),
        Err(err) => Err(err),
    }
}

#[derive(Template)]
#[template(path = "account/password_change_done.html")]
struct PasswordChangeDoneTemplate {
    nav: Nav,
}

async fn password_change_done(current: CurrentUser) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    Ok(AskamaTemplateResponse::into_response(
        PasswordChangeDoneTemplate {
            nav: Nav::for_user(me),
        },
    ))
}

#[derive(Template)]
#[template(path = "account/password_reset.html")]
struct PasswordResetTemplate {
    nav: Nav,
}

async fn password_reset_form(current: CurrentUser) -> impl IntoResponse {
    AskamaTemplateResponse::into_response(PasswordResetTemplate {
        nav: Nav::from(&current),
    })
}

#[derive(Deserialize)]
struct PasswordResetForm {
    #[serde(default)]
    email: String,
}

/// Lands on the same page whether or not the address has an account.
async fn password_reset_submit(
    State(state): State<AppState>,
    Form(form): Form<PasswordResetForm>,
) -> Result<Redirect, AppError> {
    if let Some(user) = User::find_by_email(&state.db, &form.email).await? {
        let raw = auth::issue_reset_token(&state, user.id).await?;
        email::settle(
            email::send_password_reset(&state, &user, &raw).await,
            EmailType::PasswordReset,
            &user.email,
        );
    }
    Ok(Redirect::to("/accounts/password_reset/done"))
}

#[derive(Template)]
#[template(path = "account/password_reset_done.html")]
struct PasswordResetDoneTemplate {
    nav: Nav,
}

async fn password_reset_done(current: CurrentUser) -> impl IntoResponse {
    AskamaTemplateResponse::into_response(PasswordResetDoneTemplate {
        nav: Nav::from(&current),
    })
}

#[derive(Template)]
#[template(path = "account/password_reset_confirm.html")]
struct ResetConfirmTemplate {
    nav: Nav,
    valid_link: bool,
    token: String,
    error: Option<String>,
}

async fn reset_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let valid_link = auth::reset_token_user(&state, &token).await?.is_some();
    Ok(AskamaTemplateResponse::into_response(ResetConfirmTemplate {
        nav: Nav::from(&current),
        valid_link,
        token,
        error: None,
    }))
}

#[derive(Deserialize)]
struct ResetForm {
    #[serde(default)]
    new_password1: String,
    #[serde(default)]
    new_password2: String,
}

async fn reset_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
    Form(form): Form<ResetForm>,
) -> Result<Response, AppError> {
    let result =
        auth::complete_reset(&state, &token, &form.new_password1, &form.new_password2).await;
    let (status, valid_link, error) = match result {
        Ok(_) => return Ok(Redirect::to("/accounts/reset/complete").into_response()),
        Err(AppError::NotFound) => (StatusCode::OK, false, None),
        Err(AppError::BadRequest(msg)) => (StatusCode::BAD_REQUEST, true, Some(msg)),
        Err(err) => return Err(err),
    };
    Ok((
        status,
        AskamaTemplateResponse::into_response(ResetConfirmTemplate {
            nav: Nav::from(&current),
            valid_link,
            token,
            error,
        }),
    )
        .into_response())
}

#[derive(Template)]
#[template(path = "account/password_reset_complete.html")]
struct ResetCompleteTemplate {
    nav: Nav,
}

async fn reset_complete(current: CurrentUser) -> impl IntoResponse {
    AskamaTemplateResponse::into_response(ResetCompleteTemplate {
        nav: Nav::from(&current),
    })
}
