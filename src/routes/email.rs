use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Form, Router,
};
use chrono::Utc;
use tracing::info;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{
        email::{EmailPreference, EmailType},
        user::User,
    },
    routes::{account::PreferenceFlags, Nav},
    services::email,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/unsubscribe/:token", get(unsubscribe_page).post(unsubscribe_submit))
}

#[derive(Template)]
#[template(path = "email/unsubscribe.html")]
struct UnsubscribeTemplate {
    nav: Nav,
    token: String,
    user_email: String,
    prefs: EmailPreference,
    message: Option<String>,
}

#[derive(Template)]
#[template(path = "email/unsubscribe_invalid.html")]
struct UnsubscribeInvalidTemplate {
    nav: Nav,
}

async fn load(state: &AppState, token: &str) -> Result<Option<(EmailPreference, User)>, AppError> {
    let Some(prefs) = EmailPreference::find_by_token(&state.db, token).await? else {
        return Ok(None);
    };
    let Some(user) = User::find_by_id(&state.db, prefs.user_id).await? else {
        return Ok(None);
    };
    Ok(Some((prefs, user)))
}

fn invalid_link(current: &CurrentUser) -> Response {
    (
        StatusCode::NOT_FOUND,
        AskamaTemplateResponse::into_response(UnsubscribeInvalidTemplate {
            nav: Nav::from(current),
        }),
    )
        .into_response()
}

async fn unsubscribe_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let Some((prefs, user)) = load(&state, &token).await? else {
        return Ok(invalid_link(&current));
    };
    Ok(AskamaTemplateResponse::into_response(UnsubscribeTemplate {
        nav: Nav::from(&current),
        token,
        user_email: user.email,
        prefs,
        message: None,
    }))
}

async fn unsubscribe_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
    Form(form): Form<PreferenceFlags>,
) -> Result<Response, AppError> {
    let Some((mut prefs, user)) = load(&state, &token).await? else {
        return Ok(invalid_link(&current));
    };
    let message = match form.action.as_str() {
        "unsubscribe_all" => {
            prefs.unsubscribe_all(Utc::now());
            prefs.save(&state.db).await?;
            info!(user_id = user.id, "unsubscribed from all email");
            email::settle(
                email::send_unsubscribe_confirmation(&state, &user, &prefs).await,
                EmailType::UnsubscribeConfirmation,
                &user.email,
            );
            "You have been unsubscribed from all non-essential emails."
        }
        "update_preferences" => {
            form.apply(&mut prefs);
            prefs.save(&state.db).await?;
            "Your email preferences have been updated."
        }
        other => return Err(AppError::BadRequest(format!("unknown action `{other}`"))),
    };
    Ok(AskamaTemplateResponse::into_response(UnsubscribeTemplate {
        nav: Nav::from(&current),
        token,
        user_email: user.email,
        prefs,
        message: Some(message.into()),
    }))
}
