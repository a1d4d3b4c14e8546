use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::{self, CurrentUser},
    error::AppError,
    models::email::EmailType,
    routes::Nav,
    services::email,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(landing))
        .route("/accounts/login", get(login_form).post(login_submit))
        .route("/accounts/register", get(register_form).post(register_submit))
        .route("/accounts/logout", post(logout))
}

#[derive(Template)]
#[template(path = "landing.html")]
struct LandingTemplate {
    nav: Nav,
}

async fn landing(current: CurrentUser) -> impl IntoResponse {
    AskamaTemplateResponse::into_response(LandingTemplate {
        nav: Nav::from(&current),
    })
}

#[derive(Template)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    nav: Nav,
    error: Option<String>,
    username: String,
}

async fn login_form(current: CurrentUser) -> Response {
    if current.0.is_some() {
        return Redirect::to("/vacations").into_response();
    }
    AskamaTemplateResponse::into_response(LoginTemplate {
        nav: Nav::default(),
        error: None,
        username: String::new(),
    })
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login_submit(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    match auth::authenticate_user(&state, &form.username, &form.password).await {
        Ok(user) => {
            let session_id = auth::create_session(&state, user.id).await?;
            info!(user_id = user.id, "user logged in");
            Ok((
                auth::apply_session_cookie(&state, jar, &session_id),
                Redirect::to("/vacations"),
            )
                .into_response())
        }
        Err(AppError::Unauthorized) => Ok(render_login_error(
            form.username,
            "Please enter a correct username and password. Note that both fields may be case-sensitive.".into(),
        )),
        Err(AppError::BadRequest(msg)) => Ok(render_login_error(form.username, msg)),
        Err(err) => Err(err),
    }
}

fn render_login_error(username: String, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        AskamaTemplateResponse::into_response(LoginTemplate {
            nav: Nav::default(),
            error: Some(message),
            username,
        }),
    )
        .into_response()
}

#[derive(Template)]
#[template(path = "auth/register.html")]
pub struct RegisterTemplate {
    nav: Nav,
    error: Option<String>,
    username: String,
    email: String,
}

async fn register_form() -> impl IntoResponse {
    AskamaTemplateResponse::into_response(RegisterTemplate {
        nav: Nav::default(),
        error: None,
        username: String::new(),
        email: String::new(),
    })
}

#[derive(Deserialize)]
struct RegisterForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password1: String,
    #[serde(default)]
    password2: String,
}

async fn register_submit(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    if form.password1 != form.password2 {
        return Ok(render_register_error(
            form.username,
            form.email,
            "The two password fields didn't match.".into(),
        ));
    }

    match auth::register_user(&state, &form.username, &form.email, &form.password1).await {
        Ok(user) => {
            email::settle(
                email::send_registration(&state, &user).await,
                EmailType::Registration,
                &user.email,
            );
            let session_id = auth::create_session(&state, user.id).await?;
            Ok((
                auth::apply_session_cookie(&state, jar, &session_id),
                Redirect::to("/vacations"),
            )
                .into_response())
        }
        Err(AppError::BadRequest(msg)) => Ok(render_register_error(form.username, form.email, msg)),
        Err(err) => Err(err),
    }
}

fn render_register_error(username: String, email: String, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        AskamaTemplateResponse::into_response(RegisterTemplate {
            nav: Nav::default(),
            error: Some(message),
            username,
            email,
        }),
    )
        .into_response()
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        auth::destroy_session(&state, cookie.value()).await?;
    }
    Ok((auth::clear_session_cookie(jar), Redirect::to("/")))
}
