use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Form, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{
        email::{EmailLog, EmailPreference},
        trip::Trip,
        user::{User, UserRole},
    },
    routes::Nav,
    services::metrics::{self, EmailMetrics},
    state::AppState,
};

const HEALTH_WINDOW_DAYS: i64 = 7;
const RECENT_LOGS: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/users", get(users_list))
        .route("/users/:id", get(user_detail).post(update_user_role))
        .route("/users/:id/email-status", post(reactivate_email))
}

#[derive(Template)]
#[template(path = "admin/dashboard.html")]
struct AdminDashboardTemplate {
    nav: Nav,
    user_count: i64,
    trip_count: i64,
    group_count: i64,
    metrics: EmailMetrics,
}

async fn dashboard(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let admin = current.require_admin()?;
    let user_count = User::count(&state.db).await?;
    let trip_count = Trip::count(&state.db).await?;
    let group_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM travel_groups")
        .fetch_one(&state.db)
        .await?;
    let metrics = metrics::collect(&state.db, HEALTH_WINDOW_DAYS, false).await?;
    Ok(AskamaTemplateResponse::into_response(
        AdminDashboardTemplate {
            nav: Nav::for_user(admin),
            user_count,
            trip_count,
            group_count,
            metrics,
        },
    ))
}

struct AdminUserRow {
    id: i64,
    username: String,
    email: String,
    role: String,
    created_at: String,
    last_login_at: String,
    email_status: &'static str,
}

fn email_status(prefs: Option<&EmailPreference>) -> &'static str {
    match prefs {
        None => "No preferences",
        Some(prefs) if prefs.complaint_received => "Complained",
        Some(prefs) if !prefs.is_email_valid => "Invalid",
        Some(prefs) if prefs.is_unsubscribed() => "Unsubscribed",
        Some(_) => "Active",
    }
}

fn admin_row(user: User, prefs: Option<&EmailPreference>) -> AdminUserRow {
    AdminUserRow {
        id: user.id,
        created_at: format_timestamp(user.created_at),
        last_login_at: user
            .last_login_at
            .map(format_timestamp)
            .unwrap_or_else(|| "never".into()),
        email_status: email_status(prefs),
        username: user.username,
        email: user.email,
        role: user.role,
    }
}

#[derive(Template)]
#[template(path = "admin/users_list.html")]
struct AdminUsersTemplate {
    nav: Nav,
    users: Vec<AdminUserRow>,
}

async fn users_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let admin = current.require_admin()?;
    let mut users = Vec::new();
    for user in User::list_all(&state.db).await? {
        let prefs = EmailPreference::find(&state.db, user.id).await?;
        users.push(admin_row(user, prefs.as_ref()));
    }
    Ok(AskamaTemplateResponse::into_response(AdminUsersTemplate {
        nav: Nav::for_user(admin),
        users,
    }))
}

struct LogRow {
    created_at: String,
    email_type: String,
    subject: String,
    status: String,
}

#[derive(Template)]
#[template(path = "admin/user_detail.html")]
struct AdminUserDetailTemplate {
    nav: Nav,
    user: AdminUserRow,
    is_admin_role: bool,
    trip_count: i64,
    bounce_count: i64,
    suppressed: bool,
    logs: Vec<LogRow>,
}

async fn user_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let admin = current.require_admin()?;
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let prefs = EmailPreference::find(&state.db, user.id).await?;
    let trip_count = Trip::count_owned_by(&state.db, user.id).await?;
    let logs = EmailLog::list_for_recipient(&state.db, &user.email)
        .await?
        .into_iter()
        .take(RECENT_LOGS)
        .map(|log| LogRow {
            created_at: format_timestamp(log.created_at),
            email_type: log.email_type,
            subject: log.subject,
            status: log.status,
        })
        .collect();
    let bounce_count = prefs.as_ref().map_or(0, |prefs| prefs.bounce_count);
    let suppressed = prefs
        .as_ref()
        .map_or(false, |prefs| !prefs.is_email_valid || prefs.complaint_received);
    let is_admin_role = user.role() == UserRole::Admin;
    Ok(AskamaTemplateResponse::into_response(
        AdminUserDetailTemplate {
            nav: Nav::for_user(admin),
            user: admin_row(user, prefs.as_ref()),
            is_admin_role,
            trip_count,
            bounce_count,
            suppressed,
            logs,
        },
    ))
}

#[derive(Deserialize)]
struct RoleForm {
    role: String,
}

async fn update_user_role(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<i64>,
    Form(form): Form<RoleForm>,
) -> Result<Redirect, AppError> {
    let admin = current.require_admin()?;
    let Some(role) = UserRole::parse(&form.role) else {
        return Err(AppError::BadRequest(format!("unknown role `{}`", form.role)));
    };
    if !User::set_role(&state.db, user_id, &role).await? {
        return Err(AppError::NotFound);
    }
    info!(admin_id = admin.id, user_id, %role, "role changed");
    Ok(Redirect::to(&format!("/admin/users/{user_id}")))
}

/// Clears bounce and complaint suppression after the address was fixed.
async fn reactivate_email(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<i64>,
) -> Result<Redirect, AppError> {
    let admin = current.require_admin()?;
    if User::find_by_id(&state.db, user_id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    let mut prefs = EmailPreference::get_or_create(&state.db, user_id).await?;
    prefs.reactivate(Utc::now());
    prefs.save(&state.db).await?;
    info!(admin_id = admin.id, user_id, "email address reactivated");
    Ok(Redirect::to(&format!("/admin/users/{user_id}")))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
