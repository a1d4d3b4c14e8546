use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::{AuthenticatedUser, CurrentUser},
    error::AppError,
    forms::{invite_expiry_at, parse_expiry_hours, FormErrors, GroupForm},
    models::{group::Group, user::User},
    routes::Nav,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(group_list))
        .route("/new", get(new_group_form).post(create_group))
        .route("/join/:token", get(join_page).post(join_submit))
        .route("/:id", get(group_detail))
        .route("/:id/invite", post(regenerate_invite))
        .route("/:id/members/:user_id/remove", post(remove_member))
        .route("/:id/leave", post(leave_group))
}

/// Loads a group the user belongs to. Non-members see a 404.
async fn load_group_for(
    state: &AppState,
    group_id: i64,
    me: &AuthenticatedUser,
) -> Result<Group, AppError> {
    let group = Group::find(&state.db, group_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !Group::is_member(&state.db, group.id, me.id).await? {
        return Err(AppError::NotFound);
    }
    Ok(group)
}

struct GroupRow {
    group: Group,
    is_creator: bool,
}

#[derive(Template)]
#[template(path = "groups/list.html")]
struct GroupListTemplate {
    nav: Nav,
    groups: Vec<GroupRow>,
}

async fn group_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let groups = Group::list_for_user(&state.db, me.id)
        .await?
        .into_iter()
        .map(|group| GroupRow {
            is_creator: group.creator_id == me.id,
            group,
        })
        .collect();
    Ok(AskamaTemplateResponse::into_response(GroupListTemplate {
        nav: Nav::for_user(me),
        groups,
    }))
}

#[derive(Template)]
#[template(path = "groups/form.html")]
struct GroupFormTemplate {
    nav: Nav,
    form: GroupForm,
    errors: Vec<String>,
}

async fn new_group_form(current: CurrentUser) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    Ok(AskamaTemplateResponse::into_response(GroupFormTemplate {
        nav: Nav::for_user(me),
        form: GroupForm::default(),
        errors: Vec::new(),
    }))
}

async fn create_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<GroupForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let validated = form.validate().and_then(|draft| {
        invite_expiry_at(draft.invite_expiry_hours, Utc::now())
            .map(|expiry| (draft, expiry))
            .map_err(FormErrors::single)
    });
    let (draft, expiry) = match validated {
        Ok(valid) => valid,
        Err(errors) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                AskamaTemplateResponse::into_response(GroupFormTemplate {
                    nav: Nav::for_user(me),
                    form,
                    errors: errors.messages,
                }),
            )
                .into_response())
        }
    };
    let group = Group::create(&state.db, me.id, &draft.name, &draft.description, expiry).await?;
    info!(group_id = group.id, creator_id = me.id, "group created");
    Ok(Redirect::to(&format!("/groups/{}", group.id)).into_response())
}

#[derive(Template)]
#[template(path = "groups/detail.html")]
struct GroupDetailTemplate {
    nav: Nav,
    group: Group,
    members: Vec<User>,
    is_creator: bool,
    invite_url: String,
    invite_active: bool,
    error: Option<String>,
}

async fn render_detail(
    state: &AppState,
    me: &AuthenticatedUser,
    group: Group,
    error: Option<String>,
) -> Result<Response, AppError> {
    let members = Group::members(&state.db, group.id).await?;
    let status = if error.is_some() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        AskamaTemplateResponse::into_response(GroupDetailTemplate {
            nav: Nav::for_user(me),
            is_creator: group.creator_id == me.id,
            invite_url: state
                .config
                .absolute_url(&format!("/groups/join/{}", group.invite_token)),
            invite_active: group.is_invite_active(Utc::now()),
            group,
            members,
            error,
        }),
    )
        .into_response())
}

async fn group_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let group = load_group_for(&state, id, me).await?;
    render_detail(&state, me, group, None).await
}

#[derive(Deserialize)]
struct InviteForm {
    #[serde(default)]
    invite_expiry_hours: String,
}

async fn regenerate_invite(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<InviteForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let group = load_group_for(&state, id, me).await?;
    if group.creator_id != me.id {
        return Err(AppError::Forbidden);
    }
    let expiry = parse_expiry_hours(&form.invite_expiry_hours)
        .and_then(|hours| invite_expiry_at(hours, Utc::now()));
    let expiry = match expiry {
        Ok(expiry) => expiry,
        Err(message) => return render_detail(&state, me, group, Some(message)).await,
    };
    Group::regenerate_invite(&state.db, group.id, expiry).await?;
    info!(group_id = group.id, ?expiry, "invite link regenerated");
    Ok(Redirect::to(&format!("/groups/{}", group.id)).into_response())
}

async fn remove_member(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let group = load_group_for(&state, id, me).await?;
    if group.creator_id != me.id {
        return Err(AppError::Forbidden);
    }
    if user_id == group.creator_id {
        let error = Some("The group creator cannot be removed.".to_string());
        return render_detail(&state, me, group, error).await;
    }
    if !Group::remove_member(&state.db, group.id, user_id).await? {
        return Err(AppError::NotFound);
    }
    info!(group_id = group.id, user_id, "group member removed");
    Ok(Redirect::to(&format!("/groups/{}", group.id)).into_response())
}

async fn leave_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let group = load_group_for(&state, id, me).await?;
    if group.creator_id == me.id {
        let error = Some("The group creator cannot leave the group.".to_string());
        return render_detail(&state, me, group, error).await;
    }
    Group::remove_member(&state.db, group.id, me.id).await?;
    info!(group_id = group.id, user_id = me.id, "left group");
    Ok(Redirect::to("/groups").into_response())
}

#[derive(Template)]
#[template(path = "groups/join.html")]
struct JoinTemplate {
    nav: Nav,
    group: Group,
    token: String,
    active: bool,
    already_member: bool,
}

async fn join_context(
    state: &AppState,
    me: &AuthenticatedUser,
    token: &str,
) -> Result<(Group, bool, bool), AppError> {
    let group = Group::find_by_token(&state.db, token)
        .await?
        .ok_or(AppError::NotFound)?;
    let active = group.is_invite_active(Utc::now());
    let already_member = Group::is_member(&state.db, group.id, me.id).await?;
    Ok((group, active, already_member))
}

fn render_join(
    me: &AuthenticatedUser,
    group: Group,
    token: String,
    active: bool,
    already_member: bool,
) -> Response {
    let status = if active {
        StatusCode::OK
    } else {
        StatusCode::GONE
    };
    (
        status,
        AskamaTemplateResponse::into_response(JoinTemplate {
            nav: Nav::for_user(me),
            group,
            token,
            active,
            already_member,
        }),
    )
        .into_response()
}

async fn join_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (group, active, already_member) = join_context(&state, me, &token).await?;
    Ok(render_join(me, group, token, active, already_member))
}

async fn join_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (group, active, already_member) = join_context(&state, me, &token).await?;
    if !active {
        return Ok(render_join(me, group, token, active, already_member));
    }
    if Group::add_member(&state.db, group.id, me.id).await? {
        info!(group_id = group.id, user_id = me.id, "joined group");
    }
    Ok(Redirect::to(&format!("/groups/{}", group.id)).into_response())
}
