use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::{AuthenticatedUser, CurrentUser},
    error::AppError,
    forms::{parse_email_list, TripForm},
    models::{
        activity::Activity,
        group::Group,
        lodging::Lodging,
        transportation::Transportation,
        trip::{Trip, TripRole},
        user::User,
    },
    routes::{load_trip_for, Nav},
    services::{
        costs::CostSummary,
        itinerary::{build_itinerary, Itinerary},
        sharing::{self, ShareSummary},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vacations", get(trip_list))
        .route("/vacations/new", get(new_trip_form).post(create_trip))
        .route("/vacations/:id", get(trip_detail))
        .route("/vacations/:id/itinerary", get(itinerary_page))
        .route("/vacations/:id/edit", get(edit_trip_form).post(update_trip))
        .route("/vacations/:id/delete", post(delete_trip))
        .route("/vacations/:id/convert", post(convert_trip))
        .route("/vacations/:id/share", get(share_form).post(share_submit))
        .route(
            "/vacations/:id/collaborators/:user_id/remove",
            post(remove_collaborator),
        )
        .route("/vacations/:id/group", post(assign_group))
}

struct TripRow {
    trip: Trip,
    is_owner: bool,
}

#[derive(Template)]
#[template(path = "trips/list.html")]
struct TripListTemplate {
    nav: Nav,
    trips: Vec<TripRow>,
}

async fn trip_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let trips = Trip::list_visible(&state.db, me.id)
        .await?
        .into_iter()
        .map(|trip| TripRow {
            is_owner: trip.owner_id == me.id,
            trip,
        })
        .collect();
    Ok(AskamaTemplateResponse::into_response(TripListTemplate {
        nav: Nav::for_user(me),
        trips,
    }))
}

#[derive(Template)]
#[template(path = "trips/form.html")]
struct TripFormTemplate {
    nav: Nav,
    heading: String,
    action: String,
    form: TripForm,
    errors: Vec<String>,
}

fn render_trip_form(
    me: &AuthenticatedUser,
    heading: String,
    action: String,
    form: TripForm,
    errors: Vec<String>,
) -> Response {
    let status = if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        AskamaTemplateResponse::into_response(TripFormTemplate {
            nav: Nav::for_user(me),
            heading,
            action,
            form,
            errors,
        }),
    )
        .into_response()
}

async fn new_trip_form(current: CurrentUser) -> Result<Response, AppError> {
    let me = current.require_user()?;
    Ok(render_trip_form(
        me,
        "Plan a New Vacation".into(),
        "/vacations/new".into(),
        TripForm::default(),
        Vec::new(),
    ))
}

async fn create_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<TripForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (draft, share_with) = match form.validate() {
        Ok(valid) => valid,
        Err(errors) => {
            return Ok(render_trip_form(
                me,
                "Plan a New Vacation".into(),
                "/vacations/new".into(),
                form,
                errors.messages,
            ))
        }
    };
    let trip = Trip::create(&state.db, me.id, &draft).await?;
    info!(trip_id = trip.id, owner_id = me.id, "vacation created");
    if !share_with.is_empty() {
        let summary = sharing::share_trip(&state, &trip, me, &share_with).await?;
        info!(trip_id = trip.id, "{}", summary.message());
    }
    Ok(Redirect::to(&format!("/vacations/{}", trip.id)).into_response())
}

struct ActivityRow {
    activity: Activity,
    voted: bool,
}

struct GroupOption {
    id: i64,
    name: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "trips/detail.html")]
struct TripDetailTemplate {
    nav: Nav,
    trip: Trip,
    is_owner: bool,
    transportation: Vec<Transportation>,
    lodgings: Vec<Lodging>,
    activities: Vec<ActivityRow>,
    collaborators: Vec<User>,
    groups: Vec<GroupOption>,
    costs: CostSummary,
    itinerary: Itinerary,
}

async fn trip_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let (trip, role) = load_trip_for(&state, id, me, TripRole::Collaborator).await?;
    let transportation = Transportation::list_for_trip(&state.db, trip.id).await?;
    let lodgings = Lodging::list_for_trip(&state.db, trip.id).await?;
    let activities = Activity::list_for_trip(&state.db, trip.id).await?;
    let voted = Activity::voted_ids(&state.db, trip.id, me.id).await?;
    let collaborators = Trip::collaborators(&state.db, trip.id).await?;

    let costs = CostSummary::compute(
        trip.estimated_cost(),
        &transportation,
        &lodgings,
        &activities,
    );
    let itinerary = build_itinerary(
        trip.start_date,
        trip.end_date,
        &transportation,
        &lodgings,
        &activities,
    );
    let is_owner = role == TripRole::Owner;
    let groups = if is_owner {
        Group::list_for_user(&state.db, me.id)
            .await?
            .into_iter()
            .map(|group| GroupOption {
                selected: trip.group_id == Some(group.id),
                id: group.id,
                name: group.name,
            })
            .collect()
    } else {
        Vec::new()
    };
    let activities = activities
        .into_iter()
        .map(|activity| ActivityRow {
            voted: voted.contains(&activity.id),
            activity,
        })
        .collect();

    Ok(AskamaTemplateResponse::into_response(TripDetailTemplate {
        nav: Nav::for_user(me),
        trip,
        is_owner,
        transportation,
        lodgings,
        activities,
        collaborators,
        groups,
        costs,
        itinerary,
    }))
}

#[derive(Template)]
#[template(path = "trips/itinerary.html")]
struct ItineraryTemplate {
    nav: Nav,
    trip: Trip,
    itinerary: Itinerary,
}

async fn itinerary_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Collaborator).await?;
    let transportation = Transportation::list_for_trip(&state.db, trip.id).await?;
    let lodgings = Lodging::list_for_trip(&state.db, trip.id).await?;
    let activities = Activity::list_for_trip(&state.db, trip.id).await?;
    let itinerary = build_itinerary(
        trip.start_date,
        trip.end_date,
        &transportation,
        &lodgings,
        &activities,
    );
    Ok(AskamaTemplateResponse::into_response(ItineraryTemplate {
        nav: Nav::for_user(me),
        trip,
        itinerary,
    }))
}

async fn edit_trip_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    Ok(render_trip_form(
        me,
        format!("Edit {}", trip.destination),
        format!("/vacations/{}/edit", trip.id),
        TripForm::from_trip(&trip),
        Vec::new(),
    ))
}

async fn update_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<TripForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    let (draft, share_with) = match form.validate() {
        Ok(valid) => valid,
        Err(errors) => {
            return Ok(render_trip_form(
                me,
                format!("Edit {}", trip.destination),
                format!("/vacations/{}/edit", trip.id),
                form,
                errors.messages,
            ))
        }
    };
    Trip::update(&state.db, trip.id, &draft).await?;
    let trip = Trip::find(&state.db, trip.id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !share_with.is_empty() {
        sharing::share_trip(&state, &trip, me, &share_with).await?;
    }
    Ok(Redirect::to(&format!("/vacations/{}", trip.id)).into_response())
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    Trip::delete(&state.db, trip.id).await?;
    info!(trip_id = trip.id, "vacation deleted");
    Ok(Redirect::to("/vacations"))
}

async fn convert_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    if Trip::mark_booked(&state.db, trip.id).await? {
        info!(trip_id = trip.id, "vacation converted to booked");
    }
    Ok(Redirect::to(&format!("/vacations/{}", trip.id)))
}

#[derive(Template)]
#[template(path = "trips/share.html")]
struct ShareTemplate {
    nav: Nav,
    trip: Trip,
    collaborators: Vec<User>,
    emails: String,
    error: Option<String>,
    message: Option<String>,
}

async fn render_share(
    state: &AppState,
    me: &AuthenticatedUser,
    trip: Trip,
    emails: String,
    error: Option<String>,
    message: Option<String>,
) -> Result<Response, AppError> {
    let collaborators = Trip::collaborators(&state.db, trip.id).await?;
    let status = if error.is_some() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        AskamaTemplateResponse::into_response(ShareTemplate {
            nav: Nav::for_user(me),
            trip,
            collaborators,
            emails,
            error,
            message,
        }),
    )
        .into_response())
}

async fn share_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    render_share(&state, me, trip, String::new(), None, None).await
}

#[derive(Deserialize)]
struct ShareForm {
    #[serde(default)]
    emails: String,
}

async fn share_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<ShareForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    let emails = match parse_email_list(&form.emails) {
        Ok(emails) if emails.is_empty() => {
            let error = Some("Enter at least one email address.".to_string());
            return render_share(&state, me, trip, form.emails, error, None).await;
        }
        Ok(emails) => emails,
        Err(message) => return render_share(&state, me, trip, form.emails, Some(message), None).await,
    };
    let summary: ShareSummary = sharing::share_trip(&state, &trip, me, &emails).await?;
    info!(trip_id = trip.id, added = summary.added.len(), created = summary.created.len(), "vacation shared");
    render_share(&state, me, trip, String::new(), None, Some(summary.message())).await
}

async fn remove_collaborator(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    if !Trip::remove_collaborator(&state.db, trip.id, user_id).await? {
        return Err(AppError::NotFound);
    }
    info!(trip_id = trip.id, user_id, "collaborator removed");
    Ok(Redirect::to(&format!("/vacations/{}/share", trip.id)))
}

#[derive(Deserialize)]
struct GroupAssignForm {
    #[serde(default)]
    group_id: String,
}

async fn assign_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<GroupAssignForm>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, id, me, TripRole::Owner).await?;
    let group_id = match form.group_id.trim() {
        "" => None,
        raw => {
            let group_id: i64 = raw
                .parse()
                .map_err(|_| AppError::BadRequest("Select a valid group.".into()))?;
            if !Group::is_member(&state.db, group_id, me.id).await? {
                return Err(AppError::BadRequest(
                    "You can only share with groups you belong to.".into(),
                ));
            }
            Some(group_id)
        }
    };
    Trip::set_group(&state.db, trip.id, group_id).await?;
    info!(trip_id = trip.id, ?group_id, "vacation group updated");
    Ok(Redirect::to(&format!("/vacations/{}", trip.id)))
}
