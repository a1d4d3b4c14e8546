//! Transportation, lodging and activity records attached to a trip.
//!
//! Collaborators may add and edit records; only the owner deletes them.

use std::collections::HashMap;

use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use tracing::{info, warn};

use crate::{
    auth::{AuthenticatedUser, CurrentUser},
    error::AppError,
    forms::{ActivityForm, LodgingForm, TransportationForm},
    models::{
        activity::Activity,
        lodging::{Lodging, LodgingType},
        transportation::{Transportation, TransportationType},
        trip::{Trip, TripRole},
    },
    routes::{load_trip_for, Nav},
    services::email,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/vacations/:id/transportation/new",
            get(new_transportation_form).post(create_transportation),
        )
        .route(
            "/transportation/:id/edit",
            get(edit_transportation_form).post(update_transportation),
        )
        .route("/transportation/:id/delete", post(delete_transportation))
        .route(
            "/vacations/:id/lodging/new",
            get(new_lodging_form).post(create_lodging),
        )
        .route(
            "/lodging/:id/edit",
            get(edit_lodging_form).post(update_lodging),
        )
        .route("/lodging/:id/delete", post(delete_lodging))
        .route(
            "/vacations/:id/activities/new",
            get(new_activity_form).post(create_activity),
        )
        .route("/activities", get(activity_list))
        .route(
            "/activities/:id/edit",
            get(edit_activity_form).post(update_activity),
        )
        .route("/activities/:id/delete", post(delete_activity))
        .route("/activities/:id/vote", post(vote_activity))
}

struct KindOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

fn status_for(errors: &[String]) -> StatusCode {
    if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn back_to(trip_id: i64) -> Redirect {
    Redirect::to(&format!("/vacations/{trip_id}"))
}

// Transportation

#[derive(Template)]
#[template(path = "bookings/transportation_form.html")]
struct TransportationTemplate {
    nav: Nav,
    trip: Trip,
    heading: &'static str,
    action: String,
    form: TransportationForm,
    kinds: Vec<KindOption>,
    errors: Vec<String>,
}

fn render_transportation(
    me: &AuthenticatedUser,
    trip: Trip,
    action: String,
    form: TransportationForm,
    errors: Vec<String>,
) -> Response {
    let heading = if action.ends_with("/new") {
        "Add Transportation"
    } else {
        "Edit Transportation"
    };
    let kinds = TransportationType::ALL
        .into_iter()
        .map(|kind| KindOption {
            value: kind.as_str(),
            label: kind.label(),
            selected: form.transportation_type == kind.as_str(),
        })
        .collect();
    (
        status_for(&errors),
        AskamaTemplateResponse::into_response(TransportationTemplate {
            nav: Nav::for_user(me),
            trip,
            heading,
            action,
            form,
            kinds,
            errors,
        }),
    )
        .into_response()
}

async fn new_transportation_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    let action = format!("/vacations/{}/transportation/new", trip.id);
    Ok(render_transportation(me, trip, action, TransportationForm::default(), Vec::new()))
}

async fn create_transportation(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<TransportationForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    match form.validate() {
        Ok(draft) => {
            let id = Transportation::create(&state.db, trip.id, &draft).await?;
            info!(trip_id = trip.id, transportation_id = id, "transportation added");
            Ok(back_to(trip.id).into_response())
        }
        Err(errors) => {
            let action = format!("/vacations/{}/transportation/new", trip.id);
            Ok(render_transportation(me, trip, action, form, errors.messages))
        }
    }
}

async fn load_transportation(
    state: &AppState,
    id: i64,
    me: &AuthenticatedUser,
    required: TripRole,
) -> Result<(Transportation, Trip), AppError> {
    let record = Transportation::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let (trip, _) = load_trip_for(state, record.trip_id, me, required).await?;
    Ok((record, trip))
}

async fn edit_transportation_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_transportation(&state, id, me, TripRole::Collaborator).await?;
    let form = TransportationForm::from_record(&record);
    Ok(render_transportation(me, trip, format!("/transportation/{id}/edit"), form, Vec::new()))
}

async fn update_transportation(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<TransportationForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_transportation(&state, id, me, TripRole::Collaborator).await?;
    match form.validate() {
        Ok(draft) => {
            Transportation::update(&state.db, record.id, &draft).await?;
            Ok(back_to(trip.id).into_response())
        }
        Err(errors) => Ok(render_transportation(
            me,
            trip,
            format!("/transportation/{id}/edit"),
            form,
            errors.messages,
        )),
    }
}

async fn delete_transportation(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_transportation(&state, id, me, TripRole::Owner).await?;
    Transportation::delete(&state.db, record.id).await?;
    Ok(back_to(trip.id))
}

// Lodging

#[derive(Template)]
#[template(path = "bookings/lodging_form.html")]
struct LodgingTemplate {
    nav: Nav,
    trip: Trip,
    heading: &'static str,
    action: String,
    form: LodgingForm,
    kinds: Vec<KindOption>,
    errors: Vec<String>,
}

fn render_lodging(
    me: &AuthenticatedUser,
    trip: Trip,
    action: String,
    form: LodgingForm,
    errors: Vec<String>,
) -> Response {
    let heading = if action.ends_with("/new") {
        "Add Lodging"
    } else {
        "Edit Lodging"
    };
    let kinds = LodgingType::ALL
        .into_iter()
        .map(|kind| KindOption {
            value: kind.as_str(),
            label: kind.label(),
            selected: form.lodging_type == kind.as_str(),
        })
        .collect();
    (
        status_for(&errors),
        AskamaTemplateResponse::into_response(LodgingTemplate {
            nav: Nav::for_user(me),
            trip,
            heading,
            action,
            form,
            kinds,
            errors,
        }),
    )
        .into_response()
}

async fn new_lodging_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    let action = format!("/vacations/{}/lodging/new", trip.id);
    Ok(render_lodging(me, trip, action, LodgingForm::default(), Vec::new()))
}

async fn create_lodging(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<LodgingForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    match form.validate() {
        Ok(draft) => {
            let id = Lodging::create(&state.db, trip.id, &draft).await?;
            info!(trip_id = trip.id, lodging_id = id, "lodging added");
            Ok(back_to(trip.id).into_response())
        }
        Err(errors) => {
            let action = format!("/vacations/{}/lodging/new", trip.id);
            Ok(render_lodging(me, trip, action, form, errors.messages))
        }
    }
}

async fn load_lodging(
    state: &AppState,
    id: i64,
    me: &AuthenticatedUser,
    required: TripRole,
) -> Result<(Lodging, Trip), AppError> {
    let record = Lodging::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let (trip, _) = load_trip_for(state, record.trip_id, me, required).await?;
    Ok((record, trip))
}

async fn edit_lodging_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_lodging(&state, id, me, TripRole::Collaborator).await?;
    let form = LodgingForm::from_record(&record);
    Ok(render_lodging(me, trip, format!("/lodging/{id}/edit"), form, Vec::new()))
}

async fn update_lodging(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<LodgingForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_lodging(&state, id, me, TripRole::Collaborator).await?;
    match form.validate() {
        Ok(draft) => {
            Lodging::update(&state.db, record.id, &draft).await?;
            Ok(back_to(trip.id).into_response())
        }
        Err(errors) => Ok(render_lodging(
            me,
            trip,
            format!("/lodging/{id}/edit"),
            form,
            errors.messages,
        )),
    }
}

async fn delete_lodging(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_lodging(&state, id, me, TripRole::Owner).await?;
    Lodging::delete(&state.db, record.id).await?;
    Ok(back_to(trip.id))
}

// Activities

#[derive(Template)]
#[template(path = "bookings/activity_form.html")]
struct ActivityTemplate {
    nav: Nav,
    trip: Trip,
    heading: &'static str,
    action: String,
    form: ActivityForm,
    errors: Vec<String>,
}

fn render_activity(
    me: &AuthenticatedUser,
    trip: Trip,
    action: String,
    form: ActivityForm,
    errors: Vec<String>,
) -> Response {
    let heading = if action.ends_with("/new") {
        "Suggest an Activity"
    } else {
        "Edit Activity"
    };
    (
        status_for(&errors),
        AskamaTemplateResponse::into_response(ActivityTemplate {
            nav: Nav::for_user(me),
            trip,
            heading,
            action,
            form,
            errors,
        }),
    )
        .into_response()
}

async fn new_activity_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    let action = format!("/vacations/{}/activities/new", trip.id);
    Ok(render_activity(me, trip, action, ActivityForm::default(), Vec::new()))
}

async fn create_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<ActivityForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (trip, _) = load_trip_for(&state, trip_id, me, TripRole::Collaborator).await?;
    let draft = match form.validate() {
        Ok(draft) => draft,
        Err(errors) => {
            let action = format!("/vacations/{}/activities/new", trip.id);
            return Ok(render_activity(me, trip, action, form, errors.messages));
        }
    };
    let id = Activity::create(&state.db, trip.id, me.id, &draft).await?;
    info!(trip_id = trip.id, activity_id = id, "activity suggested");
    match email::notify_activity_suggested(&state, &trip, me, &draft.name, draft.date).await {
        Ok(reports) => {
            let sent = reports.iter().filter(|report| report.is_sent()).count();
            info!(activity_id = id, sent, "activity notifications processed");
        }
        Err(err) => warn!(activity_id = id, "activity notifications failed: {err}"),
    }
    Ok(back_to(trip.id).into_response())
}

async fn load_activity(
    state: &AppState,
    id: i64,
    me: &AuthenticatedUser,
    required: TripRole,
) -> Result<(Activity, Trip), AppError> {
    let record = Activity::find(&state.db, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let (trip, _) = load_trip_for(state, record.trip_id, me, required).await?;
    Ok((record, trip))
}

async fn edit_activity_form(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_activity(&state, id, me, TripRole::Collaborator).await?;
    let form = ActivityForm::from_record(&record);
    Ok(render_activity(me, trip, format!("/activities/{id}/edit"), form, Vec::new()))
}

async fn update_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<ActivityForm>,
) -> Result<Response, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_activity(&state, id, me, TripRole::Collaborator).await?;
    match form.validate() {
        Ok(draft) => {
            Activity::update(&state.db, record.id, &draft).await?;
            Ok(back_to(trip.id).into_response())
        }
        Err(errors) => Ok(render_activity(
            me,
            trip,
            format!("/activities/{id}/edit"),
            form,
            errors.messages,
        )),
    }
}

async fn delete_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_activity(&state, id, me, TripRole::Owner).await?;
    Activity::delete(&state.db, record.id).await?;
    Ok(back_to(trip.id))
}

async fn vote_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let me = current.require_user()?;
    let (record, trip) = load_activity(&state, id, me, TripRole::Collaborator).await?;
    if Activity::vote(&state.db, record.id, me.id).await? {
        info!(activity_id = record.id, user_id = me.id, "vote counted");
    }
    Ok(back_to(trip.id))
}

struct ActivityListRow {
    activity: Activity,
    destination: String,
}

#[derive(Template)]
#[template(path = "bookings/activity_list.html")]
struct ActivityListTemplate {
    nav: Nav,
    rows: Vec<ActivityListRow>,
}

async fn activity_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let me = current.require_user()?;
    let destinations: HashMap<i64, String> = Trip::list_visible(&state.db, me.id)
        .await?
        .into_iter()
        .map(|trip| (trip.id, trip.destination))
        .collect();
    let rows = Activity::list_visible(&state.db, me.id)
        .await?
        .into_iter()
        .map(|activity| ActivityListRow {
            destination: destinations
                .get(&activity.trip_id)
                .cloned()
                .unwrap_or_default(),
            activity,
        })
        .collect();
    Ok(AskamaTemplateResponse::into_response(ActivityListTemplate {
        nav: Nav::for_user(me),
        rows,
    }))
}
