pub mod account;
pub mod admin;
pub mod bookings;
pub mod email;
pub mod groups;
pub mod public;
pub mod trips;

use axum::{middleware, Router};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{
    auth::{self, AuthenticatedUser, CurrentUser},
    error::AppError,
    models::{
        trip::{Trip, TripRole},
        user::UserRole,
    },
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/accounts", account::router())
        .merge(trips::router())
        .merge(bookings::router())
        .nest("/groups", groups::router())
        .merge(email::router())
        .nest("/admin", admin::router())
        .nest_service("/static", ServeDir::new("static"))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Navigation state shared by every page layout.
#[derive(Debug, Clone, Default)]
pub struct Nav {
    pub logged_in: bool,
    pub username: String,
    pub is_admin: bool,
}

impl Nav {
    pub fn for_user(user: &AuthenticatedUser) -> Self {
        Self {
            logged_in: true,
            username: user.username.clone(),
            is_admin: user.role == UserRole::Admin,
        }
    }
}

impl From<&CurrentUser> for Nav {
    fn from(current: &CurrentUser) -> Self {
        current.0.as_ref().map(Nav::for_user).unwrap_or_default()
    }
}

/// Loads a trip the user may access with at least `required` rights.
/// Trips the user cannot see at all are reported as missing.
pub(crate) async fn load_trip_for(
    state: &AppState,
    trip_id: i64,
    user: &AuthenticatedUser,
    required: TripRole,
) -> Result<(Trip, TripRole), AppError> {
    let trip = Trip::find(&state.db, trip_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let role = trip
        .role_for(&state.db, user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !role.allows(required) {
        return Err(AppError::Forbidden);
    }
    Ok((trip, role))
}
