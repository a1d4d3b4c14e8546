use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::Utc;
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::{
    config::Environment,
    error::AppError,
    models::{
        email::EmailPreference,
        password_reset::PasswordResetToken,
        session::Session,
        user::{normalize_email, User, UserRole},
    },
    state::AppState,
};

pub const SESSION_COOKIE: &str = "planner_session";
const SESSION_TOKEN_LEN: usize = 43;
const TEMP_PASSWORD_LEN: usize = 12;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub session_id: String,
}

impl AuthenticatedUser {
    pub fn new(user: User, session_id: impl Into<String>) -> Self {
        Self {
            id: user.id,
            role: user.role(),
            uuid: user.uuid,
            username: user.username,
            email: user.email,
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Self(Some(user.clone())));
        }

        Ok(Self(None))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }

    pub fn require_admin(&self) -> Result<&AuthenticatedUser, AppError> {
        let user = self.require_user()?;
        if user.role == UserRole::Admin {
            Ok(user)
        } else {
            Err(AppError::Forbidden)
        }
    }
}

/// Resolves the session cookie into an [`AuthenticatedUser`] extension.
/// Requests without a valid session pass through anonymously.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match resolve_session(&state, cookie.value()).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(user);
            }
            Ok(None) => debug!("session cookie did not match a live session"),
            Err(err) => warn!("session lookup failed: {err}"),
        }
    }
    next.run(request).await
}

async fn resolve_session(
    state: &AppState,
    session_id: &str,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let Some(session) = Session::find(&state.db, session_id).await? else {
        return Ok(None);
    };
    if session.is_expired(Utc::now()) {
        Session::delete(&state.db, session_id).await?;
        return Ok(None);
    }
    let Some(user) = User::find_by_id(&state.db, session.user_id).await? else {
        return Ok(None);
    };
    Session::touch(&state.db, session_id).await?;
    Ok(Some(AuthenticatedUser::new(user, session.id)))
}

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AppError::Other(anyhow::anyhow!(e.to_string()))
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!(error = %e, "argon2 parse hash error");
            false
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email.trim())
}

/// Checks a new password against the account it will belong to.
pub fn validate_password(password: &str, username: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err("This password is entirely numeric.".into());
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        return Err("The password is too similar to the username.".into());
    }
    Ok(())
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn generate_temporary_password() -> String {
    random_token(TEMP_PASSWORD_LEN)
}

/// Creates an account, its email preferences and nothing else.
pub async fn register_user(
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let username = username.trim();
    let email = normalize_email(email);
    if username.is_empty() {
        return Err(AppError::BadRequest("Please choose a username.".into()));
    }
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest("Enter a valid email address.".into()));
    }
    if User::username_taken(&state.db, username).await? {
        return Err(AppError::BadRequest(
            "A user with that username already exists.".into(),
        ));
    }
    if User::email_taken(&state.db, &email).await? {
        return Err(AppError::BadRequest(
            "A user with that email already exists.".into(),
        ));
    }
    validate_password(password, username).map_err(AppError::BadRequest)?;

    let hash = hash_password(password)?;
    let user = User::create(&state.db, username, &email, &hash).await?;
    EmailPreference::get_or_create(&state.db, user.id).await?;
    info!(user_id = user.id, "registered user");
    Ok(user)
}

pub async fn authenticate_user(
    state: &AppState,
    identifier: &str,
    password: &str,
) -> Result<User, AppError> {
    if identifier.trim().is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Please enter your username and password.".into(),
        ));
    }
    let Some(user) = User::find_by_login(&state.db, identifier).await? else {
        return Err(AppError::Unauthorized);
    };
    if !verify_password(password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    User::touch_last_login(&state.db, user.id).await?;
    Ok(user)
}

pub async fn create_session(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let session_id = random_token(SESSION_TOKEN_LEN);
    Session::insert(&state.db, &session_id, user_id).await?;
    Ok(session_id)
}

pub async fn destroy_session(state: &AppState, session_id: &str) -> Result<(), AppError> {
    Session::delete(&state.db, session_id).await?;
    Ok(())
}

pub fn apply_session_cookie(
    state: &AppState,
    jar: PrivateCookieJar,
    session_id: &str,
) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.environment == Environment::Prod);
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

pub fn hash_reset_token(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// Issues a single-use reset token and returns the raw value for the link.
pub async fn issue_reset_token(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let raw = random_token(SESSION_TOKEN_LEN);
    PasswordResetToken::insert(&state.db, &hash_reset_token(&raw), user_id).await?;
    Ok(raw)
}

/// The user a reset link belongs to, if the link is still usable.
pub async fn reset_token_user(state: &AppState, raw: &str) -> Result<Option<User>, AppError> {
    let Some(token) = PasswordResetToken::find(&state.db, &hash_reset_token(raw)).await? else {
        return Ok(None);
    };
    if !token.is_usable(Utc::now()) {
        return Ok(None);
    }
    Ok(User::find_by_id(&state.db, token.user_id).await?)
}

/// Sets the new password, burns the token and ends every session.
pub async fn complete_reset(
    state: &AppState,
    raw: &str,
    password: &str,
    confirm: &str,
) -> Result<User, AppError> {
    let Some(user) = reset_token_user(state, raw).await? else {
        return Err(AppError::NotFound);
    };
    if password != confirm {
        return Err(AppError::BadRequest(
            "The two password fields didn't match.".into(),
        ));
    }
    validate_password(password, &user.username).map_err(AppError::BadRequest)?;
    let hash = hash_password(password)?;
    User::update_password(&state.db, user.id, &hash).await?;
    PasswordResetToken::mark_used(&state.db, &hash_reset_token(raw)).await?;
    let ended = Session::delete_for_user(&state.db, user.id).await?;
    info!(user_id = user.id, ended, "password reset completed");
    Ok(user)
}

/// Changes the password of a signed-in user, keeping only `keep_session`.
pub async fn change_password(
    state: &AppState,
    user_id: i64,
    keep_session: &str,
    current: &str,
    new: &str,
    confirm: &str,
) -> Result<User, AppError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !verify_password(current, &user.password_hash) {
        return Err(AppError::BadRequest(
            "Your old password was entered incorrectly. Please enter it again.".into(),
        ));
    }
    if new != confirm {
        return Err(AppError::BadRequest(
            "The two password fields didn't match.".into(),
        ));
    }
    validate_password(new, &user.username).map_err(AppError::BadRequest)?;
    let hash = hash_password(new)?;
    User::update_password(&state.db, user.id, &hash).await?;
    Session::delete_others(&state.db, user.id, keep_session).await?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules() {
        assert!(validate_password("short", "alice").is_err());
        assert!(validate_password("1234567890", "alice").is_err());
        assert!(validate_password("alice-the-traveler", "alice-the-traveler").is_err());
        assert!(validate_password("newpass123!", "alice").is_ok());
    }

    #[test]
    fn hashes_verify() {
        let hash = hash_password("testpass123").unwrap();
        assert!(verify_password("testpass123", &hash));
        assert!(!verify_password("wrongpass", &hash));
        assert!(!verify_password("testpass123", "not-a-hash"));
    }

    #[test]
    fn reset_token_hash_is_stable_hex() {
        let hashed = hash_reset_token("abc");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_reset_token("abc"));
        assert_ne!(hashed, hash_reset_token("abd"));
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("traveler@example.com"));
        assert!(!is_valid_email("traveler@localhost"));
        assert!(!is_valid_email("not an email"));
    }

    #[test]
    fn temporary_passwords_are_random() {
        let a = generate_temporary_password();
        assert_eq!(a.len(), TEMP_PASSWORD_LEN);
        assert_ne!(a, generate_temporary_password());
    }
}
