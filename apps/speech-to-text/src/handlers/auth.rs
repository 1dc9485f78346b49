use crate::auth::{hash_password, verify_password, SESSION_COOKIE};
use crate::error::AppError;
use crate::store::StoreError;
use crate::AppState;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
pub struct Credentials {
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub password: String,
}

impl Credentials {
	fn validate(&self) -> Result<&str, AppError> {
		let username = self.username.trim();
		if username.is_empty() || self.password.is_empty() {
			return Err(AppError::validation("username and password are required"));
		}
		Ok(username)
	}
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
	pub result: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
}

///
/// # Errors
/// Returns 400 for blank credentials and 409 when the username is taken
#[axum::debug_handler]
#[instrument(name = "register", skip(state, credentials), fields(username = %credentials.username))]
pub async fn register(State(state): State<AppState>, Json(credentials): Json<Credentials>) -> Result<Json<AuthResponse>, AppError> {
	let username = credentials.validate()?;

	match state.users.create(username, &hash_password(&credentials.password)).await {
		Ok(()) => {}
		Err(StoreError::UserExists(_)) => return Err(AppError::Conflict(format!("username {username} is taken"))),
		Err(e) => return Err(e.into()),
	}

	info!("User registered");
	Ok(Json(AuthResponse { result: "ok", token: None }))
}

///
/// # Errors
/// Returns 401 when the credentials do not match
#[axum::debug_handler]
#[instrument(name = "login", skip(state, credentials), fields(username = %credentials.username))]
pub async fn login(State(state): State<AppState>, Json(credentials): Json<Credentials>) -> Result<impl IntoResponse, AppError> {
	let username = credentials.validate()?;

	let stored = state.users.password_hash(username).await?;
	if !stored.is_some_and(|hash| verify_password(&credentials.password, &hash)) {
		return Err(AppError::Unauthorized);
	}

	let token = state.sessions.create(username).await?;
	let cookie = format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; Max-Age={}", state.session_ttl.as_secs());

	info!("User logged in");
	Ok(([(SET_COOKIE, cookie)], Json(AuthResponse { result: "ok", token: Some(token) })))
}
