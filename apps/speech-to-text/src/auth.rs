use crate::error::AppError;
use crate::AppState;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";
const SESSION_KEY_PREFIX: &str = "session:";

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
	#[error("Redis error: {0}")]
	RedisError(#[from] redis::RedisError),
}

/// Maps opaque session tokens to usernames for a bounded lifetime.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
	/// Opens a session for `username` and returns its token.
	async fn create(&self, username: &str) -> Result<String, SessionError>;

	/// The username behind `token`, if the session exists and has not expired.
	async fn resolve(&self, token: &str) -> Result<Option<String>, SessionError>;
}

fn new_token() -> String {
	format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub struct RedisSessionStore {
	conn: MultiplexedConnection,
	ttl: Duration,
}

impl RedisSessionStore {
	#[must_use]
	pub const fn new(conn: MultiplexedConnection, ttl: Duration) -> Self {
		Self { conn, ttl }
	}
}

#[async_trait]
impl SessionStore for RedisSessionStore {
	async fn create(&self, username: &str) -> Result<String, SessionError> {
		let token = new_token();
		let mut conn = self.conn.clone();
		let (): () = conn.set_ex(format!("{SESSION_KEY_PREFIX}{token}"), username, self.ttl.as_secs()).await?;
		Ok(token)
	}

	async fn resolve(&self, token: &str) -> Result<Option<String>, SessionError> {
		let mut conn = self.conn.clone();
		let username: Option<String> = conn.get(format!("{SESSION_KEY_PREFIX}{token}")).await?;
		Ok(username)
	}
}

pub struct MemorySessionStore {
	sessions: DashMap<String, (String, Instant)>,
	ttl: Duration,
}

impl MemorySessionStore {
	#[must_use]
	pub fn new(ttl: Duration) -> Self {
		Self { sessions: DashMap::new(), ttl }
	}
}

#[async_trait]
impl SessionStore for MemorySessionStore {
	async fn create(&self, username: &str) -> Result<String, SessionError> {
		let now = Instant::now();
		self.sessions.retain(|_, (_, expires_at)| *expires_at > now);

		let token = new_token();
		self.sessions.insert(token.clone(), (username.to_string(), now + self.ttl));
		Ok(token)
	}

	async fn resolve(&self, token: &str) -> Result<Option<String>, SessionError> {
		let expired = match self.sessions.get(token) {
			None => return Ok(None),
			Some(entry) if entry.1 > Instant::now() => return Ok(Some(entry.0.clone())),
			Some(_) => true,
		};

		if expired {
			self.sessions.remove(token);
		}
		Ok(None)
	}
}

/// Salted SHA-256, stored as `salt$hexdigest`.
#[must_use]
pub fn hash_password(password: &str) -> String {
	let salt = Uuid::new_v4().simple().to_string();
	let digest = digest(&salt, password);
	format!("{salt}${digest}")
}

#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
	stored.split_once('$').is_some_and(|(salt, expected)| digest(salt, password) == expected)
}

fn digest(salt: &str, password: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(salt.as_bytes());
	hasher.update(password.as_bytes());
	hex::encode(hasher.finalize())
}

/// Session token from the `session_id` cookie, or from a bearer token.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
	let from_cookie = headers
		.get_all(COOKIE)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(';'))
		.filter_map(|pair| pair.trim().split_once('='))
		.find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
		.map(|(_, value)| value.to_string());

	from_cookie.or_else(|| {
		headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.strip_prefix("Bearer "))
			.map(str::trim)
			.filter(|token| !token.is_empty())
			.map(ToString::to_string)
	})
}

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
	S: Send + Sync,
	AppState: FromRef<S>,
{
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let token = session_token(&parts.headers).ok_or(AppError::Unauthorized)?;
		let state = AppState::from_ref(state);
		let username = state.sessions.resolve(&token).await?.ok_or(AppError::Unauthorized)?;
		Ok(Self(username))
	}
}
