use crate::auth::SessionError;
use crate::store::StoreError;
use axum::body::Body;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use task_queue::QueueError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
	#[error("{0}")]
	Validation(String),

	#[error("authentication required")]
	Unauthorized,

	#[error("user may not perform that action")]
	Forbidden,

	#[error("{0} not found")]
	NotFound(String),

	#[error("{0}")]
	Conflict(String),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),

	#[error("Session error: {0}")]
	Session(#[from] SessionError),

	#[error("an internal server error occurred")]
	Anyhow(#[from] anyhow::Error),
}

impl AppError {
	pub fn validation(message: impl Into<String>) -> Self {
		Self::Validation(message.into())
	}

	const fn status_code(&self) -> StatusCode {
		match self {
			Self::Validation(_) => StatusCode::BAD_REQUEST,
			Self::Unauthorized => StatusCode::UNAUTHORIZED,
			Self::Forbidden => StatusCode::FORBIDDEN,
			Self::NotFound(_) => StatusCode::NOT_FOUND,
			Self::Conflict(_) => StatusCode::CONFLICT,
			Self::Store(_) | Self::Queue(_) | Self::Session(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response<Body> {
		let status = self.status_code();

		match self {
			Self::Unauthorized => {
				return (status, [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))], Json(json!({ "detail": self.to_string() }))).into_response();
			}
			Self::Store(ref e) => tracing::error!("Store failure: {e}"),
			Self::Queue(ref e) => tracing::error!("Queue failure: {e}"),
			Self::Session(ref e) => tracing::error!("Session failure: {e}"),
			Self::Anyhow(ref e) => tracing::error!("Generic error: {e:?}"),
			_ => (),
		}

		// Infrastructure details stay in the logs.
		let detail = if status.is_server_error() { "an internal server error occurred".to_string() } else { self.to_string() };

		(status, Json(json!({ "detail": detail }))).into_response()
	}
}
