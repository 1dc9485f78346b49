use crate::error::AppError;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize)]
pub struct HealthResponse {
	status: &'static str,
	version: &'static str,
}

///
/// # Errors
/// Returns 500 when the task store cannot be reached
#[axum::debug_handler]
#[instrument(name = "health", skip(state))]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
	state.store.ping().await?;

	Ok(Json(HealthResponse {
		status: "ok",
		version: env!("CARGO_PKG_VERSION"),
	}))
}
