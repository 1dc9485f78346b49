use crate::auth::Owner;
use crate::error::AppError;
use crate::query::{TaskOutcome, TaskSummary};
use crate::store::{PageRequest, Pagination, TaskStatus};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct SubmitAudio {
	#[serde(default)]
	pub audio: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
	pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskIdParams {
	#[serde(default)]
	pub task_id: String,
}

/// Kept as raw strings so bad values fall back to defaults instead of
/// rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
	pub page: Option<String>,
	pub page_size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
	pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
	pub tasks: Vec<TaskSummary>,
	pub pagination: Pagination,
}

///
/// # Errors
/// Returns 400 for a blank audio reference and 500 when the task cannot be stored or queued
#[axum::debug_handler]
#[instrument(name = "submit_audio", skip(state, body), fields(owner = %owner.as_str()))]
pub async fn submit_audio(State(state): State<AppState>, owner: Owner, Json(body): Json<SubmitAudio>) -> Result<Json<SubmitResponse>, AppError> {
	let task_id = state.submission.submit(&owner, &body.audio).await?;
	Ok(Json(SubmitResponse { task_id }))
}

async fn status(state: &AppState, owner: &Owner, task_id: &str) -> Result<Json<StatusResponse>, AppError> {
	let status = state.query.status(owner, task_id).await?;
	Ok(Json(StatusResponse { status }))
}

async fn result(state: &AppState, owner: &Owner, task_id: &str) -> Result<Response, AppError> {
	let response = match state.query.result(owner, task_id).await? {
		TaskOutcome::Completed(result) => Json(serde_json::json!({ "result": result })).into_response(),
		TaskOutcome::Pending => (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": TaskStatus::Pending, "detail": "result not ready" }))).into_response(),
	};
	Ok(response)
}

///
/// # Errors
/// Returns 404 for unknown tasks and 403 for tasks owned by someone else
#[axum::debug_handler]
#[instrument(name = "task_status", skip(state), fields(owner = %owner.as_str()))]
pub async fn status_by_query(State(state): State<AppState>, owner: Owner, Query(params): Query<TaskIdParams>) -> Result<Json<StatusResponse>, AppError> {
	status(&state, &owner, &params.task_id).await
}

///
/// # Errors
/// Returns 404 for unknown tasks and 403 for tasks owned by someone else
#[axum::debug_handler]
#[instrument(name = "task_status", skip(state), fields(owner = %owner.as_str()))]
pub async fn status_by_path(State(state): State<AppState>, owner: Owner, Path(task_id): Path<String>) -> Result<Json<StatusResponse>, AppError> {
	status(&state, &owner, &task_id).await
}

///
/// # Errors
/// Returns 404 for unknown tasks and 403 for tasks owned by someone else
#[axum::debug_handler]
#[instrument(name = "task_result", skip(state), fields(owner = %owner.as_str()))]
pub async fn result_by_query(State(state): State<AppState>, owner: Owner, Query(params): Query<TaskIdParams>) -> Result<Response, AppError> {
	result(&state, &owner, &params.task_id).await
}

///
/// # Errors
/// Returns 404 for unknown tasks and 403 for tasks owned by someone else
#[axum::debug_handler]
#[instrument(name = "task_result", skip(state), fields(owner = %owner.as_str()))]
pub async fn result_by_path(State(state): State<AppState>, owner: Owner, Path(task_id): Path<String>) -> Result<Response, AppError> {
	result(&state, &owner, &task_id).await
}

///
/// # Errors
/// Returns 500 when the task store cannot be read
#[axum::debug_handler]
#[instrument(name = "list_tasks", skip(state), fields(owner = %owner.as_str()))]
pub async fn list_tasks(State(state): State<AppState>, owner: Owner, Query(params): Query<ListParams>) -> Result<Json<TaskListResponse>, AppError> {
	let request = PageRequest::lenient(params.page.as_deref(), params.page_size.as_deref());
	let page = state.query.list(&owner, request).await?;

	Ok(Json(TaskListResponse {
		tasks: page.items,
		pagination: page.pagination,
	}))
}
