use crate::handlers::tasks as routes;
use crate::AppState;
use axum::routing::{get, post};
use axum::{extract::FromRef, Router};

pub fn task_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new()
		.route("/audio", post(routes::submit_audio))
		.route("/status", get(routes::status_by_query))
		.route("/result", get(routes::result_by_query))
		.route("/tasks", get(routes::list_tasks))
		.route("/tasks/:task_id/status", get(routes::status_by_path))
		.route("/tasks/:task_id/result", get(routes::result_by_path))
}
