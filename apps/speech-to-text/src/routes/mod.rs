pub mod auth;
pub mod health;
pub mod tasks;

use crate::observability::{metrics_handler, metrics_middleware, HttpMetrics};
use crate::AppState;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

async fn handle_tower_error(error: BoxError) -> (StatusCode, String) {
	if error.is::<tower::timeout::error::Elapsed>() {
		tracing::warn!("Request timeout: {}", error);
		(StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
	} else {
		tracing::error!("Unhandled tower error: {}", error);
		(StatusCode::INTERNAL_SERVER_ERROR, "an internal server error occurred".to_string())
	}
}

/// The complete HTTP surface, with tracing, metrics and a per-request timeout.
pub fn app_router(state: AppState, http_metrics: HttpMetrics, request_timeout: Duration) -> Router {
	let api = Router::new()
		.merge(auth::auth_routes())
		.merge(tasks::task_routes())
		.merge(health::get_health())
		.route("/metrics", get(metrics_handler));

	api
		.layer(
			ServiceBuilder::new()
				.layer(from_fn_with_state(http_metrics, metrics_middleware))
				.layer(TraceLayer::new_for_http())
				.layer(HandleErrorLayer::new(handle_tower_error))
				.layer(TimeoutLayer::new(request_timeout)),
		)
		.with_state(state)
}
