use crate::handlers::auth as routes;
use crate::AppState;
use axum::routing::post;
use axum::{extract::FromRef, Router};

pub fn auth_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/register", post(routes::register)).route("/login", post(routes::login))
}
