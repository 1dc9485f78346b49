pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod query;
pub mod routes;
pub mod store;
pub mod submission;
pub mod transcription;
pub mod worker;

pub use config::{Backend, Cli, Config, Mode};
pub use error::AppError;

use auth::SessionStore;
use prometheus::Registry;
use query::TaskQuery;
use std::sync::Arc;
use std::time::Duration;
use store::{TaskStore, UserRepository};
use submission::TaskSubmission;
use task_queue::Publisher;

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn TaskStore>,
	pub submission: TaskSubmission,
	pub query: TaskQuery,
	pub users: UserRepository,
	pub sessions: Arc<dyn SessionStore>,
	pub registry: Registry,
	pub session_ttl: Duration,
}

impl AppState {
	#[must_use]
	pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<dyn Publisher>, users: UserRepository, sessions: Arc<dyn SessionStore>, registry: Registry, session_ttl: Duration) -> Self {
		Self {
			submission: TaskSubmission::new(Arc::clone(&store), publisher),
			query: TaskQuery::new(Arc::clone(&store)),
			store,
			users,
			sessions,
			registry,
			session_ttl,
		}
	}
}
