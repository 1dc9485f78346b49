use crate::auth::{MemorySessionStore, RedisSessionStore, SessionStore};
use crate::config::{Backend, Config, Mode};
use crate::observability::HttpMetrics;
use crate::routes::app_router;
use crate::store::{SqliteTaskStore, TaskStore, UserRepository};
use crate::transcription::{DeepgramTranscriber, Transcriber};
use crate::worker::TranscriptionHandler;
use crate::AppState;
use anyhow::{Context, Result};
use prometheus::Registry;
use sqlx::sqlite::SqlitePoolOptions;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use task_queue::{InMemoryQueue, Publisher, QueueConfig, QueueError, QueueMetrics, RedisQueue, WorkerPool};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONNECT_MAX_RETRIES: u32 = 5;
const CONNECT_INITIAL_BACKOFF_MS: u64 = 500;

#[derive(Clone)]
pub enum QueueBackend {
	Redis(RedisQueue),
	Memory(InMemoryQueue),
}

impl QueueBackend {
	fn publisher(&self) -> Arc<dyn Publisher> {
		match self {
			Self::Redis(queue) => Arc::new(queue.clone()),
			Self::Memory(queue) => Arc::new(queue.clone()),
		}
	}

	/// Runs a worker pool on this backend until `cancel` fires.
	///
	/// # Errors
	/// Returns an error if a subscription cannot be opened or a worker dies
	pub async fn run_workers(&self, handler: Arc<TranscriptionHandler>, config: QueueConfig, metrics: QueueMetrics, cancel: CancellationToken) -> Result<(), QueueError> {
		match self {
			Self::Redis(queue) => WorkerPool::new(queue.clone(), handler, config, metrics).run(cancel).await,
			Self::Memory(queue) => WorkerPool::new(queue.clone(), handler, config, metrics).run(cancel).await,
		}
	}
}

/// Every long-lived handle the process needs, built once at startup.
pub struct Components {
	pub state: AppState,
	pub queue: QueueBackend,
	pub http_metrics: HttpMetrics,
	pub queue_metrics: QueueMetrics,
	pub handler: Option<Arc<TranscriptionHandler>>,
}

impl Components {
	///
	/// # Errors
	/// Fails when the database, redis or the transcription client cannot be set up
	pub async fn build(config: &Config, mode: Mode) -> Result<Self> {
		let pool = SqlitePoolOptions::new()
			.max_connections(config.database_max_connections)
			.connect(&config.database_url)
			.await
			.with_context(|| format!("failed to open database {}", config.database_url))?;

		let tasks = SqliteTaskStore::new(pool.clone());
		tasks.init_schema().await?;
		let store: Arc<dyn TaskStore> = Arc::new(tasks);
		let users = UserRepository::new(pool);

		let registry = Registry::new();
		let http_metrics = HttpMetrics::new(&registry)?;
		let queue_metrics = QueueMetrics::new(&registry)?;

		let (queue, sessions): (QueueBackend, Arc<dyn SessionStore>) = match config.backend {
			Backend::Redis => {
				let queue = connect_with_retry("redis queue", || RedisQueue::connect(&config.redis_url, &config.queue)).await?;
				let client = redis::Client::open(config.redis_url.as_str())?;
				let conn = connect_with_retry("redis sessions", || client.get_multiplexed_async_connection()).await?;
				(QueueBackend::Redis(queue), Arc::new(RedisSessionStore::new(conn, config.session_ttl)))
			}
			Backend::Memory => {
				warn!("Using the in-memory backend: queued tasks and sessions do not survive a restart");
				(QueueBackend::Memory(InMemoryQueue::new(config.queue.poll_timeout)), Arc::new(MemorySessionStore::new(config.session_ttl)))
			}
		};

		let handler = if mode.runs_workers() {
			let transcriber: Arc<dyn Transcriber> = Arc::new(DeepgramTranscriber::new(&config.deepgram)?);
			Some(Arc::new(TranscriptionHandler::new(Arc::clone(&store), transcriber)))
		} else {
			None
		};

		let state = AppState::new(store, queue.publisher(), users, sessions, registry, config.session_ttl);

		Ok(Self {
			state,
			queue,
			http_metrics,
			queue_metrics,
			handler,
		})
	}
}

async fn connect_with_retry<T, E, F, Fut>(what: &str, mut connect: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: Into<anyhow::Error> + Display,
{
	let mut attempt = 1;
	loop {
		match connect().await {
			Ok(connected) => {
				info!("Connected to {what}");
				return Ok(connected);
			}
			Err(e) if attempt >= CONNECT_MAX_RETRIES => {
				error!(error = %e, "Failed to connect to {what} after {CONNECT_MAX_RETRIES} attempts");
				return Err(e.into());
			}
			Err(e) => {
				let backoff = Duration::from_millis(CONNECT_INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1));
				warn!(error = %e, attempt, "Failed to connect to {what}, retrying in {backoff:?}");
				tokio::time::sleep(backoff).await;
				attempt += 1;
			}
		}
	}
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {e}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {e}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}

async fn serve_http(config: &Config, components: &Components, cancel: CancellationToken) -> Result<()> {
	let router = app_router(components.state.clone(), components.http_metrics.clone(), config.request_timeout);
	let listener = TcpListener::bind(config.bind_address()).await.with_context(|| format!("failed to bind {}", config.bind_address()))?;
	info!("Listening on {}", listener.local_addr()?);

	axum::serve(listener, router)
		.with_graceful_shutdown(async move { cancel.cancelled().await })
		.await
		.context("http server failed")
}

/// Runs the halves of the service selected by `mode` until `cancel` fires
/// or one of them fails. Either way the other half is asked to stop and
/// awaited, so workers always settle their current delivery.
///
/// # Errors
/// Returns the first failure from the HTTP server or the worker pool
pub async fn run(config: &Config, mode: Mode, components: Components, cancel: CancellationToken) -> Result<()> {
	let http = async {
		if !mode.serves_http() {
			return Ok(());
		}
		let served = serve_http(config, &components, cancel.clone()).await;
		cancel.cancel();
		served
	};

	let workers = async {
		let Some(handler) = components.handler.clone() else {
			return Ok(());
		};

		let ran = components.queue.run_workers(handler, config.queue.clone(), components.queue_metrics.clone(), cancel.clone()).await;
		cancel.cancel();
		ran.context("worker pool failed")
	};

	let (http, workers) = tokio::join!(http, workers);
	http.and(workers)
}
