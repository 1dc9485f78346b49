use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use prometheus::Registry;
use serde_json::{json, Value};
use speech_to_text::auth::{MemorySessionStore, Owner};
use speech_to_text::observability::HttpMetrics;
use speech_to_text::routes::app_router;
use speech_to_text::store::{SqliteTaskStore, TaskStatus, TaskStore, UserRepository};
use speech_to_text::transcription::{TranscriptionError, Transcriber};
use speech_to_text::worker::TranscriptionHandler;
use speech_to_text::{AppError, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use task_queue::{Envelope, InMemoryQueue, Publisher, QueueConfig, QueueError, QueueMetrics, QueueTransport, RetryPolicy, Worker, WorkerPool};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Answers "hello world" after failing the first `failures` calls.
struct FakeTranscriber {
	calls: AtomicUsize,
	failures: usize,
}

impl FakeTranscriber {
	fn failing(failures: usize) -> Arc<Self> {
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			failures,
		})
	}
}

#[async_trait]
impl Transcriber for FakeTranscriber {
	async fn transcribe(&self, _audio_ref: &str) -> Result<String, TranscriptionError> {
		if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
			return Err(TranscriptionError::Status {
				status: 502,
				body: "upstream unavailable".to_string(),
			});
		}
		Ok("hello world".to_string())
	}
}

struct BrokenPublisher;

#[async_trait]
impl Publisher for BrokenPublisher {
	async fn publish(&self, _envelope: &Envelope) -> task_queue::Result<()> {
		Err(QueueError::RedisError(redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"))))
	}
}

struct Harness {
	router: Router,
	state: AppState,
	store: Arc<SqliteTaskStore>,
	queue: InMemoryQueue,
	registry: Registry,
}

async fn harness_with(publisher: Option<Arc<dyn Publisher>>) -> Harness {
	let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
	let store = Arc::new(SqliteTaskStore::new(pool.clone()));
	store.init_schema().await.unwrap();

	let queue = InMemoryQueue::new(Duration::from_millis(20));
	let publisher = publisher.unwrap_or_else(|| Arc::new(queue.clone()));
	let registry = Registry::new();
	let ttl = Duration::from_secs(3600);

	let state = AppState::new(store.clone(), publisher, UserRepository::new(pool), Arc::new(MemorySessionStore::new(ttl)), registry.clone(), ttl);
	let router = app_router(state.clone(), HttpMetrics::new(&registry).unwrap(), Duration::from_secs(5));

	Harness {
		router,
		state,
		store,
		queue,
		registry,
	}
}

async fn harness() -> Harness {
	harness_with(None).await
}

impl Harness {
	async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
		let (status, _, body) = self.send_raw(method, uri, token, body).await;
		let value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap_or(Value::Null) };
		(status, value)
	}

	async fn send_raw(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
		let mut request = Request::builder().method(method).uri(uri);
		if let Some(token) = token {
			request = request.header(AUTHORIZATION, format!("Bearer {token}"));
		}
		let request = match body {
			Some(body) => request.header(CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap(),
			None => request.body(Body::empty()).unwrap(),
		};

		let response = self.router.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let headers = response.headers().clone();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		(status, headers, bytes.to_vec())
	}

	async fn sign_up(&self, username: &str) -> String {
		let credentials = json!({ "username": username, "password": "secret" });
		let (status, _) = self.send(Method::POST, "/register", None, Some(credentials.clone())).await;
		assert_eq!(status, StatusCode::OK);

		let (status, body) = self.send(Method::POST, "/login", None, Some(credentials)).await;
		assert_eq!(status, StatusCode::OK);
		body["token"].as_str().unwrap().to_string()
	}

	async fn submit(&self, token: &str, audio: &str) -> String {
		let (status, body) = self.send(Method::POST, "/audio", Some(token), Some(json!({ "audio": audio }))).await;
		assert_eq!(status, StatusCode::OK, "{body}");
		body["task_id"].as_str().unwrap().to_string()
	}

	/// Runs one worker until `task_id` is completed.
	async fn process_until_completed(&self, task_id: &str, transcriber: Arc<FakeTranscriber>) -> QueueMetrics {
		let metrics = QueueMetrics::new(&self.registry).unwrap();
		let handler = Arc::new(TranscriptionHandler::new(self.store.clone(), transcriber));
		let subscription = self.queue.subscribe("test-worker").await.unwrap();
		let worker = Worker::new("test-worker", subscription, handler, RetryPolicy::new(5), metrics.clone());

		let cancel = CancellationToken::new();
		let running = tokio::spawn(worker.run(cancel.clone()));

		for _ in 0..400 {
			let task = self.store.get(task_id).await.unwrap().unwrap();
			if task.status == TaskStatus::Completed {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		cancel.cancel();
		running.await.unwrap();
		metrics
	}
}

#[tokio::test]
async fn test_alice_and_bob() {
	let h = harness().await;
	let alice = h.sign_up("alice").await;
	let bob = h.sign_up("bob").await;

	let task_id = h.submit(&alice, "https://x/a.wav").await;

	let (status, body) = h.send(Method::GET, &format!("/status?task_id={task_id}"), Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "status": "pending" }));

	let (status, body) = h.send(Method::GET, &format!("/tasks/{task_id}/result"), Some(&alice), None).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(body["status"], "pending");

	h.process_until_completed(&task_id, FakeTranscriber::failing(0)).await;

	let (status, body) = h.send(Method::GET, &format!("/tasks/{task_id}/status"), Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "status": "completed" }));

	let (status, first) = h.send(Method::GET, &format!("/result?task_id={task_id}"), Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(first, json!({ "result": "hello world" }));
	let (_, second) = h.send(Method::GET, &format!("/tasks/{task_id}/result"), Some(&alice), None).await;
	assert_eq!(first, second);

	for uri in [format!("/status?task_id={task_id}"), format!("/result?task_id={task_id}"), format!("/tasks/{task_id}/result")] {
		let (status, body) = h.send(Method::GET, &uri, Some(&bob), None).await;
		assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
		assert!(!body.to_string().contains("hello world"));
	}

	let (status, body) = h.send(Method::GET, "/tasks", Some(&bob), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_failed_transcription_is_retried_until_completed() {
	let h = harness().await;
	let alice = h.sign_up("alice").await;
	let task_id = h.submit(&alice, "https://x/a.wav").await;

	let transcriber = FakeTranscriber::failing(1);
	let metrics = h.process_until_completed(&task_id, Arc::clone(&transcriber)).await;

	let task = h.store.get(&task_id).await.unwrap().unwrap();
	assert_eq!(task.status, TaskStatus::Completed);
	assert_eq!(task.result.as_deref(), Some("hello world"));
	assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
	assert_eq!(metrics.settled(task_queue::Disposition::Requeue), 1);
	assert_eq!(metrics.settled(task_queue::Disposition::Ack), 1);

	let (_, body) = h.send(Method::GET, "/tasks", Some(&alice), None).await;
	assert_eq!(body["pagination"]["total"], 1);
	assert_eq!(h.queue.ready_len().await, 0);
	assert_eq!(h.queue.in_flight_len().await, 0);
}

#[tokio::test]
async fn test_worker_pool_drains_many_submissions() {
	let h = harness().await;
	let alice = h.sign_up("alice").await;
	let mut ids = Vec::new();
	for i in 0..6 {
		ids.push(h.submit(&alice, &format!("https://x/{i}.wav")).await);
	}

	let config = QueueConfig {
		worker_concurrency: 3,
		poll_timeout: Duration::from_millis(20),
		..QueueConfig::default()
	};
	let handler = Arc::new(TranscriptionHandler::new(h.store.clone(), FakeTranscriber::failing(2)));
	let pool = WorkerPool::new(h.queue.clone(), handler, config, QueueMetrics::new(&h.registry).unwrap());
	let cancel = CancellationToken::new();
	let running = tokio::spawn(pool.run(cancel.clone()));

	for _ in 0..400 {
		let page = h.state.query.list(&Owner("alice".to_string()), speech_to_text::store::PageRequest::default()).await.unwrap();
		if page.items.iter().all(|task| task.status == TaskStatus::Completed) {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	cancel.cancel();
	running.await.unwrap().unwrap();

	for id in ids {
		let task = h.store.get(&id).await.unwrap().unwrap();
		assert_eq!(task.result.as_deref(), Some("hello world"), "{id}");
	}
}

#[tokio::test]
async fn test_pagination_newest_first() {
	let h = harness().await;
	let alice = h.sign_up("alice").await;
	let mut ids = Vec::new();
	for i in 0..25 {
		ids.push(h.submit(&alice, &format!("https://x/{i}.wav")).await);
	}

	let (status, body) = h.send(Method::GET, "/tasks?page=3&page_size=10", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["pagination"], json!({ "page": 3, "page_size": 10, "total": 25, "total_pages": 3 }));
	let tasks = body["tasks"].as_array().unwrap();
	assert_eq!(tasks.len(), 5);
	assert_eq!(tasks[0]["task_id"], ids[4].as_str());
	assert_eq!(tasks[4]["task_id"], ids[0].as_str());

	let (_, body) = h.send(Method::GET, "/tasks", Some(&alice), None).await;
	assert_eq!(body["tasks"][0]["task_id"], ids[24].as_str());
	assert_eq!(body["tasks"][0]["audio"], "https://x/24.wav");
	assert_eq!(body["tasks"][0]["status"], "pending");

	let (status, body) = h.send(Method::GET, "/tasks?page=zero&page_size=1000", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["pagination"]["page"], 1);
	assert_eq!(body["pagination"]["page_size"], 10);
}

#[tokio::test]
async fn test_empty_audio_is_rejected_without_side_effects() {
	let h = harness().await;
	let alice = h.sign_up("alice").await;

	for body in [json!({ "audio": "" }), json!({ "audio": "   " }), json!({})] {
		let (status, _) = h.send(Method::POST, "/audio", Some(&alice), Some(body)).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	let (_, body) = h.send(Method::GET, "/tasks", Some(&alice), None).await;
	assert_eq!(body["pagination"]["total"], 0);
	assert_eq!(h.queue.ready_len().await, 0);
}

#[tokio::test]
async fn test_publish_failure_leaves_task_pending() {
	let h = harness_with(Some(Arc::new(BrokenPublisher))).await;
	let owner = Owner("alice".to_string());

	let err = h.state.submission.submit(&owner, "https://x/a.wav").await.unwrap_err();
	assert!(matches!(err, AppError::Queue(QueueError::RedisError(_))));

	let page = h.store.list_by_owner("alice", speech_to_text::store::PageRequest::default()).await.unwrap();
	assert_eq!(page.pagination.total, 1);
	assert_eq!(page.items[0].status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_authentication_boundary() {
	let h = harness().await;

	let (status, _) = h.send(Method::POST, "/audio", None, Some(json!({ "audio": "https://x/a.wav" }))).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = h.send(Method::GET, "/tasks", Some("not-a-session"), None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let alice = h.sign_up("alice").await;
	let (status, _) = h.send(Method::GET, "/status?task_id=does-not-exist", Some(&alice), None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	let (status, _) = h.send(Method::GET, "/status", Some(&alice), None).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_and_login_rules() {
	let h = harness().await;
	h.sign_up("alice").await;

	let (status, _) = h.send(Method::POST, "/register", None, Some(json!({ "username": "alice", "password": "other" }))).await;
	assert_eq!(status, StatusCode::CONFLICT);

	let (status, _) = h.send(Method::POST, "/register", None, Some(json!({ "username": "", "password": "x" }))).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let (status, _) = h.send(Method::POST, "/login", None, Some(json!({ "username": "alice", "password": "wrong" }))).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, headers, _) = h.send_raw(Method::POST, "/login", None, Some(json!({ "username": "alice", "password": "secret" }))).await;
	assert_eq!(status, StatusCode::OK);
	let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap().to_string();
	assert!(cookie.starts_with("session_id="));
	assert!(cookie.contains("HttpOnly"));

	let session = cookie.split(';').next().unwrap().to_string();
	let request = Request::builder().uri("/tasks").header(COOKIE, session).body(Body::empty()).unwrap();
	let response = h.router.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_metrics() {
	let h = harness().await;

	let (status, body) = h.send(Method::GET, "/health", None, None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "ok");

	let (status, _, body) = h.send_raw(Method::GET, "/metrics", None, None).await;
	assert_eq!(status, StatusCode::OK);
	let text = String::from_utf8(body).unwrap();
	assert!(text.contains("http_requests_total"));
}
