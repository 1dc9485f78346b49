use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
	#[error("Envelope rejected: {0}")]
	InvalidEnvelope(String),
	#[error("Delivery {0} is no longer in flight")]
	UnknownDelivery(u64),
	#[error("Worker {worker} failed: {reason}")]
	WorkerFailed { worker: String, reason: String },
	#[error("Redis error: {0}")]
	RedisError(#[from] redis::RedisError),
	#[error("Prometheus error: {0}")]
	PrometheusError(#[from] prometheus::Error),
	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
