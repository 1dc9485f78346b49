use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::metrics::QueueMetrics;
use crate::transport::QueueTransport;
use crate::worker::{EnvelopeHandler, Worker};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A fixed number of workers sharing one handler, each with its own
/// subscription and consumer id.
pub struct WorkerPool<T, H> {
	transport: T,
	handler: Arc<H>,
	config: QueueConfig,
	metrics: QueueMetrics,
}

impl<T, H> WorkerPool<T, H>
where
	T: QueueTransport,
	H: EnvelopeHandler,
{
	#[must_use]
	pub fn new(transport: T, handler: Arc<H>, config: QueueConfig, metrics: QueueMetrics) -> Self {
		Self {
			transport,
			handler,
			config,
			metrics,
		}
	}

	/// Runs every worker until `cancel` fires and all of them have settled
	/// their current delivery.
	///
	/// # Errors
	/// This function returns an error if:
	/// - A subscription cannot be opened
	/// - A worker task panics
	pub async fn run(self, cancel: CancellationToken) -> Result<()> {
		let policy = self.config.retry_policy();
		let mut workers = JoinSet::new();

		for i in 0..self.config.worker_concurrency {
			let consumer_id = format!("{}-{i}", self.config.consumer_name);
			let subscription = match self.transport.subscribe(&consumer_id).await {
				Ok(subscription) => subscription,
				Err(e) => {
					cancel.cancel();
					while workers.join_next().await.is_some() {}
					return Err(e);
				}
			};

			let worker = Worker::new(consumer_id, subscription, Arc::clone(&self.handler), policy, self.metrics.clone()).with_error_backoff(self.config.error_backoff);
			let metrics = self.metrics.clone();
			let cancel = cancel.clone();

			workers.spawn(async move {
				metrics.active_workers.inc();
				worker.run(cancel).await;
				metrics.active_workers.dec();
			});
		}

		info!("Started {} workers on queue {}", self.config.worker_concurrency, self.config.queue_name);

		let mut failure = None;
		while let Some(joined) = workers.join_next().await {
			if let Err(e) = joined {
				error!("Worker task ended abnormally: {e}");
				cancel.cancel();
				failure.get_or_insert(QueueError::WorkerFailed {
					worker: self.config.consumer_name.clone(),
					reason: e.to_string(),
				});
			}
		}

		info!("All workers on queue {} stopped", self.config.queue_name);
		failure.map_or(Ok(()), Err)
	}
}
