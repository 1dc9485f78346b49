use crate::envelope::Envelope;
use crate::metrics::QueueMetrics;
use crate::policy::{Disposition, RetryPolicy};
use crate::transport::{Delivery, Subscription};
use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Processes the envelopes pulled off the queue. An `Err` makes the worker
/// nack the delivery; the retry policy decides between redelivery and the
/// dead-letter queue.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
	type Error: Display + Send + Sync + 'static;

	async fn handle(&self, envelope: &Envelope) -> Result<(), Self::Error>;
}

pub struct Worker<S, H> {
	id: String,
	subscription: S,
	processor: Processor<H>,
	error_backoff: Duration,
}

struct Processor<H> {
	handler: Arc<H>,
	policy: RetryPolicy,
	metrics: QueueMetrics,
}

impl<S, H> Worker<S, H>
where
	S: Subscription,
	H: EnvelopeHandler,
{
	#[must_use]
	pub fn new(id: impl Into<String>, subscription: S, handler: Arc<H>, policy: RetryPolicy, metrics: QueueMetrics) -> Self {
		Self {
			id: id.into(),
			subscription,
			processor: Processor { handler, policy, metrics },
			error_backoff: Duration::from_secs(2),
		}
	}

	#[must_use]
	pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
		self.error_backoff = error_backoff;
		self
	}

	/// Consumes until `cancel` fires. Cancellation is only observed between
	/// deliveries: a delivery that has been received is always processed and
	/// settled before the loop exits.
	///
	/// A delivery whose ack or nack fails is still held by this consumer, so
	/// the next poll first runs recovery to put it back on the queue.
	pub async fn run(mut self, cancel: CancellationToken) {
		let span = tracing::info_span!("worker", id = %self.id);
		async move {
			info!("Worker started");
			let mut unsettled = false;

			while !cancel.is_cancelled() {
				if unsettled {
					match self.recover().await {
						Ok(()) => unsettled = false,
						Err(e) => {
							error!("Failed to recover unsettled deliveries: {e}");
							backoff(self.error_backoff, &cancel).await;
							continue;
						}
					}
				}

				match self.subscription.next_delivery().await {
					Ok(Some(delivery)) => unsettled = !self.processor.process(delivery).await,
					Ok(None) => {}
					Err(e) => {
						self.processor.metrics.transport_errors_total.inc();
						error!("Failed to receive from queue: {e}");
						backoff(self.error_backoff, &cancel).await;
					}
				}
			}

			if unsettled {
				if let Err(e) = self.recover().await {
					warn!("Leaving unsettled deliveries for the next subscriber: {e}");
				}
			}

			info!("Worker stopped");
		}
		.instrument(span)
		.await;
	}

	async fn recover(&mut self) -> crate::error::Result<()> {
		let recovered = self.subscription.recover().await.inspect_err(|_| self.processor.metrics.transport_errors_total.inc())?;
		if recovered > 0 {
			self.processor.metrics.recovered_total.inc_by(u64::try_from(recovered).unwrap_or(u64::MAX));
			info!("Put {recovered} unsettled deliveries back on the queue");
		}
		Ok(())
	}
}

async fn backoff(pause: Duration, cancel: &CancellationToken) {
	tokio::select! {
		() = cancel.cancelled() => {}
		() = tokio::time::sleep(pause) => {}
	}
}

impl<H: EnvelopeHandler> Processor<H> {
	/// Returns false when the delivery could not be settled and is still
	/// held by this consumer.
	async fn process(&self, delivery: Delivery) -> bool {
		let task_id = delivery.envelope().task_id.clone();
		let attempt = delivery.attempt();

		if self.policy.exhausted(attempt) {
			warn!(task_id = %task_id, attempt, "Delivery budget spent before processing");
			return self.settle(delivery, Disposition::DeadLetter, &task_id).await;
		}
		debug!(task_id = %task_id, attempt, "Processing delivery");

		self.metrics.in_flight.inc();
		let timer = self.metrics.processing_duration.start_timer();
		let outcome = self.handler.handle(delivery.envelope()).await;
		timer.observe_duration();
		self.metrics.in_flight.dec();

		if let Err(e) = &outcome {
			warn!(task_id = %task_id, attempt, "Processing failed: {e}");
		}

		let disposition = self.policy.decide(attempt, outcome.is_ok());
		self.settle(delivery, disposition, &task_id).await
	}

	async fn settle(&self, delivery: Delivery, disposition: Disposition, task_id: &str) -> bool {
		match delivery.settle(disposition).await {
			Ok(()) => {
				self.metrics.record(disposition);
				debug!(task_id = %task_id, outcome = disposition.as_str(), "Delivery settled");
				true
			}
			Err(e) => {
				self.metrics.settle_errors_total.inc();
				error!(task_id = %task_id, outcome = disposition.as_str(), "Failed to settle delivery: {e}");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{QueueError, Result as QueueResult};
	use crate::inmem::InMemoryQueue;
	use crate::transport::{Acknowledger, Publisher, QueueTransport};
	use prometheus::Registry;
	use std::collections::{HashMap, VecDeque};
	use std::sync::atomic::{AtomicU32, Ordering};
	use tokio::sync::{Mutex, Notify};

	/// Fails each task id a fixed number of times before succeeding.
	#[derive(Default)]
	struct FlakyHandler {
		failures_left: Mutex<HashMap<String, u32>>,
		handled: Mutex<Vec<(String, u32)>>,
	}

	impl FlakyHandler {
		async fn failing(task_id: &str, times: u32) -> Self {
			let handler = Self::default();
			handler.failures_left.lock().await.insert(task_id.to_string(), times);
			handler
		}
	}

	#[async_trait]
	impl EnvelopeHandler for FlakyHandler {
		type Error = String;

		async fn handle(&self, envelope: &Envelope) -> Result<(), String> {
			self.handled.lock().await.push((envelope.task_id.clone(), envelope.attempt));
			let mut failures = self.failures_left.lock().await;
			match failures.get_mut(&envelope.task_id) {
				Some(left) if *left > 0 => {
					*left -= 1;
					Err("transcription service unavailable".to_string())
				}
				_ => Ok(()),
			}
		}
	}

	async fn run_until_drained(queue: &InMemoryQueue, handler: Arc<FlakyHandler>, policy: RetryPolicy) -> QueueMetrics {
		let metrics = QueueMetrics::new(&Registry::new()).unwrap();
		let subscription = queue.subscribe("test-0").await.unwrap();
		let worker = Worker::new("test-0", subscription, handler, policy, metrics.clone());

		let cancel = CancellationToken::new();
		let handle = tokio::spawn(worker.run(cancel.clone()));

		for _ in 0..200 {
			if queue.ready_len().await == 0 && queue.in_flight_len().await == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		cancel.cancel();
		handle.await.unwrap();
		metrics
	}

	#[tokio::test]
	async fn test_failed_delivery_is_retried_then_acked() {
		let queue = InMemoryQueue::new(Duration::from_millis(20));
		queue.publish(&Envelope::new("t-1", "a")).await.unwrap();
		let handler = Arc::new(FlakyHandler::failing("t-1", 1).await);

		let metrics = run_until_drained(&queue, Arc::clone(&handler), RetryPolicy::new(5)).await;

		let handled = handler.handled.lock().await.clone();
		assert_eq!(handled, vec![("t-1".to_string(), 0), ("t-1".to_string(), 1)]);
		assert_eq!(metrics.settled(Disposition::Requeue), 1);
		assert_eq!(metrics.settled(Disposition::Ack), 1);
		assert!(queue.dead_letters().await.is_empty());
	}

	#[tokio::test]
	async fn test_exhausted_delivery_is_dead_lettered() {
		let queue = InMemoryQueue::new(Duration::from_millis(20));
		queue.publish(&Envelope::new("t-1", "a")).await.unwrap();
		let handler = Arc::new(FlakyHandler::failing("t-1", u32::MAX).await);

		let metrics = run_until_drained(&queue, Arc::clone(&handler), RetryPolicy::new(3)).await;

		assert_eq!(handler.handled.lock().await.len(), 3);
		assert_eq!(metrics.settled(Disposition::DeadLetter), 1);
		let dead = queue.dead_letters().await;
		assert_eq!(dead.len(), 1);
		assert_eq!(dead[0].attempt, 2);
	}

	#[tokio::test]
	async fn test_cancelled_worker_stops_when_idle() {
		let queue = InMemoryQueue::new(Duration::from_millis(20));
		let metrics = QueueMetrics::new(&Registry::new()).unwrap();
		let subscription = queue.subscribe("test-0").await.unwrap();
		let worker = Worker::new("test-0", subscription, Arc::new(FlakyHandler::default()), RetryPolicy::default(), metrics);

		let cancel = CancellationToken::new();
		let handle = tokio::spawn(worker.run(cancel.clone()));
		cancel.cancel();

		tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
	}

	/// Queue whose acks can be made to fail, to exercise a consumer that
	/// keeps running while holding an unsettled delivery.
	#[derive(Clone, Default)]
	struct Broker {
		ready: Arc<Mutex<VecDeque<Envelope>>>,
		held: Arc<Mutex<Vec<Envelope>>>,
		acked: Arc<Mutex<Vec<Envelope>>>,
		failing_acks: Arc<AtomicU32>,
	}

	struct BrokerSubscription(Broker);

	#[async_trait]
	impl Subscription for BrokerSubscription {
		async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>> {
			let next = self.0.ready.lock().await.pop_front();
			let Some(envelope) = next else {
				tokio::time::sleep(Duration::from_millis(5)).await;
				return Ok(None);
			};

			self.0.held.lock().await.push(envelope.clone());
			let acker = BrokerAcker {
				broker: self.0.clone(),
				envelope: envelope.clone(),
			};
			Ok(Some(Delivery::new(envelope, Box::new(acker))))
		}

		async fn recover(&mut self) -> QueueResult<usize> {
			let held: Vec<Envelope> = self.0.held.lock().await.drain(..).collect();
			let mut ready = self.0.ready.lock().await;
			for envelope in held.iter().rev() {
				ready.push_front(envelope.redelivered());
			}
			Ok(held.len())
		}
	}

	struct BrokerAcker {
		broker: Broker,
		envelope: Envelope,
	}

	impl BrokerAcker {
		async fn release(&self) {
			self.broker.held.lock().await.retain(|held| held != &self.envelope);
		}
	}

	#[async_trait]
	impl Acknowledger for BrokerAcker {
		async fn ack(&self) -> QueueResult<()> {
			let failing = self.broker.failing_acks.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)).is_ok();
			if failing {
				return Err(QueueError::RedisError(redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"))));
			}
			self.release().await;
			self.broker.acked.lock().await.push(self.envelope.clone());
			Ok(())
		}

		async fn requeue(&self, next: &Envelope) -> QueueResult<()> {
			self.release().await;
			self.broker.ready.lock().await.push_back(next.clone());
			Ok(())
		}

		async fn dead_letter(&self) -> QueueResult<()> {
			self.release().await;
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_failed_ack_is_redelivered_without_resubscribing() {
		let broker = Broker::default();
		broker.ready.lock().await.push_back(Envelope::new("t-1", "a"));
		broker.failing_acks.store(1, Ordering::SeqCst);

		let handler = Arc::new(FlakyHandler::default());
		let metrics = QueueMetrics::new(&Registry::new()).unwrap();
		let worker = Worker::new("test-0", BrokerSubscription(broker.clone()), Arc::clone(&handler), RetryPolicy::new(5), metrics.clone()).with_error_backoff(Duration::from_millis(5));

		let cancel = CancellationToken::new();
		let running = tokio::spawn(worker.run(cancel.clone()));
		for _ in 0..200 {
			if !broker.acked.lock().await.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		cancel.cancel();
		running.await.unwrap();

		let handled = handler.handled.lock().await.clone();
		assert_eq!(handled, vec![("t-1".to_string(), 0), ("t-1".to_string(), 1)]);
		assert_eq!(broker.acked.lock().await.len(), 1);
		assert!(broker.held.lock().await.is_empty());
		assert_eq!(metrics.settle_errors_total.get(), 1);
		assert_eq!(metrics.recovered_total.get(), 1);
		assert_eq!(metrics.settled(Disposition::Ack), 1);
	}

	/// Signals when it starts and then takes a while to finish.
	struct SlowHandler {
		started: Notify,
		pause: Duration,
	}

	#[async_trait]
	impl EnvelopeHandler for SlowHandler {
		type Error = String;

		async fn handle(&self, _envelope: &Envelope) -> Result<(), String> {
			self.started.notify_one();
			tokio::time::sleep(self.pause).await;
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_cancel_mid_delivery_settles_it_and_pulls_nothing_more() {
		let queue = InMemoryQueue::new(Duration::from_millis(20));
		queue.publish(&Envelope::new("t-1", "a")).await.unwrap();
		queue.publish(&Envelope::new("t-2", "b")).await.unwrap();

		let handler = Arc::new(SlowHandler {
			started: Notify::new(),
			pause: Duration::from_millis(200),
		});
		let metrics = QueueMetrics::new(&Registry::new()).unwrap();
		let subscription = queue.subscribe("test-0").await.unwrap();
		let worker = Worker::new("test-0", subscription, Arc::clone(&handler), RetryPolicy::default(), metrics.clone());

		let cancel = CancellationToken::new();
		let running = tokio::spawn(worker.run(cancel.clone()));
		handler.started.notified().await;
		cancel.cancel();
		tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();

		assert_eq!(metrics.settled(Disposition::Ack), 1);
		assert_eq!(queue.in_flight_len().await, 0);
		assert_eq!(queue.ready_len().await, 1);
	}

	#[tokio::test]
	async fn test_recovered_delivery_past_budget_is_dead_lettered_unhandled() {
		let queue = InMemoryQueue::new(Duration::from_millis(20));
		let crashed = Envelope::new("t-1", "a").redelivered().redelivered().redelivered();
		queue.publish(&crashed).await.unwrap();
		let handler = Arc::new(FlakyHandler::default());

		let metrics = run_until_drained(&queue, Arc::clone(&handler), RetryPolicy::new(3)).await;

		assert!(handler.handled.lock().await.is_empty());
		assert_eq!(metrics.settled(Disposition::DeadLetter), 1);
		assert_eq!(queue.dead_letters().await[0].attempt, 3);
	}
}
