use crate::envelope::Envelope;
use crate::error::{QueueError, Result};
use crate::transport::{Acknowledger, Delivery, Publisher, QueueTransport, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

#[derive(Default)]
struct State {
	ready: VecDeque<String>,
	in_flight: HashMap<u64, InFlight>,
	dead: Vec<String>,
	next_tag: u64,
}

struct InFlight {
	consumer_id: String,
	payload: String,
}

struct Shared {
	state: Mutex<State>,
	notify: Notify,
}

/// Process-local queue with the same settlement semantics as the Redis
/// transport. Nothing survives a restart, so it is only meant for tests
/// and single-process deployments.
#[derive(Clone)]
pub struct InMemoryQueue {
	shared: Arc<Shared>,
	poll_timeout: Duration,
}

impl InMemoryQueue {
	#[must_use]
	pub fn new(poll_timeout: Duration) -> Self {
		Self {
			shared: Arc::new(Shared {
				state: Mutex::new(State::default()),
				notify: Notify::new(),
			}),
			poll_timeout,
		}
	}

	pub async fn ready_len(&self) -> usize {
		self.shared.state.lock().await.ready.len()
	}

	pub async fn in_flight_len(&self) -> usize {
		self.shared.state.lock().await.in_flight.len()
	}

	/// Decoded dead-lettered envelopes, oldest first. Payloads that never
	/// decoded are skipped.
	pub async fn dead_letters(&self) -> Vec<Envelope> {
		let state = self.shared.state.lock().await;
		state.dead.iter().filter_map(|payload| Envelope::decode(payload).ok()).collect()
	}

	/// Pushes a raw payload, bypassing envelope encoding.
	pub async fn publish_raw(&self, payload: impl Into<String>) {
		self.shared.state.lock().await.ready.push_back(payload.into());
		self.shared.notify.notify_one();
	}
}

impl Default for InMemoryQueue {
	fn default() -> Self {
		Self::new(Duration::from_secs(1))
	}
}

#[async_trait]
impl Publisher for InMemoryQueue {
	async fn publish(&self, envelope: &Envelope) -> Result<()> {
		let payload = envelope.encode()?;
		self.publish_raw(payload).await;
		Ok(())
	}
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
	type Subscription = InMemorySubscription;

	async fn subscribe(&self, consumer_id: &str) -> Result<InMemorySubscription> {
		let mut subscription = InMemorySubscription {
			shared: Arc::clone(&self.shared),
			consumer_id: consumer_id.to_string(),
			poll_timeout: self.poll_timeout,
		};
		subscription.recover().await?;
		Ok(subscription)
	}
}

pub struct InMemorySubscription {
	shared: Arc<Shared>,
	consumer_id: String,
	poll_timeout: Duration,
}

#[async_trait]
impl Subscription for InMemorySubscription {
	async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
		let deadline = Instant::now() + self.poll_timeout;

		loop {
			let notified = self.shared.notify.notified();
			{
				let mut state = self.shared.state.lock().await;
				while let Some(payload) = state.ready.pop_front() {
					match Envelope::decode(&payload) {
						Ok(envelope) => {
							let tag = state.next_tag;
							state.next_tag += 1;
							state.in_flight.insert(
								tag,
								InFlight {
									consumer_id: self.consumer_id.clone(),
									payload,
								},
							);
							let acker = InMemoryAcker {
								shared: Arc::clone(&self.shared),
								tag,
							};
							return Ok(Some(Delivery::new(envelope, Box::new(acker))));
						}
						Err(e) => {
							warn!("Dead-lettering undecodable payload: {e}");
							state.dead.push(payload);
						}
					}
				}
			}

			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return Ok(None);
			}
		}
	}

	async fn recover(&mut self) -> Result<usize> {
		let mut state = self.shared.state.lock().await;
		let mut orphaned: Vec<u64> = state.in_flight.iter().filter(|(_, entry)| entry.consumer_id == self.consumer_id).map(|(tag, _)| *tag).collect();
		orphaned.sort_unstable_by(|a, b| b.cmp(a));

		for tag in &orphaned {
			if let Some(entry) = state.in_flight.remove(tag) {
				match Envelope::decode(&entry.payload).and_then(|envelope| envelope.redelivered().encode()) {
					Ok(next) => state.ready.push_front(next),
					Err(e) => {
						warn!("Dead-lettering undecodable payload: {e}");
						state.dead.push(entry.payload);
					}
				}
			}
		}
		drop(state);

		if !orphaned.is_empty() {
			warn!("Recovered {} unsettled deliveries for consumer {}", orphaned.len(), self.consumer_id);
			self.shared.notify.notify_waiters();
		}
		Ok(orphaned.len())
	}
}

struct InMemoryAcker {
	shared: Arc<Shared>,
	tag: u64,
}

impl InMemoryAcker {
	async fn settle(&self, settle: impl FnOnce(&mut State, String) + Send) -> Result<()> {
		let mut state = self.shared.state.lock().await;
		let entry = state.in_flight.remove(&self.tag).ok_or(QueueError::UnknownDelivery(self.tag))?;
		settle(&mut state, entry.payload);
		Ok(())
	}
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
	async fn ack(&self) -> Result<()> {
		self.settle(|_, _| {}).await
	}

	async fn requeue(&self, next: &Envelope) -> Result<()> {
		let next = next.encode()?;
		self.settle(|state, _| state.ready.push_back(next)).await?;
		self.shared.notify.notify_one();
		Ok(())
	}

	async fn dead_letter(&self) -> Result<()> {
		self.settle(|state, payload| state.dead.push(payload)).await
	}
}
