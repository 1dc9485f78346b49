use crate::envelope::Envelope;
use crate::error::Result;
use crate::policy::Disposition;
use async_trait::async_trait;

/// Producer half of a queue. Publishing returns once the broker holds the
/// envelope durably enough to survive this process going away.
#[async_trait]
pub trait Publisher: Send + Sync {
	async fn publish(&self, envelope: &Envelope) -> Result<()>;
}

/// Settles one in-flight delivery. Exactly one of these is called per
/// delivery; `Delivery` enforces that by consuming itself.
#[async_trait]
pub trait Acknowledger: Send + Sync {
	async fn ack(&self) -> Result<()>;

	/// Return the delivery to the queue as `next`, which carries the bumped
	/// attempt counter.
	async fn requeue(&self, next: &Envelope) -> Result<()>;

	async fn dead_letter(&self) -> Result<()>;
}

/// Consumer half of a queue, bound to a single consumer id.
#[async_trait]
pub trait Subscription: Send + 'static {
	/// Waits up to the configured poll timeout for the next envelope.
	/// `Ok(None)` means the queue was idle for the whole wait.
	async fn next_delivery(&mut self) -> Result<Option<Delivery>>;

	/// Puts every delivery this consumer took but never settled back at the
	/// head of the queue with its attempt counter bumped, and returns how
	/// many were moved. Only call it while none of this consumer's
	/// deliveries are being processed.
	async fn recover(&mut self) -> Result<usize>;
}

#[async_trait]
pub trait QueueTransport: Publisher + Clone + 'static {
	type Subscription: Subscription;

	/// Opens a consumer. Deliveries a previous holder of `consumer_id` took
	/// but never settled are recovered first.
	async fn subscribe(&self, consumer_id: &str) -> Result<Self::Subscription>;
}

pub struct Delivery {
	envelope: Envelope,
	acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Delivery").field("envelope", &self.envelope).finish_non_exhaustive()
	}
}

impl Delivery {
	#[must_use]
	pub fn new(envelope: Envelope, acker: Box<dyn Acknowledger>) -> Self {
		Self { envelope, acker }
	}

	#[must_use]
	pub const fn envelope(&self) -> &Envelope {
		&self.envelope
	}

	#[must_use]
	pub const fn attempt(&self) -> u32 {
		self.envelope.attempt
	}

	///
	/// # Errors
	/// Returns an error if the broker rejects the acknowledgment
	pub async fn ack(self) -> Result<()> {
		self.acker.ack().await
	}

	/// Negative acknowledgment. With `requeue` the envelope goes back to the
	/// ready queue, otherwise it is parked in the dead-letter queue.
	///
	/// # Errors
	/// Returns an error if the broker rejects the acknowledgment
	pub async fn nack(self, requeue: bool) -> Result<()> {
		if requeue {
			let next = self.envelope.redelivered();
			self.acker.requeue(&next).await
		} else {
			self.acker.dead_letter().await
		}
	}

	///
	/// # Errors
	/// Returns an error if the broker rejects the acknowledgment
	pub async fn settle(self, disposition: Disposition) -> Result<()> {
		match disposition {
			Disposition::Ack => self.ack().await,
			Disposition::Requeue => self.nack(true).await,
			Disposition::DeadLetter => self.nack(false).await,
		}
	}
}
