use std::num::NonZeroU32;

/// What to do with a delivery once its handler has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
	/// Processing succeeded: remove the envelope from the queue.
	Ack,
	/// Processing failed: put the envelope back for redelivery.
	Requeue,
	/// Processing failed and the delivery budget is spent.
	DeadLetter,
}

impl Disposition {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Ack => "ack",
			Self::Requeue => "requeue",
			Self::DeadLetter => "dead_letter",
		}
	}
}

/// Bounds how many times one envelope is delivered before it is parked in
/// the dead-letter queue. `max_deliveries = 0` keeps requeueing forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	max_deliveries: Option<NonZeroU32>,
}

impl RetryPolicy {
	#[must_use]
	pub const fn new(max_deliveries: u32) -> Self {
		Self {
			max_deliveries: NonZeroU32::new(max_deliveries),
		}
	}

	/// True once an envelope on delivery `attempt` has used up its budget
	/// without ever reporting a failure, which is what a delivery that
	/// keeps killing its worker looks like after recovery.
	#[must_use]
	pub const fn exhausted(&self, attempt: u32) -> bool {
		match self.max_deliveries {
			Some(max) => attempt >= max.get(),
			None => false,
		}
	}

	/// `attempt` is the zero-based delivery number carried by the envelope.
	/// The failure cause is deliberately not an input.
	#[must_use]
	pub fn decide(&self, attempt: u32, succeeded: bool) -> Disposition {
		if succeeded {
			return Disposition::Ack;
		}

		match self.max_deliveries {
			Some(max) if attempt.saturating_add(1) >= max.get() => Disposition::DeadLetter,
			_ => Disposition::Requeue,
		}
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(5)
	}
}
