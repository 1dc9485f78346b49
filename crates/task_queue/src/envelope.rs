use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};

/// The unit carried by the queue: enough to process one task without
/// reading the task store first.
///
/// Wire format is JSON `{"task_id": "...", "audio_ref": "..."}`. The
/// `attempt` counter is only written once an envelope has been requeued,
/// so first deliveries stay in the plain two-field shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
	pub task_id: String,
	pub audio_ref: String,
	#[serde(default, skip_serializing_if = "is_first_attempt")]
	pub attempt: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_first_attempt(attempt: &u32) -> bool {
	*attempt == 0
}

impl Envelope {
	#[must_use]
	pub fn new(task_id: impl Into<String>, audio_ref: impl Into<String>) -> Self {
		Self {
			task_id: task_id.into(),
			audio_ref: audio_ref.into(),
			attempt: 0,
		}
	}

	/// The same envelope as it will look on its next delivery.
	#[must_use]
	pub fn redelivered(&self) -> Self {
		Self {
			attempt: self.attempt.saturating_add(1),
			..self.clone()
		}
	}

	///
	/// # Errors
	/// Returns an error if the envelope is missing a task id or serialization fails
	pub fn encode(&self) -> Result<String> {
		if self.task_id.is_empty() {
			return Err(QueueError::InvalidEnvelope("task_id is empty".to_string()));
		}
		Ok(serde_json::to_string(self)?)
	}

	///
	/// # Errors
	/// Returns an error if the payload is not a valid envelope
	pub fn decode(payload: &str) -> Result<Self> {
		let envelope: Self = serde_json::from_str(payload)?;
		if envelope.task_id.is_empty() {
			return Err(QueueError::InvalidEnvelope("task_id is empty".to_string()));
		}
		Ok(envelope)
	}
}
