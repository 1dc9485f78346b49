use crate::auth::Owner;
use crate::error::AppError;
use crate::store::{NewTask, TaskStore};
use std::sync::Arc;
use task_queue::{Envelope, Publisher};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Accepts audio for transcription: records a pending task, then hands an
/// envelope to the queue.
#[derive(Clone)]
pub struct TaskSubmission {
	store: Arc<dyn TaskStore>,
	publisher: Arc<dyn Publisher>,
}

impl TaskSubmission {
	#[must_use]
	pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<dyn Publisher>) -> Self {
		Self { store, publisher }
	}

	/// Returns the new task id as soon as the envelope is with the broker.
	///
	/// The task row is written before publishing, so a worker never sees an
	/// envelope for a task that does not exist yet. If publishing fails the
	/// task is left `pending` and the error goes back to the caller.
	///
	/// # Errors
	/// - `Validation` for an empty audio reference, with nothing written
	/// - `Store` or `Queue` when persisting or publishing fails
	#[instrument(skip(self, owner), fields(owner = %owner.as_str()))]
	pub async fn submit(&self, owner: &Owner, audio_ref: &str) -> Result<String, AppError> {
		let audio_ref = audio_ref.trim();
		if audio_ref.is_empty() {
			return Err(AppError::validation("audio reference must not be empty"));
		}

		let task = self
			.store
			.create(NewTask {
				id: Uuid::new_v4().to_string(),
				owner: owner.as_str().to_string(),
				audio_ref: audio_ref.to_string(),
			})
			.await?;

		if let Err(e) = self.publisher.publish(&Envelope::new(task.id.clone(), task.audio_ref.clone())).await {
			error!(task_id = %task.id, "Task stored but not queued: {e}");
			return Err(e.into());
		}

		info!(task_id = %task.id, "Task submitted");
		Ok(task.id)
	}
}
