use crate::store::{StoreError, TaskStatus, TaskStore};
use crate::transcription::{TranscriptionError, Transcriber};
use async_trait::async_trait;
use std::sync::Arc;
use task_queue::{Envelope, EnvelopeHandler};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
	#[error(transparent)]
	Transcription(#[from] TranscriptionError),

	#[error("failed to persist transcript: {0}")]
	Persistence(#[from] StoreError),
}

/// Where one delivery is in its processing.
#[derive(Debug)]
enum Stage {
	Received,
	Transcribing,
	Persisting { transcript: String },
	Done,
}

/// Transcribes the audio named by an envelope and records the result.
///
/// Returning `Ok` lets the worker ack; only then is the envelope gone from
/// the queue. A failed transcription leaves the store untouched.
pub struct TranscriptionHandler {
	store: Arc<dyn TaskStore>,
	transcriber: Arc<dyn Transcriber>,
}

impl TranscriptionHandler {
	#[must_use]
	pub fn new(store: Arc<dyn TaskStore>, transcriber: Arc<dyn Transcriber>) -> Self {
		Self { store, transcriber }
	}

	async fn advance(&self, stage: Stage, envelope: &Envelope) -> Result<Stage, PipelineError> {
		match stage {
			Stage::Received => {
				// Redelivery of work that already finished.
				match self.store.get(&envelope.task_id).await? {
					Some(task) if task.status == TaskStatus::Completed => {
						debug!(task_id = %envelope.task_id, "Task already completed, skipping transcription");
						Ok(Stage::Done)
					}
					_ => Ok(Stage::Transcribing),
				}
			}
			Stage::Transcribing => {
				let transcript = self.transcriber.transcribe(&envelope.audio_ref).await?;
				Ok(Stage::Persisting { transcript })
			}
			Stage::Persisting { transcript } => {
				self.store.complete(&envelope.task_id, &transcript).await?;
				info!(task_id = %envelope.task_id, attempt = envelope.attempt, "Task completed");
				Ok(Stage::Done)
			}
			Stage::Done => Ok(Stage::Done),
		}
	}
}

#[async_trait]
impl EnvelopeHandler for TranscriptionHandler {
	type Error = PipelineError;

	async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
		let mut stage = Stage::Received;
		while !matches!(stage, Stage::Done) {
			stage = self.advance(stage, envelope).await?;
		}
		Ok(())
	}
}
