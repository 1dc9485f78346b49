use crate::auth::Owner;
use crate::error::AppError;
use crate::store::{Page, PageRequest, Task, TaskStatus, TaskStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
	Pending,
	Completed(String),
}

/// What a task listing shows for each entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
	pub task_id: String,
	pub audio: String,
	pub status: TaskStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl From<Task> for TaskSummary {
	fn from(task: Task) -> Self {
		Self {
			task_id: task.id,
			audio: task.audio_ref,
			status: task.status,
			result: task.result,
			created_at: task.created_at,
		}
	}
}

/// Read-only access to tasks, always on behalf of their owner.
#[derive(Clone)]
pub struct TaskQuery {
	store: Arc<dyn TaskStore>,
}

impl TaskQuery {
	#[must_use]
	pub fn new(store: Arc<dyn TaskStore>) -> Self {
		Self { store }
	}

	async fn owned(&self, owner: &Owner, task_id: &str) -> Result<Task, AppError> {
		let task_id = task_id.trim();
		if task_id.is_empty() {
			return Err(AppError::validation("task_id is required"));
		}

		let task = self.store.get(task_id).await?.ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;
		if task.owner != owner.as_str() {
			return Err(AppError::Forbidden);
		}
		Ok(task)
	}

	///
	/// # Errors
	/// `NotFound` for unknown ids, `Forbidden` when the task belongs to someone else
	pub async fn status(&self, owner: &Owner, task_id: &str) -> Result<TaskStatus, AppError> {
		Ok(self.owned(owner, task_id).await?.status)
	}

	/// A pending task is a normal outcome here, not an error.
	///
	/// # Errors
	/// `NotFound` for unknown ids, `Forbidden` when the task belongs to someone else
	pub async fn result(&self, owner: &Owner, task_id: &str) -> Result<TaskOutcome, AppError> {
		let task = self.owned(owner, task_id).await?;
		match (task.status, task.result) {
			(TaskStatus::Completed, Some(result)) => Ok(TaskOutcome::Completed(result)),
			(TaskStatus::Completed, None) => Err(AppError::Anyhow(anyhow::anyhow!("task {} is completed without a result", task.id))),
			(TaskStatus::Pending, _) => Ok(TaskOutcome::Pending),
		}
	}

	///
	/// # Errors
	/// Returns an error if the store cannot be read
	pub async fn list(&self, owner: &Owner, page: PageRequest) -> Result<Page<TaskSummary>, AppError> {
		let page = self.store.list_by_owner(owner.as_str(), page).await?;
		Ok(page.map(TaskSummary::from))
	}
}
