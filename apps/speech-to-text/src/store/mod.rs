pub mod model;
pub mod schema;
pub mod tasks;
pub mod users;

pub use model::*;
pub use tasks::SqliteTaskStore;
pub use users::UserRepository;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("task {0} does not exist")]
	TaskNotFound(String),

	#[error("user {0} already exists")]
	UserExists(String),

	#[error("stored row is invalid: {0}")]
	Corrupt(String),
}

/// Durable record of every task. Completion is the only mutation after
/// creation, and `owner` and `audio_ref` never change.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
	async fn create(&self, task: NewTask) -> Result<Task, StoreError>;

	async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

	/// Marks the task completed with `result`. Completing an already
	/// completed task is a no-op that keeps the first result.
	async fn complete(&self, task_id: &str, result: &str) -> Result<(), StoreError>;

	/// Tasks owned by `owner`, newest first.
	async fn list_by_owner(&self, owner: &str, page: PageRequest) -> Result<Page<Task>, StoreError>;

	async fn ping(&self) -> Result<(), StoreError>;
}
