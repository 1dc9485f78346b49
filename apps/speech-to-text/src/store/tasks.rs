use super::model::{NewTask, Page, PageRequest, Task, TaskStatus};
use super::{schema, StoreError, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct TaskRow {
	task_id: String,
	owner: String,
	audio_ref: String,
	status: String,
	result: Option<String>,
	created_at: i64,
}

impl TryFrom<TaskRow> for Task {
	type Error = StoreError;

	fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
		let status = row.status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?;
		let created_at = DateTime::<Utc>::from_timestamp_micros(row.created_at).ok_or_else(|| StoreError::Corrupt(format!("created_at {} out of range", row.created_at)))?;

		Ok(Self {
			id: row.task_id,
			owner: row.owner,
			audio_ref: row.audio_ref,
			status,
			result: row.result,
			created_at,
		})
	}
}

#[derive(Clone)]
pub struct SqliteTaskStore {
	pub pool: SqlitePool,
}

impl SqliteTaskStore {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	///
	/// # Errors
	/// Returns an error if the schema cannot be created
	pub async fn init_schema(&self) -> Result<(), StoreError> {
		schema::init_schema(&self.pool).await?;
		Ok(())
	}
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
	async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
		// Stored with microsecond precision.
		let created_at = Utc::now().trunc_subsecs(6);

		sqlx::query("INSERT INTO tasks (task_id, owner, audio_ref, status, created_at) VALUES (?, ?, ?, 'pending', ?)")
			.bind(&task.id)
			.bind(&task.owner)
			.bind(&task.audio_ref)
			.bind(created_at.timestamp_micros())
			.execute(&self.pool)
			.await?;

		Ok(Task {
			id: task.id,
			owner: task.owner,
			audio_ref: task.audio_ref,
			status: TaskStatus::Pending,
			result: None,
			created_at,
		})
	}

	async fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
		let row = sqlx::query_as::<_, TaskRow>("SELECT task_id, owner, audio_ref, status, result, created_at FROM tasks WHERE task_id = ?")
			.bind(task_id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(Task::try_from).transpose()
	}

	async fn complete(&self, task_id: &str, result: &str) -> Result<(), StoreError> {
		let updated = sqlx::query("UPDATE tasks SET status = 'completed', result = ? WHERE task_id = ? AND status = 'pending'")
			.bind(result)
			.bind(task_id)
			.execute(&self.pool)
			.await?
			.rows_affected();

		if updated > 0 {
			return Ok(());
		}

		let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE task_id = ?").bind(task_id).fetch_optional(&self.pool).await?;
		match exists {
			Some(_) => {
				tracing::debug!(task_id, "Task already completed, keeping first result");
				Ok(())
			}
			None => Err(StoreError::TaskNotFound(task_id.to_string())),
		}
	}

	async fn list_by_owner(&self, owner: &str, page: PageRequest) -> Result<Page<Task>, StoreError> {
		let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE owner = ?").bind(owner).fetch_one(&self.pool).await?;
		let offset = i64::try_from(page.offset()).map_err(|_| StoreError::Corrupt(format!("page {} is out of range", page.page)))?;

		let rows = sqlx::query_as::<_, TaskRow>(
			r"
            SELECT task_id, owner, audio_ref, status, result, created_at
            FROM tasks
            WHERE owner = ?
            ORDER BY created_at DESC, seq DESC
            LIMIT ? OFFSET ?
            ",
		)
		.bind(owner)
		.bind(i64::from(page.page_size))
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;

		let items = rows.into_iter().map(Task::try_from).collect::<Result<Vec<_>, _>>()?;
		Ok(Page::new(items, page, u64::try_from(total).unwrap_or_default()))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}
}
