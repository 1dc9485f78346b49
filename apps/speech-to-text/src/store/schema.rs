use sqlx::{Error, SqlitePool};

/// Creates the task and user tables if they do not exist yet.
///
/// # Errors
/// Returns an error if a DDL statement fails
pub async fn init_schema(pool: &SqlitePool) -> Result<(), Error> {
	sqlx::query(
		r"
        CREATE TABLE IF NOT EXISTS tasks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL UNIQUE,
            owner TEXT NOT NULL,
            audio_ref TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'completed')),
            result TEXT,
            created_at INTEGER NOT NULL,
            CHECK ((status = 'completed') = (result IS NOT NULL))
        )
        ",
	)
	.execute(pool)
	.await?;

	sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner, created_at DESC)")
		.execute(pool)
		.await?;

	sqlx::query(
		r"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        ",
	)
	.execute(pool)
	.await?;

	Ok(())
}
