use super::StoreError;
use chrono::Utc;
use sqlx::SqlitePool;

/// Account records. Only the salted password hash is stored.
#[derive(Clone)]
pub struct UserRepository {
	pub pool: SqlitePool,
}

impl UserRepository {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	///
	/// # Errors
	/// Returns `StoreError::UserExists` if the username is taken, or a database error
	pub async fn create(&self, username: &str, password_hash: &str) -> Result<(), StoreError> {
		let inserted = sqlx::query("INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?) ON CONFLICT(username) DO NOTHING")
			.bind(username)
			.bind(password_hash)
			.bind(Utc::now().timestamp_micros())
			.execute(&self.pool)
			.await?
			.rows_affected();

		if inserted == 0 {
			return Err(StoreError::UserExists(username.to_string()));
		}
		Ok(())
	}

	/// The stored hash, or `None` for an unknown username.
	///
	/// # Errors
	/// Returns an error if the query fails
	pub async fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
		let hash = sqlx::query_scalar("SELECT password_hash FROM users WHERE username = ?").bind(username).fetch_optional(&self.pool).await?;
		Ok(hash)
	}
}
