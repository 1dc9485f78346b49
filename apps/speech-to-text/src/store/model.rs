use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	Pending,
	Completed,
}

impl TaskStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Completed => "completed",
		}
	}
}

impl fmt::Display for TaskStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TaskStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"completed" => Ok(Self::Completed),
			other => Err(format!("unknown task status `{other}`")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
	pub id: String,
	pub owner: String,
	pub audio_ref: String,
	pub status: TaskStatus,
	pub result: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
	pub id: String,
	pub owner: String,
	pub audio_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
	pub page: u32,
	pub page_size: u32,
}

impl PageRequest {
	pub const DEFAULT_PAGE: u32 = 1;
	pub const DEFAULT_PAGE_SIZE: u32 = 10;
	pub const MAX_PAGE_SIZE: u32 = 100;

	/// Builds a request from raw query values. Anything missing, unparsable
	/// or out of range falls back to the default instead of failing.
	#[must_use]
	pub fn lenient(page: Option<&str>, page_size: Option<&str>) -> Self {
		let page = page.and_then(|p| p.trim().parse::<u32>().ok()).filter(|p| *p >= 1).unwrap_or(Self::DEFAULT_PAGE);
		let page_size = page_size
			.and_then(|s| s.trim().parse::<u32>().ok())
			.filter(|s| (1..=Self::MAX_PAGE_SIZE).contains(s))
			.unwrap_or(Self::DEFAULT_PAGE_SIZE);

		Self { page, page_size }
	}

	#[must_use]
	pub const fn offset(&self) -> u64 {
		(self.page as u64 - 1) * self.page_size as u64
	}
}

impl Default for PageRequest {
	fn default() -> Self {
		Self {
			page: Self::DEFAULT_PAGE,
			page_size: Self::DEFAULT_PAGE_SIZE,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
	pub page: u32,
	pub page_size: u32,
	pub total: u64,
	pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
	pub items: Vec<T>,
	pub pagination: Pagination,
}

impl<T> Page<T> {
	#[must_use]
	pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
		Self {
			items,
			pagination: Pagination {
				page: request.page,
				page_size: request.page_size,
				total,
				total_pages: total.div_ceil(u64::from(request.page_size)),
			},
		}
	}

	#[must_use]
	pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
		Page {
			items: self.items.into_iter().map(f).collect(),
			pagination: self.pagination,
		}
	}
}
