use crate::policy::RetryPolicy;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
	#[arg(long, env = "QUEUE_NAME", default_value = "speech.tasks", help = "Name of the task queue")]
	pub queue_name: String,

	#[arg(
        long,
        env = "WORKER_CONSUMER_NAME",
        default_value_t = default_consumer_name(),
        help = "Stable consumer name; must be unique per running process (defaults to worker@<hostname>)"
    )]
	pub consumer_name: String,

	#[arg(long, env = "WORKER_CONCURRENCY", default_value = "4", help = "Number of workers pulling from the queue")]
	pub worker_concurrency: usize,

	#[arg(
        long = "max-deliveries",
        env = "MAX_DELIVERIES",
        default_value = "5",
        help = "Deliveries before an envelope is dead-lettered (0 retries forever)"
    )]
	pub max_deliveries: u32,

	#[arg(
        long = "poll-timeout-secs",
        env = "QUEUE_POLL_TIMEOUT_SECS",
        default_value = "1",
        value_parser = parse_duration,
        help = "How long a consumer blocks waiting for the next envelope"
    )]
	pub poll_timeout: Duration,

	#[arg(
        long = "error-backoff-secs",
        env = "QUEUE_ERROR_BACKOFF_SECS",
        default_value = "2",
        value_parser = parse_duration,
        help = "Pause after a transport error before polling again"
    )]
	pub error_backoff: Duration,
}

impl QueueConfig {
	#[must_use]
	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::new(self.max_deliveries)
	}

	/// # Errors
	/// Returns a description of the first invalid setting.
	pub fn validate(&self) -> Result<(), String> {
		if self.queue_name.trim().is_empty() {
			return Err("queue_name must not be empty".to_string());
		}

		if self.consumer_name.trim().is_empty() {
			return Err("consumer_name must not be empty".to_string());
		}

		if self.worker_concurrency == 0 {
			return Err("worker_concurrency must be at least 1".to_string());
		}

		if self.poll_timeout.is_zero() {
			return Err("poll_timeout must be greater than 0".to_string());
		}

		Ok(())
	}
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			queue_name: "speech.tasks".to_string(),
			consumer_name: default_consumer_name(),
			worker_concurrency: 4,
			max_deliveries: 5,
			poll_timeout: Duration::from_secs(1),
			error_backoff: Duration::from_secs(2),
		}
	}
}

/// Consumer name used when the host name cannot be found. Two processes
/// sharing it also share processing lists and recover each other's work.
pub const FALLBACK_CONSUMER_NAME: &str = "worker";

/// `worker@<hostname>`, so processes on different hosts never share a
/// processing list, and a restarted process finds its own leftovers.
#[must_use]
pub fn default_consumer_name() -> String {
	std::env::var("HOSTNAME")
		.ok()
		.or_else(|| std::fs::read_to_string("/etc/hostname").ok())
		.map(|host| host.trim().to_string())
		.filter(|host| !host.is_empty())
		.map_or_else(|| FALLBACK_CONSUMER_NAME.to_string(), |host| format!("{FALLBACK_CONSUMER_NAME}@{host}"))
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[derive(Parser)]
	struct TestCli {
		#[command(flatten)]
		queue: QueueConfig,
	}

	#[test]
	fn test_default_config() {
		let config = QueueConfig::default();
		assert_eq!(config.queue_name, "speech.tasks");
		assert_eq!(config.worker_concurrency, 4);
		assert_eq!(config.max_deliveries, 5);
		assert_eq!(config.poll_timeout, Duration::from_secs(1));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_default_consumer_name_is_never_blank() {
		let name = default_consumer_name();
		assert!(name == FALLBACK_CONSUMER_NAME || name.starts_with("worker@"));
		assert_eq!(QueueConfig::default().consumer_name, name);
	}

	#[test]
	fn test_parse_duration() {
		assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
		assert!(parse_duration("invalid").is_err());
	}

	#[test]
	fn test_config_parser() {
		let args = vec![
			"program",
			"--queue-name",
			"audio",
			"--worker-concurrency",
			"8",
			"--max-deliveries",
			"0",
			"--poll-timeout-secs",
			"3",
			"--error-backoff-secs",
			"5",
		];

		let cli = TestCli::try_parse_from(args).unwrap();
		assert_eq!(cli.queue.queue_name, "audio");
		assert_eq!(cli.queue.worker_concurrency, 8);
		assert_eq!(cli.queue.max_deliveries, 0);
		assert_eq!(cli.queue.poll_timeout, Duration::from_secs(3));
		assert_eq!(cli.queue.error_backoff, Duration::from_secs(5));
		assert!(!cli.queue.retry_policy().exhausted(u32::MAX));
	}

	#[test]
	fn test_validate_rejects_zero_workers() {
		let config = QueueConfig {
			worker_concurrency: 0,
			..QueueConfig::default()
		};
		assert!(config.validate().is_err());
	}
}
