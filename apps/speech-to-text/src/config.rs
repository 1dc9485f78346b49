use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;
use task_queue::{QueueConfig, FALLBACK_CONSUMER_NAME};

#[derive(Parser, Debug, Clone)]
#[command(name = "speech-to-text")]
#[command(about = "Accepts audio references and transcribes them in the background", long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Option<Mode>,

	#[command(flatten)]
	pub config: Config,
}

/// Which halves of the service this process runs.
#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
	/// HTTP API only
	Serve,
	/// Queue workers only
	Work,
	/// HTTP API and workers in one process
	#[default]
	All,
}

impl Mode {
	#[must_use]
	pub const fn serves_http(self) -> bool {
		matches!(self, Self::Serve | Self::All)
	}

	#[must_use]
	pub const fn runs_workers(self) -> bool {
		matches!(self, Self::Work | Self::All)
	}
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
	/// Redis lists for the queue and Redis keys for sessions
	Redis,
	/// Process-local queue and sessions; only usable when one process does everything
	Memory,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	#[arg(long, env = "PORT", default_value = "8080")]
	pub port: u16,

	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://speech.db?mode=rwc")]
	pub database_url: String,

	#[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "5")]
	pub database_max_connections: u32,

	#[arg(long, value_enum, env = "BACKEND", default_value = "redis")]
	pub backend: Backend,

	#[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
	pub redis_url: String,

	#[arg(long = "session-ttl-secs", env = "SESSION_TTL_SECS", default_value = "86400", value_parser = parse_duration)]
	pub session_ttl: Duration,

	#[arg(long = "request-timeout-secs", env = "REQUEST_TIMEOUT_SECS", default_value = "30", value_parser = parse_duration)]
	pub request_timeout: Duration,

	#[arg(long, env = "LOG_JSON")]
	pub log_json: bool,

	#[arg(long, env = "RUST_LOG", default_value = "info,speech_to_text=debug,task_queue=debug")]
	pub rust_log: Option<String>,

	#[command(flatten)]
	pub deepgram: DeepgramConfig,

	#[command(flatten)]
	pub queue: QueueConfig,
}

#[derive(Args, Debug, Clone)]
pub struct DeepgramConfig {
	#[arg(long, env = "DEEPGRAM_API_KEY", hide_env_values = true)]
	pub deepgram_api_key: Option<String>,

	#[arg(long, env = "DEEPGRAM_URL", default_value = "https://api.deepgram.com/v1/listen")]
	pub deepgram_url: String,

	#[arg(long, env = "DEEPGRAM_MODEL", default_value = "nova-2")]
	pub deepgram_model: String,

	#[arg(long, env = "DEEPGRAM_LANGUAGE", default_value = "ru")]
	pub deepgram_language: String,

	#[arg(long = "transcription-timeout-secs", env = "TRANSCRIPTION_TIMEOUT_SECS", default_value = "120", value_parser = parse_duration)]
	pub transcription_timeout: Duration,
}

impl Config {
	#[must_use]
	pub fn bind_address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	/// Validate configuration values for the given run mode
	///
	/// # Errors
	/// Returns a description of the first invalid setting.
	pub fn validate(&self, mode: Mode) -> Result<(), String> {
		self.queue.validate()?;

		if self.database_max_connections == 0 {
			return Err("database_max_connections must be at least 1".to_string());
		}

		if self.session_ttl.is_zero() {
			return Err("session_ttl must be greater than 0".to_string());
		}

		if self.request_timeout.is_zero() {
			return Err("request_timeout must be greater than 0".to_string());
		}

		if self.backend == Backend::Memory && mode != Mode::All {
			return Err("the memory backend only works when one process serves and works (mode `all`)".to_string());
		}

		if mode.runs_workers() {
			if self.backend == Backend::Redis && self.queue.consumer_name == FALLBACK_CONSUMER_NAME {
				return Err("could not derive a consumer name from the host name; set --consumer-name to a name unique to this process".to_string());
			}

			if self.deepgram.deepgram_api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
				return Err("deepgram_api_key is required to run workers".to_string());
			}

			if self.deepgram.transcription_timeout.is_zero() {
				return Err("transcription_timeout must be greater than 0".to_string());
			}
		}

		Ok(())
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}
