use crate::config::DeepgramConfig;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

#[derive(thiserror::Error, Debug)]
pub enum TranscriptionError {
	#[error("transcription request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("transcription service answered {status}: {body}")]
	Status { status: u16, body: String },

	#[error("transcription response is malformed: {0}")]
	MalformedResponse(String),

	#[error("transcription came back empty")]
	EmptyTranscript,

	#[error("transcription client is not configured: {0}")]
	NotConfigured(String),
}

/// Turns an audio reference into text.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
	async fn transcribe(&self, audio_ref: &str) -> Result<String, TranscriptionError>;
}

#[derive(Deserialize)]
struct ListenResponse {
	results: ListenResults,
}

#[derive(Deserialize)]
struct ListenResults {
	channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
	alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
	transcript: String,
}

/// First alternative of the first channel of a pre-recorded response.
fn extract_transcript(body: &str) -> Result<String, TranscriptionError> {
	let response: ListenResponse = serde_json::from_str(body).map_err(|e| TranscriptionError::MalformedResponse(e.to_string()))?;

	let transcript = response
		.results
		.channels
		.into_iter()
		.next()
		.and_then(|channel| channel.alternatives.into_iter().next())
		.map(|alternative| alternative.transcript)
		.ok_or_else(|| TranscriptionError::MalformedResponse("no channels or alternatives".to_string()))?;

	if transcript.trim().is_empty() {
		return Err(TranscriptionError::EmptyTranscript);
	}
	Ok(transcript)
}

/// Deepgram pre-recorded transcription of audio reachable by URL.
pub struct DeepgramTranscriber {
	client: reqwest::Client,
	url: String,
	api_key: String,
	model: String,
	language: String,
}

impl DeepgramTranscriber {
	///
	/// # Errors
	/// This function returns an error if:
	/// - No api key is configured
	/// - The http client cannot be built
	pub fn new(config: &DeepgramConfig) -> Result<Self, TranscriptionError> {
		let api_key = config
			.deepgram_api_key
			.clone()
			.filter(|key| !key.trim().is_empty())
			.ok_or_else(|| TranscriptionError::NotConfigured("missing api key".to_string()))?;

		let client = reqwest::Client::builder().timeout(config.transcription_timeout).build()?;

		Ok(Self {
			client,
			url: config.deepgram_url.clone(),
			api_key,
			model: config.deepgram_model.clone(),
			language: config.deepgram_language.clone(),
		})
	}
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
	#[instrument(skip(self), fields(model = %self.model, language = %self.language))]
	async fn transcribe(&self, audio_ref: &str) -> Result<String, TranscriptionError> {
		let response = self
			.client
			.post(&self.url)
			.query(&[("model", self.model.as_str()), ("language", self.language.as_str())])
			.header(AUTHORIZATION, format!("Token {}", self.api_key))
			.json(&json!({ "url": audio_ref }))
			.send()
			.await?;

		let status = response.status();
		let body = response.text().await?;
		if !status.is_success() {
			return Err(TranscriptionError::Status { status: status.as_u16(), body });
		}

		let transcript = extract_transcript(&body)?;
		debug!(chars = transcript.len(), "Transcription received");
		Ok(transcript)
	}
}
