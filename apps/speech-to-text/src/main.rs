use anyhow::Result;
use clap::Parser;
use speech_to_text::app::{self, Components};
use speech_to_text::observability::init_tracing;
use speech_to_text::Cli;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();

	let cli = Cli::parse();
	let mode = cli.command.unwrap_or_default();
	let config = cli.config;
	config.validate(mode).map_err(anyhow::Error::msg)?;

	init_tracing(&config)?;
	info!(?mode, backend = ?config.backend, queue = %config.queue.queue_name, "Starting speech-to-text");

	let components = Components::build(&config, mode).await?;
	let shutdown_token = CancellationToken::new();

	let signal_token = shutdown_token.clone();
	tokio::spawn(async move {
		app::wait_for_shutdown_signal().await;
		info!("Shutdown signal received, finishing in-flight work");
		signal_token.cancel();
	});

	app::run(&config, mode, components, shutdown_token).await?;
	info!("Stopped");
	Ok(())
}
