use crate::config::Config;
use crate::AppState;
use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, Response, StatusCode};
use axum::middleware::Next;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::str::FromStr;
use std::time::Instant;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Installs the global subscriber: JSON lines with `--log-json`, pretty
/// output otherwise.
///
/// # Errors
/// Returns an error if the filter does not parse or a subscriber is already set
pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
	let filter = EnvFilter::from_str(config.rust_log.as_deref().unwrap_or("info"))?;

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().event_format(tracing_subscriber::fmt::format().pretty()).with_filter(filter))
		})
		.try_init()?;

	Ok(())
}

#[derive(Clone)]
pub struct HttpMetrics {
	requests_total: IntCounterVec,
	request_duration: HistogramVec,
}

impl HttpMetrics {
	///
	/// # Errors
	/// Returns an error if the metrics are already registered
	pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
		let requests_total = IntCounterVec::new(Opts::new("http_requests_total", "Total number of HTTP requests"), &["method", "route", "status"])?;
		let request_duration = HistogramVec::new(HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds"), &["method", "route"])?;

		registry.register(Box::new(requests_total.clone()))?;
		registry.register(Box::new(request_duration.clone()))?;

		Ok(Self { requests_total, request_duration })
	}
}

/// Middleware for Prometheus metrics collection
pub async fn metrics_middleware(State(metrics): State<HttpMetrics>, req: Request<Body>, next: Next) -> Response<Body> {
	let method = req.method().to_string();
	// Route templates keep label cardinality bounded.
	let route = req.extensions().get::<MatchedPath>().map_or_else(|| "unmatched".to_string(), |path| path.as_str().to_string());

	let start = Instant::now();
	let response = next.run(req).await;
	let duration = start.elapsed().as_secs_f64();

	let status = response.status().as_u16().to_string();
	metrics.requests_total.with_label_values(&[&method, &route, &status]).inc();
	metrics.request_duration.with_label_values(&[&method, &route]).observe(duration);

	response
}

/// Prometheus metrics handler
///
/// # Errors
/// Returns 500 if the registry cannot be encoded
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
	let encoder = TextEncoder::new();
	let metric_families = state.registry.gather();
	let mut buffer = Vec::new();

	if encoder.encode(&metric_families, &mut buffer).is_err() {
		return Err(StatusCode::INTERNAL_SERVER_ERROR);
	}

	String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
