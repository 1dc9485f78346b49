use crate::error::Result;
use crate::policy::Disposition;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

#[derive(Clone, Debug)]
pub struct QueueMetrics {
	// Delivery metrics
	pub deliveries_total: IntCounterVec,
	pub in_flight: IntGauge,
	pub processing_duration: Histogram,

	// Worker metrics
	pub active_workers: IntGauge,
	pub transport_errors_total: IntCounter,
	pub settle_errors_total: IntCounter,
	pub recovered_total: IntCounter,
}

impl QueueMetrics {
	///
	/// # Errors
	/// Returns an error if a metric with the same name is already registered
	pub fn new(registry: &Registry) -> Result<Self> {
		let deliveries_total = IntCounterVec::new(Opts::new("queue_deliveries_total", "Deliveries settled by workers, by outcome"), &["outcome"])?;
		let in_flight = IntGauge::new("queue_deliveries_in_flight", "Deliveries currently being processed")?;
		let processing_duration = Histogram::with_opts(
			HistogramOpts::new("queue_processing_duration_seconds", "Time spent handling one delivery").buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
		)?;
		let active_workers = IntGauge::new("queue_active_workers", "Workers currently consuming")?;
		let transport_errors_total = IntCounter::new("queue_transport_errors_total", "Errors returned while waiting for deliveries")?;
		let settle_errors_total = IntCounter::new("queue_settle_errors_total", "Failed ack or nack calls")?;
		let recovered_total = IntCounter::new("queue_recovered_deliveries_total", "Unsettled deliveries put back on the queue")?;

		registry.register(Box::new(deliveries_total.clone()))?;
		registry.register(Box::new(in_flight.clone()))?;
		registry.register(Box::new(processing_duration.clone()))?;
		registry.register(Box::new(active_workers.clone()))?;
		registry.register(Box::new(transport_errors_total.clone()))?;
		registry.register(Box::new(settle_errors_total.clone()))?;
		registry.register(Box::new(recovered_total.clone()))?;

		Ok(Self {
			deliveries_total,
			in_flight,
			processing_duration,
			active_workers,
			transport_errors_total,
			settle_errors_total,
			recovered_total,
		})
	}

	pub fn record(&self, disposition: Disposition) {
		self.deliveries_total.with_label_values(&[disposition.as_str()]).inc();
	}

	#[must_use]
	pub fn settled(&self, disposition: Disposition) -> u64 {
		self.deliveries_total.with_label_values(&[disposition.as_str()]).get()
	}
}
