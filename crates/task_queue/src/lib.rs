//! At-least-once delivery of task envelopes.
//!
//! Producers publish [`Envelope`]s; workers pull them through a
//! [`Subscription`] and settle every [`Delivery`] explicitly with an ack or
//! a nack. A delivery that is never settled, because the consumer crashed
//! or lost its connection, is handed out again.

pub mod config;
pub mod envelope;
pub mod error;
pub mod inmem;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod redis_queue;
pub mod transport;
pub mod worker;

pub use config::{QueueConfig, FALLBACK_CONSUMER_NAME};
pub use envelope::Envelope;
pub use error::{QueueError, Result};
pub use inmem::InMemoryQueue;
pub use metrics::QueueMetrics;
pub use policy::{Disposition, RetryPolicy};
pub use pool::WorkerPool;
pub use redis_queue::RedisQueue;
pub use transport::{Acknowledger, Delivery, Publisher, QueueTransport, Subscription};
pub use worker::{EnvelopeHandler, Worker};
