use crate::config::QueueConfig;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::transport::{Acknowledger, Delivery, Publisher, QueueTransport, Subscription};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncConnectionConfig, Client, Direction};
use std::time::Duration;
use tracing::{debug, info, warn};

// Slack on top of the blocking timeout so the client never gives up on a
// BLMOVE that the server is about to answer.
const RESPONSE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct QueueKeys {
	ready: String,
	dead: String,
}

impl QueueKeys {
	fn new(queue_name: &str) -> Self {
		Self {
			ready: queue_name.to_string(),
			dead: format!("{queue_name}:dead"),
		}
	}

	fn processing(&self, consumer_id: &str) -> String {
		format!("{}:processing:{consumer_id}", self.ready)
	}
}

/// Reliable list-based queue on Redis.
///
/// Consumers atomically move each payload from the ready list into their
/// own processing list and only remove it from there once it is settled,
/// so a consumer that dies mid-task leaves its work recoverable.
#[derive(Clone)]
pub struct RedisQueue {
	client: Client,
	conn: MultiplexedConnection,
	keys: QueueKeys,
	poll_timeout: Duration,
}

impl RedisQueue {
	///
	/// # Errors
	/// This function returns an error if:
	/// - The redis url is invalid
	/// - The initial connection fails
	pub async fn connect(redis_url: &str, config: &QueueConfig) -> Result<Self> {
		let client = Client::open(redis_url)?;
		let conn = client.get_multiplexed_async_connection().await?;
		info!("Connected queue {} to redis", config.queue_name);

		Ok(Self {
			client,
			conn,
			keys: QueueKeys::new(&config.queue_name),
			poll_timeout: config.poll_timeout,
		})
	}
}

#[async_trait]
impl Publisher for RedisQueue {
	async fn publish(&self, envelope: &Envelope) -> Result<()> {
		let payload = envelope.encode()?;
		let mut conn = self.conn.clone();
		let (): () = conn.rpush(&self.keys.ready, payload).await?;
		debug!("Published task {} to {}", envelope.task_id, self.keys.ready);
		Ok(())
	}
}

#[async_trait]
impl QueueTransport for RedisQueue {
	type Subscription = RedisSubscription;

	async fn subscribe(&self, consumer_id: &str) -> Result<RedisSubscription> {
		// BLMOVE parks the whole multiplexed pipeline, so every consumer gets
		// its own connection.
		let config = AsyncConnectionConfig::new().set_response_timeout(self.poll_timeout + RESPONSE_MARGIN);
		let blocking = self.client.get_multiplexed_async_connection_with_config(&config).await?;
		let mut subscription = RedisSubscription {
			blocking,
			conn: self.conn.clone(),
			keys: self.keys.clone(),
			processing: self.keys.processing(consumer_id),
			poll_timeout: self.poll_timeout,
		};
		subscription.recover().await?;
		Ok(subscription)
	}
}

pub struct RedisSubscription {
	blocking: MultiplexedConnection,
	conn: MultiplexedConnection,
	keys: QueueKeys,
	processing: String,
	poll_timeout: Duration,
}

#[async_trait]
impl Subscription for RedisSubscription {
	async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
		let payload: Option<String> = self
			.blocking
			.blmove(&self.keys.ready, &self.processing, Direction::Left, Direction::Right, self.poll_timeout.as_secs_f64())
			.await?;

		let Some(payload) = payload else {
			return Ok(None);
		};

		let acker = RedisAcker {
			conn: self.conn.clone(),
			keys: self.keys.clone(),
			processing: self.processing.clone(),
			payload,
		};

		match Envelope::decode(&acker.payload) {
			Ok(envelope) => Ok(Some(Delivery::new(envelope, Box::new(acker)))),
			Err(e) => {
				warn!("Dead-lettering undecodable payload from {}: {e}", self.keys.ready);
				acker.dead_letter().await?;
				Ok(None)
			}
		}
	}

	async fn recover(&mut self) -> Result<usize> {
		let payloads: Vec<String> = self.conn.lrange(&self.processing, 0, -1).await?;

		// Oldest first; pushing newest first onto the head keeps their order.
		for payload in payloads.iter().rev() {
			let mut pipe = redis::pipe();
			pipe.atomic().lrem(&self.processing, 1, payload).ignore();
			match Envelope::decode(payload) {
				Ok(envelope) => pipe.lpush(&self.keys.ready, envelope.redelivered().encode()?).ignore(),
				Err(e) => {
					warn!("Dead-lettering undecodable payload from {}: {e}", self.processing);
					pipe.rpush(&self.keys.dead, payload).ignore()
				}
			};
			let (): () = pipe.query_async(&mut self.conn).await?;
		}

		if !payloads.is_empty() {
			warn!("Recovered {} unsettled deliveries from {}", payloads.len(), self.processing);
		}
		Ok(payloads.len())
	}
}

struct RedisAcker {
	conn: MultiplexedConnection,
	keys: QueueKeys,
	processing: String,
	payload: String,
}

#[async_trait]
impl Acknowledger for RedisAcker {
	async fn ack(&self) -> Result<()> {
		let mut conn = self.conn.clone();
		let (): () = conn.lrem(&self.processing, 1, &self.payload).await?;
		Ok(())
	}

	async fn requeue(&self, next: &Envelope) -> Result<()> {
		let next = next.encode()?;
		let mut conn = self.conn.clone();
		let (): () = redis::pipe()
			.atomic()
			.lrem(&self.processing, 1, &self.payload)
			.ignore()
			.rpush(&self.keys.ready, next)
			.ignore()
			.query_async(&mut conn)
			.await?;
		Ok(())
	}

	async fn dead_letter(&self) -> Result<()> {
		let mut conn = self.conn.clone();
		let (): () = redis::pipe()
			.atomic()
			.lrem(&self.processing, 1, &self.payload)
			.ignore()
			.rpush(&self.keys.dead, &self.payload)
			.ignore()
			.query_async(&mut conn)
			.await?;
		Ok(())
	}
}
