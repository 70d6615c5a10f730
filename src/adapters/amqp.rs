//! AMQP (RabbitMQ) work queue.
//!
//! Messages are published to the default exchange with the queue name as
//! routing key and pulled one at a time with `basic_get` and manual acks.

use crate::domain::ports::{Delivery, MessageQueue};
use crate::utils::error::{BloodSearchError, Result};
use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions, QueuePurgeOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel,
};
use tokio::sync::Mutex;

pub const DEFAULT_QUEUE: &str = "blood_request_queue";

#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    pub queue: String,
    pub pool_size: usize,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            pool_size: 2,
        }
    }
}

pub struct AmqpQueue {
    pool: Pool,
    config: AmqpConfig,
    channel: Mutex<Option<Channel>>,
}

fn queue_error(context: &str, e: impl std::fmt::Display) -> BloodSearchError {
    BloodSearchError::QueueError {
        message: format!("{}: {}", context, e),
    }
}

/// Publisher confirms are on for every channel, so anything but an ack
/// means the broker did not take the message.
fn check_confirmation(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(queue_error("Publish rejected", "broker returned nack")),
        Confirmation::NotRequested => Err(queue_error("Publish unconfirmed", "confirms not enabled on channel")),
    }
}

impl AmqpQueue {
    /// Builds the connection pool without touching the broker. The first
    /// operation connects.
    pub fn new(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| queue_error("Failed to create pool", e))?;

        Ok(Self {
            pool,
            config,
            channel: Mutex::new(None),
        })
    }

    /// Builds the pool and fails unless the broker is reachable.
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let queue = Self::new(config)?;
        queue.verify_connection().await?;
        Ok(queue)
    }

    /// Opens a channel and declares the queue.
    pub async fn verify_connection(&self) -> Result<()> {
        self.channel().await?;
        tracing::info!(
            url = %self.config.url,
            queue = %self.config.queue,
            "Connected to AMQP"
        );
        Ok(())
    }

    /// The shared channel, reopened if the broker closed it.
    async fn channel(&self) -> Result<Channel> {
        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
            tracing::warn!(queue = %self.config.queue, "AMQP channel closed, reopening");
        }

        let conn = self
            .pool
            .get()
            .await
            .map_err(|e: PoolError| queue_error("Failed to get connection from pool", e))?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| queue_error("Failed to create channel", e))?;

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| queue_error("Failed to declare queue", e))?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| queue_error("Failed to set prefetch", e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| queue_error("Failed to enable publisher confirms", e))?;

        *slot = Some(channel.clone());
        Ok(channel)
    }

    pub async fn close(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close(200, "shutting down").await {
                tracing::warn!(error = %e, "Failed to close AMQP channel");
            }
        }
        self.pool.close();
        tracing::info!("AMQP connection closed");
    }
}

#[async_trait]
impl MessageQueue for AmqpQueue {
    async fn depth(&self) -> Result<u32> {
        let channel = self.channel().await?;
        let queue = channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| queue_error("Failed to declare queue", e))?;
        Ok(queue.message_count())
    }

    async fn fetch(&self) -> Result<Option<Delivery>> {
        let channel = self.channel().await?;
        let message = channel
            .basic_get(&self.config.queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| queue_error("Failed to get message", e))?;

        Ok(message.map(|m| Delivery {
            tag: m.delivery.delivery_tag,
            payload: m.delivery.data,
        }))
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        let channel = self.channel().await?;
        channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| queue_error("Failed to ack message", e))
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let channel = self.channel().await?;
        channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| queue_error("Failed to nack message", e))
    }

    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let channel = self.channel().await?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                "",
                &self.config.queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| queue_error("Failed to publish", e))?;
        let confirmation = confirm
            .await
            .map_err(|e| queue_error("Publish confirmation failed", e))?;
        check_confirmation(confirmation)?;

        tracing::debug!(queue = %self.config.queue, bytes = payload.len(), "Published message");
        Ok(())
    }

    async fn purge(&self) -> Result<u32> {
        let channel = self.channel().await?;
        let purged = channel
            .queue_purge(&self.config.queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| queue_error("Failed to purge queue", e))?;
        tracing::info!(queue = %self.config.queue, purged, "Purged queue");
        Ok(purged)
    }
}
