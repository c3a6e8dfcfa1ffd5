//! Message broker plumbing.
//!
//! One long-lived consumer connection feeds the detection loop with a
//! prefetch of exactly one message, so a request is fully processed and
//! settled before the broker hands over the next. Publishing uses a fresh
//! short-lived connection per cycle, closed on every exit path.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

const RECONNECT_DELAY: Duration = Duration::from_secs(30);
const CONSUMER_TAG: &str = "rundet";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Consumer stream for {0} closed by the broker")]
    ConsumerClosed(String),
}

/// Long-lived single-prefetch consumer on the ingress queue.
pub struct QueueConsumer {
    // Held so the connection outlives the channel and consumer.
    _connection: Connection,
    queue: String,
    consumer: Consumer,
}

impl QueueConsumer {
    /// Connect, retrying forever with a fixed delay. The loop has nothing
    /// useful to do without a broker, so there is no retry bound.
    pub async fn connect_with_retry(uri: &str, queue: &str) -> Self {
        loop {
            match Self::connect(uri, queue).await {
                Ok(consumer) => {
                    info!("Consuming from queue {queue}");
                    return consumer;
                }
                Err(e) => {
                    error!(
                        "Could not connect to broker: {e}; retrying in {}s",
                        RECONNECT_DELAY.as_secs()
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn connect(uri: &str, queue: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        declare_queue(&channel, queue).await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(Self {
            _connection: connection,
            queue: queue.to_string(),
            consumer,
        })
    }

    /// Wait up to `timeout` for one delivery. `Ok(None)` means inactivity,
    /// not closure; a closed stream is an error so the caller reconnects.
    pub async fn next(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.next()).await {
            Err(_) => {
                debug!("No message within {}s", timeout.as_secs());
                Ok(None)
            }
            Ok(None) => Err(BrokerError::ConsumerClosed(self.queue.clone())),
            Ok(Some(delivery)) => Ok(Some(delivery?)),
        }
    }
}

pub async fn ack(delivery: &Delivery) -> Result<(), BrokerError> {
    delivery.acker.ack(BasicAckOptions::default()).await?;
    Ok(())
}

/// Negative-acknowledge with requeue, for transient failures.
pub async fn nack_requeue(delivery: &Delivery) -> Result<(), BrokerError> {
    delivery
        .acker
        .nack(BasicNackOptions {
            requeue: true,
            ..BasicNackOptions::default()
        })
        .await?;
    Ok(())
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Publish each body to `queue` over a fresh connection, closed before
/// returning. Publisher confirms are awaited per message.
pub async fn publish_all(uri: &str, queue: &str, bodies: &[String]) -> Result<(), BrokerError> {
    if bodies.is_empty() {
        return Ok(());
    }
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let result = publish_on(&connection, queue, bodies).await;
    if let Err(e) = connection.close(200, "publish cycle complete").await {
        debug!("Publisher connection close failed: {e}");
    }
    result
}

async fn publish_on(
    connection: &Connection,
    queue: &str,
    bodies: &[String],
) -> Result<(), BrokerError> {
    let channel = connection.create_channel().await?;
    declare_queue(&channel, queue).await?;
    for body in bodies {
        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default(),
            )
            .await?
            .await?;
    }
    info!("Published {} messages to {queue}", bodies.len());
    Ok(())
}
