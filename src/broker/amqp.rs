//! RabbitMQ transport over AMQP 0-9-1.
//!
//! Each connection opens a single channel. Queues are declared durable and
//! messages go through the default exchange, routed by queue name.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use tracing::debug;

use super::{ConsumeOptions, Connection, Connector, Delivery, Subscription};
use crate::error::BrokerError;

/// Connects to a RabbitMQ server.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    uri: String,
    host: String,
}

impl AmqpConnector {
    /// Create a connector for an `amqp://` URI. `host` is only used in
    /// diagnostics.
    pub fn new(uri: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            host: host.into(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError> {
        let connection = lapin::Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        debug!(host = %self.host, "opened AMQP channel");

        Ok(Box::new(AmqpConnection {
            connection,
            channel,
        }))
    }

    fn describe(&self) -> &str {
        &self.host
    }
}

struct AmqpConnection {
    connection: lapin::Connection,
    channel: lapin::Channel,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(|e| BrokerError::Delete {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let publish_error = |e: lapin::Error| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        };
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        Ok(())
    }

    async fn consume(
        &mut self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let consume_error = |e: lapin::Error| BrokerError::Consume {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        self.channel
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;

        let consume_options = BasicConsumeOptions {
            no_ack: options.no_ack,
            ..Default::default()
        };
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("smokewatch-{}", queue),
                consume_options,
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        Ok(Box::new(AmqpSubscription {
            consumer,
            channel: self.channel.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "Goodbye")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

struct AmqpSubscription {
    consumer: lapin::Consumer,
    channel: lapin::Channel,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| Delivery {
                tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })
            .map_err(|e| BrokerError::Delivery(e.to_string())),
        )
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                tag,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_describes_host() {
        let connector = AmqpConnector::new("amqp://rabbit.local:5672/%2F", "rabbit.local");
        assert_eq!(connector.describe(), "rabbit.local");
        assert_eq!(connector.uri(), "amqp://rabbit.local:5672/%2F");
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        // nothing listens on port 1
        let connector = AmqpConnector::new("amqp://127.0.0.1:1/%2F", "127.0.0.1");
        assert!(matches!(
            connector.connect().await,
            Err(BrokerError::Connection(_))
        ));
    }
}
