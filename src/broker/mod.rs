//! Broker abstraction for publishing and consuming readings.
//!
//! The consumer loop and the replay driver only talk to a broker through the
//! traits in this module, so the transport can be swapped out. Two
//! implementations ship with the crate:
//!
//! - [`MemoryBroker`]: an in-process broker with durable queues, prefetch
//!   limits and redelivery of unacknowledged messages. Used by tests and for
//!   dry runs.
//! - [`AmqpConnector`] (`amqp` feature): RabbitMQ over AMQP 0-9-1.
//!
//! Messages are always published through the default exchange, with the
//! queue name as routing key.

mod memory;

#[cfg(feature = "amqp")]
mod amqp;

pub use memory::{MemoryBroker, MemoryConnection};

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag used to acknowledge this delivery.
    pub tag: u64,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Set when the message was delivered before and never acknowledged.
    pub redelivered: bool,
}

/// Options for starting a consumer on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Maximum number of unacknowledged deliveries in flight. Zero means
    /// unlimited.
    pub prefetch: u16,
    /// Let the broker consider messages acknowledged on delivery.
    pub no_ack: bool,
}

/// Opens connections to a broker.
///
/// # Example
///
/// ```
/// use smokewatch::broker::{Connection, Connector, MemoryBroker};
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// let mut connection = broker.connect().await.unwrap();
/// connection.declare_queue("Smart_Smoker").await.unwrap();
/// connection.publish("Smart_Smoker", b"12:00:00, 225.5").await.unwrap();
/// assert_eq!(broker.ready_count("Smart_Smoker"), 1);
/// # });
/// ```
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError>;

    /// Where this connector points, for diagnostics (e.g. the broker host).
    fn describe(&self) -> &str;
}

/// An open broker connection with a single channel.
#[async_trait]
pub trait Connection: Send {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Delete a queue and any messages in it.
    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Publish a payload to `queue` through the default exchange.
    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Start consuming from `queue`.
    async fn consume(
        &mut self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Close the connection. Unacknowledged deliveries go back to their
    /// queues.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// A running consumer on one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Blocks without timeout until a message is available. Returns `None`
    /// once the broker stops delivering (consumer cancelled or connection
    /// closed). Dropping the returned future before it completes does not
    /// lose a message.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// Acknowledge a delivery by tag.
    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError>;
}
