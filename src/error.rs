//! Error types.
//!
//! Malformed payloads are [`FormatError`](smokewatch_types::FormatError)s and
//! never leave the consumer loop. Everything here is either fatal for a loop
//! ([`ConsumerError`]) or rejected at startup ([`ConfigError`]).

use thiserror::Error;

/// Errors reported by a broker transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not open a connection or channel.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Declaring a queue failed.
    #[error("Failed to declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    /// Deleting a queue failed.
    #[error("Failed to delete queue '{queue}': {reason}")]
    Delete { queue: String, reason: String },

    /// Publishing a message failed.
    #[error("Failed to publish to '{queue}': {reason}")]
    Publish { queue: String, reason: String },

    /// Starting a consumer failed.
    #[error("Failed to consume from '{queue}': {reason}")]
    Consume { queue: String, reason: String },

    /// A delivery could not be received.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Acknowledging a delivery failed.
    #[error("Failed to acknowledge delivery {tag}: {reason}")]
    Ack { tag: u64, reason: String },

    /// The connection has already been closed.
    #[error("Connection closed")]
    Closed,
}

/// A window was read before anything was pushed into it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window is empty")]
    Empty,
}

/// A reporter could not deliver a receipt or an alert.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ReportError(pub String);

impl ReportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// An unexpected failure while a loop handles a message.
#[derive(Debug, Error)]
pub enum ProcessingFault {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("rule evaluation failed: {0}")]
    Window(#[from] WindowError),

    #[error("reporting failed: {0}")]
    Report(#[from] ReportError),

    /// The broker stopped delivering (consumer cancelled or connection lost).
    #[error("delivery stream ended unexpectedly")]
    StreamEnded,
}

/// Fatal errors that end a consumer loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The broker could not be reached at startup.
    #[error("connection to the broker at {host} failed: {source}")]
    Connection {
        host: String,
        #[source]
        source: BrokerError,
    },

    /// The loop faulted after connecting.
    #[error("channel '{channel}' faulted: {source}")]
    Fault {
        channel: String,
        #[source]
        source: ProcessingFault,
    },
}

/// Invalid or unloadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid {field} for channel '{channel}': {reason}")]
    Invalid {
        channel: String,
        field: &'static str,
        reason: String,
    },

    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),
}
