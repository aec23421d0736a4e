//! Alert events raised by a channel.

use core::fmt;

/// An alert raised when a channel's window matches its rule.
///
/// Alerts are transient: they are reported once and never stored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlertEvent {
    /// Name of the channel that raised the alert.
    pub channel: String,

    /// Timestamp of the reading that triggered the alert.
    pub timestamp: String,

    /// Oldest retained temperature minus the newest, after rounding.
    pub delta: f64,

    /// Human readable description.
    pub message: String,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}", self.channel, self.message, self.timestamp)
    }
}
