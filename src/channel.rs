//! Channel definitions.
//!
//! A channel is one monitored quantity (the smoker, or one of the food
//! probes) with its own queue, window, rule and acknowledgment mode. All
//! channels run through the same consumer pipeline; everything that differs
//! between them lives here as configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::AlertRule;

/// Prefetch limit used by every consumer loop: one unacknowledged message at
/// a time.
pub const PREFETCH_COUNT: u16 = 1;

/// When a channel acknowledges a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// The broker treats a message as acknowledged as soon as it is
    /// delivered. A crash mid-processing loses that reading (at-most-once).
    Auto,
    /// Acknowledge manually after the processing delay, before the reading
    /// is pushed into the window.
    OnReceipt,
    /// Acknowledge manually once processing has completed. A crash before
    /// the ack causes redelivery on reconnect (at-least-once), which pushes
    /// the reading into the window a second time.
    AfterProcessing,
}

impl AckMode {
    /// Whether the consumer must acknowledge deliveries itself.
    pub fn is_manual(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::OnReceipt => "on-receipt",
            AckMode::AfterProcessing => "after-processing",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A fully resolved channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Channel name used in logs and alerts.
    pub name: String,
    /// Queue the channel's readings are published to.
    pub queue: String,
    /// Number of readings retained in the window.
    pub window_capacity: usize,
    /// Rule evaluated after every push.
    pub rule: AlertRule,
    pub ack_mode: AckMode,
    /// Simulated work per message.
    pub processing_delay: Duration,
    /// Minimum window size before the rule is evaluated.
    pub min_readings: usize,
    /// Column of the replay CSV holding this channel's temperature.
    pub column: usize,
}

impl Channel {
    /// Create a channel with manual after-processing acks, no processing
    /// delay and evaluation from the first reading.
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        window_capacity: usize,
        rule: AlertRule,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            window_capacity,
            rule,
            ack_mode: AckMode::AfterProcessing,
            processing_delay: Duration::ZERO,
            min_readings: 1,
            column: 1,
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn with_min_readings(mut self, min_readings: usize) -> Self {
        self.min_readings = min_readings.max(1);
        self
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = column;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_mode_serde_names() {
        let modes: Vec<AckMode> =
            serde_json::from_str(r#"["auto", "on-receipt", "after-processing"]"#).unwrap();
        assert_eq!(
            modes,
            vec![AckMode::Auto, AckMode::OnReceipt, AckMode::AfterProcessing]
        );
        assert!(!AckMode::Auto.is_manual());
        assert!(AckMode::OnReceipt.is_manual());
        assert!(AckMode::AfterProcessing.is_manual());
    }

    #[test]
    fn test_channel_builder() {
        let channel = Channel::new("smoker", "Smart_Smoker", 5, AlertRule::drop_at_least(15.0))
            .with_ack_mode(AckMode::Auto)
            .with_processing_delay(Duration::from_secs(1))
            .with_min_readings(0);

        assert_eq!(channel.ack_mode, AckMode::Auto);
        assert_eq!(channel.processing_delay, Duration::from_secs(1));
        assert_eq!(channel.min_readings, 1);
        assert_eq!(channel.column, 1);
    }
}
