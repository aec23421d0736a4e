//! Where a consumer loop sends what it sees.

use smokewatch_types::{AlertEvent, FormatError, Reading};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::ReportError;

/// Receives receipts, alerts and discarded payloads from a consumer loop.
///
/// Calls happen synchronously on the loop, in delivery order. An error from
/// [`received`](Reporter::received) or [`alert`](Reporter::alert) is a
/// processing fault and ends the loop.
pub trait Reporter: Send {
    /// A reading was stored in the channel's window.
    fn received(&mut self, channel: &str, reading: &Reading) -> Result<(), ReportError>;

    /// The channel's rule fired.
    fn alert(&mut self, event: &AlertEvent) -> Result<(), ReportError>;

    /// A payload could not be parsed and was dropped.
    fn discarded(&mut self, channel: &str, payload: &[u8], error: &FormatError) {
        warn!(
            channel,
            payload = %String::from_utf8_lossy(payload),
            "Discarding malformed message: {}",
            error
        );
    }
}

/// Writes receipts and alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn received(&mut self, channel: &str, reading: &Reading) -> Result<(), ReportError> {
        info!(channel, "[x] Received {}", reading);
        Ok(())
    }

    fn alert(&mut self, event: &AlertEvent) -> Result<(), ReportError> {
        warn!(
            channel = %event.channel,
            timestamp = %event.timestamp,
            delta = event.delta,
            ">>> {}",
            event.message
        );
        Ok(())
    }
}

/// Logs like [`LogReporter`] and also forwards every alert to a channel.
///
/// If the receiving side has gone away the alert cannot be delivered, which
/// is reported as an error.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelReporter {
    pub fn new(sender: mpsc::UnboundedSender<AlertEvent>) -> Self {
        Self { sender }
    }

    /// Create a reporter together with the receiving end of its alerts.
    pub fn create() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Reporter for ChannelReporter {
    fn received(&mut self, channel: &str, reading: &Reading) -> Result<(), ReportError> {
        LogReporter.received(channel, reading)
    }

    fn alert(&mut self, event: &AlertEvent) -> Result<(), ReportError> {
        LogReporter.alert(event)?;
        self.sender
            .send(event.clone())
            .map_err(|_| ReportError::new("alert receiver dropped"))
    }
}
