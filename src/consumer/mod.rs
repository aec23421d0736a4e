//! The per-channel consumer loop.
//!
//! One [`ChannelConsumer`] runs per configured channel, each with its own
//! broker connection and its own [`Window`]. Nothing is shared between loops.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect──▶ Connected ──declare + qos + consume──▶ Consuming
//!   │                   │                                     │
//!   │ connect failed    │ setup failed              shutdown  │  fault
//!   ▼                   ▼                                     ▼
//! Faulted            Faulted                     Closing    Faulted
//! ```
//!
//! The connection is closed on every path out of `Connected`/`Consuming`.
//!
//! # Per-message processing
//!
//! Messages are handled one at a time, in delivery order:
//!
//! 1. parse the payload (malformed payloads are logged, acknowledged and
//!    dropped without touching the window)
//! 2. wait out the channel's processing delay
//! 3. ack now if the channel acks [`OnReceipt`](AckMode::OnReceipt)
//! 4. push into the window
//! 5. report the receipt, evaluate the rule, report any alert
//! 6. ack now if the channel acks [`AfterProcessing`](AckMode::AfterProcessing)
//!
//! Any failure in steps 3-6 is fatal for the loop.

mod report;
mod shutdown;

pub use report::{ChannelReporter, LogReporter, Reporter};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};

use std::sync::Arc;

use smokewatch_types::Reading;
use tracing::{debug, error, info, warn};

use crate::broker::{ConsumeOptions, Connection, Connector, Delivery, Subscription};
use crate::channel::{AckMode, Channel, PREFETCH_COUNT};
use crate::data::Window;
use crate::error::{ConsumerError, ProcessingFault};

/// Where a consumer loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connected,
    Consuming,
    Closing,
    Faulted,
}

/// Counters for a loop that shut down gracefully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Deliveries taken from the queue.
    pub received: u64,
    /// Readings pushed into the window.
    pub stored: u64,
    /// Malformed payloads dropped.
    pub discarded: u64,
    /// Alerts raised.
    pub alerts: u64,
}

/// Consumes one channel's queue and runs its readings through the window and
/// rule.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use smokewatch::broker::MemoryBroker;
/// use smokewatch::channel::{AckMode, Channel};
/// use smokewatch::consumer::{shutdown_channel, ChannelConsumer, LogReporter};
/// use smokewatch::data::AlertRule;
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// let channel = Channel::new("smoker", "Smart_Smoker", 5, AlertRule::drop_at_least(15.0))
///     .with_ack_mode(AckMode::Auto);
///
/// let (trigger, shutdown) = shutdown_channel();
/// trigger.trigger();
///
/// let mut consumer = ChannelConsumer::new(channel, Arc::new(broker), LogReporter);
/// let summary = consumer.run(shutdown).await.unwrap();
/// assert_eq!(summary.received, 0);
/// # });
/// ```
pub struct ChannelConsumer<R: Reporter> {
    channel: Channel,
    connector: Arc<dyn Connector>,
    reporter: R,
    state: LoopState,
}

impl<R: Reporter> ChannelConsumer<R> {
    pub fn new(channel: Channel, connector: Arc<dyn Connector>, reporter: R) -> Self {
        Self {
            channel,
            connector,
            reporter,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    fn transition(&mut self, next: LoopState) {
        debug!(channel = %self.channel.name, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    ///
    /// A message that is already being processed when shutdown fires is
    /// finished first. The broker connection is closed before this returns,
    /// whatever the outcome.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<LoopSummary, ConsumerError> {
        info!(
            channel = %self.channel.name,
            host = %self.connector.describe(),
            "Connecting to broker"
        );
        let mut connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(source) => {
                self.transition(LoopState::Faulted);
                error!(
                    channel = %self.channel.name,
                    "Connection to the broker failed. Verify the server is running on host={}",
                    self.connector.describe()
                );
                return Err(ConsumerError::Connection {
                    host: self.connector.describe().to_string(),
                    source,
                });
            }
        };
        self.transition(LoopState::Connected);

        let result = self.consume(connection.as_mut(), &mut shutdown).await;
        match &result {
            Ok(_) => self.transition(LoopState::Closing),
            Err(fault) => {
                error!(channel = %self.channel.name, "Something went wrong: {}", fault);
                self.transition(LoopState::Faulted);
            }
        }

        info!(channel = %self.channel.name, "Closing connection. Goodbye.");
        if let Err(e) = connection.close().await {
            warn!(channel = %self.channel.name, "Error closing connection: {}", e);
        }

        result.map_err(|source| ConsumerError::Fault {
            channel: self.channel.name.clone(),
            source,
        })
    }

    async fn consume(
        &mut self,
        connection: &mut dyn Connection,
        shutdown: &mut Shutdown,
    ) -> Result<LoopSummary, ProcessingFault> {
        connection.declare_queue(&self.channel.queue).await?;
        let options = ConsumeOptions {
            prefetch: PREFETCH_COUNT,
            no_ack: !self.channel.ack_mode.is_manual(),
        };
        let mut subscription = connection.consume(&self.channel.queue, options).await?;
        self.transition(LoopState::Consuming);

        info!(
            channel = %self.channel.name,
            queue = %self.channel.queue,
            capacity = self.channel.window_capacity,
            ack = %self.channel.ack_mode,
            "[*] Ready for work. To exit press CTRL+C"
        );

        let mut window = Window::with_capacity(self.channel.window_capacity);
        let mut summary = LoopSummary::default();

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(channel = %self.channel.name, "User interrupted continuous listening process.");
                    return Ok(summary);
                }
                next = subscription.next_delivery() => match next {
                    Some(delivery) => delivery?,
                    None => return Err(ProcessingFault::StreamEnded),
                },
            };

            self.handle(delivery, &mut window, subscription.as_mut(), &mut summary)
                .await?;
        }
    }

    async fn handle(
        &mut self,
        delivery: Delivery,
        window: &mut Window,
        subscription: &mut dyn Subscription,
        summary: &mut LoopSummary,
    ) -> Result<(), ProcessingFault> {
        let channel = &self.channel;
        summary.received += 1;
        if delivery.redelivered {
            debug!(channel = %channel.name, tag = delivery.tag, "redelivered message");
        }

        let reading = match Reading::parse(&delivery.payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.reporter.discarded(&channel.name, &delivery.payload, &e);
                summary.discarded += 1;
                // a manual-ack message left unacked would stall the prefetch window
                if channel.ack_mode.is_manual() {
                    subscription.ack(delivery.tag).await?;
                }
                return Ok(());
            }
        };

        if !channel.processing_delay.is_zero() {
            tokio::time::sleep(channel.processing_delay).await;
        }

        if channel.ack_mode == AckMode::OnReceipt {
            subscription.ack(delivery.tag).await?;
        }

        if let Some(evicted) = window.push(reading) {
            debug!(channel = %channel.name, evicted = %evicted, "window full, evicted oldest reading");
        }
        summary.stored += 1;
        self.reporter.received(&channel.name, window.newest()?)?;

        if window.len() >= channel.min_readings {
            if let Some(event) = channel.rule.evaluate(&channel.name, window)? {
                self.reporter.alert(&event)?;
                summary.alerts += 1;
            }
        }

        if channel.ack_mode == AckMode::AfterProcessing {
            subscription.ack(delivery.tag).await?;
        }
        Ok(())
    }
}
