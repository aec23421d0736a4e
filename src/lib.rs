//! # smokewatch
//!
//! Windowed temperature alerts for a smart smoker, fed over RabbitMQ.
//!
//! A producer publishes one reading per probe every sampling interval. Each
//! probe (a *channel*) has its own queue and its own consumer loop, which
//! keeps the most recent readings in a bounded window and compares the
//! newest reading with the oldest one still held:
//!
//! - the smoker channel alerts when the temperature **dropped** by at least
//!   its threshold (the fire is dying)
//! - the food channels alert when the temperature **stalled**, moving by no
//!   more than the threshold in either direction
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ publish ┌───────────────┐ deliver ┌─────────────────────────────┐
//! │  replay  │────────▶│    broker     │────────▶│  consumer (one per channel)  │
//! │  (CSV)   │         │ AMQP │ memory │         │  parse ─▶ window ─▶ rule     │
//! └──────────┘         └───────────────┘◀── ack ──│            └──▶ Reporter     │
//!                                                 └─────────────────────────────┘
//! ```
//!
//! - **[`channel`]**: per-channel configuration ([`Channel`], [`AckMode`])
//! - **[`config`]**: layered settings that resolve into channels
//! - **[`data`]**: the bounded [`Window`](data::Window) and
//!   [`AlertRule`](data::AlertRule) evaluation
//! - **[`broker`]**: the transport traits, the RabbitMQ implementation and an
//!   in-process broker
//! - **[`consumer`]**: the per-channel receive, process, acknowledge loop
//! - **[`replay`]**: publishes recorded cook data from a CSV file
//!
//! Readings and alerts themselves live in [`smokewatch_types`].
//!
//! ## Usage
//!
//! ```bash
//! # consume every configured channel
//! smokewatch consume
//!
//! # replay a recorded cook, one row every 30 seconds
//! smokewatch replay --file smoker-temps.csv
//! ```
//!
//! ### As a library
//!
//! ```
//! use std::sync::Arc;
//! use smokewatch::broker::MemoryBroker;
//! use smokewatch::consumer::{shutdown_channel, ChannelConsumer, ChannelReporter};
//! use smokewatch::Settings;
//!
//! # tokio_test::block_on(async {
//! let settings = Settings::default();
//! let smoker = settings.channel("smoker").unwrap();
//!
//! let broker = MemoryBroker::new();
//! let (reporter, _alerts) = ChannelReporter::create();
//! let (trigger, shutdown) = shutdown_channel();
//! trigger.trigger();
//!
//! let mut consumer = ChannelConsumer::new(smoker, Arc::new(broker), reporter);
//! consumer.run(shutdown).await.unwrap();
//! # });
//! ```

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod data;
pub mod error;
pub mod replay;

pub use channel::{AckMode, Channel};
pub use config::Settings;
pub use consumer::{ChannelConsumer, LoopState, LoopSummary};
pub use error::{BrokerError, ConfigError, ConsumerError, ProcessingFault};
pub use smokewatch_types::{AlertEvent, FormatError, Reading};
