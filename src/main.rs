use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use smokewatch::broker::Connector;
use smokewatch::config::BrokerSettings;
use smokewatch::consumer::{
    shutdown_channel, ChannelConsumer, ChannelReporter, Shutdown, ShutdownTrigger,
};
use smokewatch::data::duration::{format_duration, parse_duration};
use smokewatch::replay::{self, ReplayOptions};
use smokewatch::{AlertEvent, BrokerError, Channel, ConsumerError, Settings};

#[derive(Parser, Debug)]
#[command(name = "smokewatch")]
#[command(about = "Windowed temperature alerts for a smart smoker over RabbitMQ")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// RabbitMQ host, overriding the settings
    #[arg(long, global = true)]
    host: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume channel queues and raise alerts until interrupted
    Consume {
        /// Channels to run (default: all configured channels)
        channels: Vec<String>,

        /// Print every alert as a JSON line on stdout
        #[arg(long)]
        json: bool,
    },

    /// Publish recorded readings from a CSV file
    Replay {
        /// CSV file: timestamp, smoker, food_a, food_b
        #[arg(short, long)]
        file: PathBuf,

        /// Pause between rows (e.g. "30s", "500ms")
        #[arg(short, long, default_value = "30s")]
        interval: String,

        /// Delete the channel queues after the last row
        #[arg(long)]
        delete_queues: bool,

        /// Channels to publish (default: all configured channels)
        #[arg(long = "channel")]
        channels: Vec<String>,
    },

    /// Show the resolved channel settings
    Channels {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// How a long-running command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Interrupted or finished without errors.
    Clean,
    /// A connection failed or a loop faulted.
    Failed,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Clean => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.broker.host = host;
        settings.broker.url = None;
    }

    match args.command {
        Command::Channels { json } => {
            print_channels(&settings.channels()?, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Consume { channels, json } => {
            let channels = settings.select(&channels)?;
            let connector = connector(&settings.broker)?;
            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(async {
                let (trigger, _) = shutdown_channel();
                let trigger = Arc::new(trigger);
                forward_interrupt(trigger.clone());
                consume(connector, channels, json, trigger).await
            });
            Ok(outcome.into())
        }
        Command::Replay {
            file,
            interval,
            delete_queues,
            channels,
        } => {
            let channels = settings.select(&channels)?;
            let rows = replay::load_rows(&file)?;
            let options = ReplayOptions {
                interval: parse_duration(&interval)
                    .with_context(|| format!("Invalid --interval '{}'", interval))?,
                delete_queues,
            };
            let connector = connector(&settings.broker)?;
            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(async {
                let (trigger, shutdown) = shutdown_channel();
                forward_interrupt(Arc::new(trigger));
                run_replay(connector, channels, rows, options, shutdown).await
            })?;
            Ok(outcome.into())
        }
    }
}

#[cfg(feature = "amqp")]
fn connector(broker: &BrokerSettings) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(smokewatch::broker::AmqpConnector::new(
        broker.uri(),
        broker.host.clone(),
    )))
}

#[cfg(not(feature = "amqp"))]
fn connector(_broker: &BrokerSettings) -> Result<Arc<dyn Connector>> {
    anyhow::bail!("smokewatch was built without the `amqp` feature")
}

/// Fire `trigger` on Ctrl-C.
fn forward_interrupt(trigger: Arc<ShutdownTrigger>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.trigger();
        }
    });
}

fn connection_hint(host: &str, source: &BrokerError) {
    eprintln!();
    eprintln!("ERROR: connection to RabbitMQ server failed.");
    eprintln!("Verify the server is running on host={}.", host);
    eprintln!("The error says: {}", source);
    eprintln!();
}

/// Run one loop per channel until `trigger` fires or any loop fails.
async fn consume(
    connector: Arc<dyn Connector>,
    channels: Vec<Channel>,
    json: bool,
    trigger: Arc<ShutdownTrigger>,
) -> Outcome {
    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel::<AlertEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = alert_rx.recv().await {
            if !json {
                continue;
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode alert: {}", e),
            }
        }
    });

    let mut tasks = JoinSet::new();
    for channel in channels {
        let mut consumer = ChannelConsumer::new(
            channel,
            connector.clone(),
            ChannelReporter::new(alert_tx.clone()),
        );
        let shutdown = trigger.subscribe();
        tasks.spawn(async move {
            let result = consumer.run(shutdown).await;
            (consumer.channel().name.clone(), result)
        });
    }
    drop(alert_tx);

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(summary))) => info!(
                channel = %name,
                received = summary.received,
                stored = summary.stored,
                discarded = summary.discarded,
                alerts = summary.alerts,
                "Consumer stopped"
            ),
            Ok((_, Err(ConsumerError::Connection { host, source }))) => {
                connection_hint(&host, &source);
                failed = true;
            }
            Ok((name, Err(e))) => {
                error!(channel = %name, "{}", e);
                failed = true;
            }
            Err(e) => {
                error!("Consumer task failed: {}", e);
                failed = true;
            }
        }
        if failed {
            // one failed loop takes the others down with it
            trigger.trigger();
        }
    }

    if let Err(e) = printer.await {
        warn!("Alert printer failed: {}", e);
    }

    if failed {
        Outcome::Failed
    } else {
        Outcome::Clean
    }
}

async fn run_replay(
    connector: Arc<dyn Connector>,
    channels: Vec<Channel>,
    rows: Vec<replay::Row>,
    options: ReplayOptions,
    shutdown: Shutdown,
) -> Result<Outcome> {
    info!(
        rows = rows.len(),
        interval = %format_duration(options.interval),
        "Replaying readings"
    );
    match replay::replay(connector.as_ref(), &channels, &rows, options, shutdown).await {
        Ok(summary) => {
            info!(
                rows = summary.rows,
                published = summary.published,
                skipped = summary.skipped,
                interrupted = summary.interrupted,
                "Replay finished"
            );
            Ok(Outcome::Clean)
        }
        Err(e @ BrokerError::Connection(_)) => {
            connection_hint(connector.describe(), &e);
            Ok(Outcome::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_channels(channels: &[Channel], json: bool) -> Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = channels
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "queue": c.queue,
                    "window_capacity": c.window_capacity,
                    "rule": c.rule.kind(),
                    "threshold": c.rule.threshold(),
                    "ack": c.ack_mode,
                    "processing_delay": format_duration(c.processing_delay),
                    "min_readings": c.min_readings,
                    "column": c.column,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{:<10} {:<14} {:>6} {:<6} {:>9} {:<17} {:>6}",
        "CHANNEL", "QUEUE", "WINDOW", "RULE", "THRESHOLD", "ACK", "DELAY"
    );
    for c in channels {
        println!(
            "{:<10} {:<14} {:>6} {:<6} {:>9} {:<17} {:>6}",
            c.name,
            c.queue,
            c.window_capacity,
            c.rule.kind().label(),
            c.rule.threshold(),
            c.ack_mode.label(),
            format_duration(c.processing_delay)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smokewatch::broker::{Connection, MemoryBroker};
    use smokewatch::data::AlertRule;
    use smokewatch::AckMode;
    use std::time::Duration;

    fn smoker() -> Channel {
        Channel::new("smoker", "Smart_Smoker", 5, AlertRule::drop_at_least(15.0))
            .with_ack_mode(AckMode::Auto)
    }

    fn food_a() -> Channel {
        Channel::new("food_a", "Food1", 20, AlertRule::abs_change_at_most(1.0))
    }

    async fn consume_all(broker: &MemoryBroker, trigger: Arc<ShutdownTrigger>) -> Outcome {
        let run = consume(
            Arc::new(broker.clone()),
            vec![smoker(), food_a()],
            false,
            trigger,
        );
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("consumers did not stop")
    }

    fn trigger() -> Arc<ShutdownTrigger> {
        let (trigger, _) = shutdown_channel();
        Arc::new(trigger)
    }

    #[tokio::test]
    async fn test_consume_unreachable_broker_fails() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        assert_eq!(consume_all(&broker, trigger()).await, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_consume_interrupt_is_clean() {
        let broker = MemoryBroker::new();
        broker.enqueue("Food1", b"12:00:00, 150.0");
        let trigger = trigger();

        let interrupt = trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.trigger();
        });

        assert_eq!(consume_all(&broker, trigger).await, Outcome::Clean);
        assert_eq!(broker.ready_count("Food1"), 0);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_consume_fault_stops_other_channels() {
        let broker = MemoryBroker::new();
        let deleter = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut connection = deleter.connect().await.unwrap();
            connection.delete_queue("Smart_Smoker").await.unwrap();
            connection.close().await.unwrap();
        });

        // the trigger is never fired; food_a stops because smoker faulted
        assert_eq!(consume_all(&broker, trigger()).await, Outcome::Failed);
        assert_eq!(broker.open_connections(), 0);
        assert!(broker.has_queue("Food1"));
    }

    #[tokio::test]
    async fn test_replay_outcomes() {
        let rows = replay::parse_rows("Time,Smoker\n12:00:00,225.5\n");
        let options = ReplayOptions {
            interval: Duration::ZERO,
            delete_queues: false,
        };

        let broker = MemoryBroker::new();
        let outcome = run_replay(
            Arc::new(broker.clone()),
            vec![smoker()],
            rows.clone(),
            options,
            Shutdown::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Clean);
        assert_eq!(broker.ready_count("Smart_Smoker"), 1);

        broker.set_reachable(false);
        let outcome = run_replay(
            Arc::new(broker.clone()),
            vec![smoker()],
            rows,
            options,
            Shutdown::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Failed);
    }
}
