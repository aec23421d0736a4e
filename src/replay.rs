//! Replays recorded cook data onto the channel queues.
//!
//! The CSV holds one row per sample, `timestamp, smoker, food_a, food_b`,
//! under a header line. Each channel reads the column named by
//! [`Channel::column`]. A cell that is empty or not a number (the probe
//! wasn't in yet) is skipped for that row only.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use smokewatch_types::format_payload;
use tracing::{debug, info, warn};

use crate::broker::{Connection, Connector};
use crate::channel::Channel;
use crate::consumer::Shutdown;
use crate::error::BrokerError;

/// Default pause between rows.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// One data row of the replay file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub timestamp: String,
    /// Every column, including the timestamp at index 0.
    pub cells: Vec<String>,
}

impl Row {
    fn temperature(&self, column: usize) -> Option<f64> {
        let cell = self.cells.get(column)?.trim();
        cell.parse::<f64>().ok().filter(|t| t.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Pause between consecutive rows.
    pub interval: Duration,
    /// Delete every channel queue once the last row is sent.
    pub delete_queues: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            delete_queues: false,
        }
    }
}

/// What a replay sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub rows: usize,
    pub published: usize,
    /// Cells with no usable temperature.
    pub skipped: usize,
    /// Whether the replay was interrupted before the last row.
    pub interrupted: bool,
}

/// Split CSV text into rows, dropping the header line and blank lines.
pub fn parse_rows(text: &str) -> Vec<Row> {
    text.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let cells = split_cells(line);
            Row {
                timestamp: cells.first().cloned().unwrap_or_default(),
                cells,
            }
        })
        .collect()
}

/// Split one CSV line into trimmed cells.
///
/// A cell wrapped in double quotes may hold commas, and `""` inside it is a
/// literal quote. The quotes themselves are stripped.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            '"' if quoted => quoted = false,
            '"' if cell.trim().is_empty() => {
                cell.clear();
                quoted = true;
            }
            ',' if !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            c => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

/// Read and parse a replay file.
pub fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;
    let rows = parse_rows(&text);
    if rows.is_empty() {
        anyhow::bail!("Replay file {} has no data rows", path.display());
    }
    Ok(rows)
}

/// Publish `rows` to the queues of `channels` over a single connection.
///
/// Queues are declared durable first. Shutdown is honoured between rows; a
/// row that has started is always sent in full. The connection is closed on
/// every path.
pub async fn replay(
    connector: &dyn Connector,
    channels: &[Channel],
    rows: &[Row],
    options: ReplayOptions,
    mut shutdown: Shutdown,
) -> Result<ReplaySummary, BrokerError> {
    let mut connection = connector.connect().await?;
    let result = publish_rows(
        connection.as_mut(),
        channels,
        rows,
        options,
        &mut shutdown,
    )
    .await;

    if let Err(e) = connection.close().await {
        warn!("Error closing connection: {}", e);
    }
    result
}

async fn publish_rows(
    connection: &mut dyn Connection,
    channels: &[Channel],
    rows: &[Row],
    options: ReplayOptions,
    shutdown: &mut Shutdown,
) -> Result<ReplaySummary, BrokerError> {
    for channel in channels {
        connection.declare_queue(&channel.queue).await?;
    }

    let mut summary = ReplaySummary::default();
    for (i, row) in rows.iter().enumerate() {
        if i > 0 && !options.interval.is_zero() {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(sent = summary.rows, "Replay interrupted");
                    summary.interrupted = true;
                    break;
                }
                _ = tokio::time::sleep(options.interval) => {}
            }
        } else if shutdown.is_triggered() {
            summary.interrupted = true;
            break;
        }

        for channel in channels {
            let temperature = match row.temperature(channel.column) {
                Some(t) if !row.timestamp.is_empty() => t,
                _ => {
                    debug!(
                        channel = %channel.name,
                        timestamp = %row.timestamp,
                        "no reading in column {}",
                        channel.column
                    );
                    summary.skipped += 1;
                    continue;
                }
            };
            let payload = format_payload(&row.timestamp, temperature);
            connection.publish(&channel.queue, &payload).await?;
            info!(
                queue = %channel.queue,
                " [x] Sent {}",
                String::from_utf8_lossy(&payload)
            );
            summary.published += 1;
        }
        summary.rows += 1;
    }

    if options.delete_queues {
        for channel in channels {
            connection.delete_queue(&channel.queue).await?;
            info!(queue = %channel.queue, "Deleted queue");
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::Settings;
    use crate::consumer::shutdown_channel;
    use std::io::Write;

    const CSV: &str = "\
Time (UTC),Channel1,Channel2,Channel3
6/18/22 12:00:00,35,,
6/18/22 12:00:30,35.123,N/A,
6/18/22 12:01:00,35.6,36.2,41.556

6/18/22 12:01:30,36
";

    fn channels() -> Vec<Channel> {
        let settings = Settings::default();
        settings
            .select(&[
                "smoker".to_string(),
                "food_a".to_string(),
                "food_b".to_string(),
            ])
            .unwrap()
    }

    fn payloads(broker: &MemoryBroker, queue: &str) -> Vec<String> {
        broker
            .ready_payloads(queue)
            .into_iter()
            .map(|p| String::from_utf8(p).unwrap())
            .collect()
    }

    fn no_pause() -> ReplayOptions {
        ReplayOptions {
            interval: Duration::ZERO,
            delete_queues: false,
        }
    }

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows(CSV);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].timestamp, "6/18/22 12:00:00");
        assert_eq!(rows[1].temperature(1), Some(35.123));
        assert_eq!(rows[1].temperature(2), None);
        assert_eq!(rows[3].temperature(3), None);
    }

    #[test]
    fn test_parse_rows_quoted_cells() {
        let rows = parse_rows(
            "\"Time (UTC)\",\"Channel1\",\"Channel2\"\n\
             \"Jun 18, 2022 12:00:00\", \"35.5\",\"\"\n\
             \"say \"\"hi\"\"\",36,\"N/A\"\n",
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "Jun 18, 2022 12:00:00");
        assert_eq!(rows[0].cells.len(), 3);
        assert_eq!(rows[0].temperature(1), Some(35.5));
        assert_eq!(rows[0].temperature(2), None);
        assert_eq!(rows[1].timestamp, "say \"hi\"");
        assert_eq!(rows[1].temperature(1), Some(36.0));
        assert_eq!(rows[1].temperature(2), None);
    }

    #[tokio::test]
    async fn test_replay_publishes_each_column() {
        let broker = MemoryBroker::new();
        let (_trigger, shutdown) = shutdown_channel();

        let summary = replay(&broker, &channels(), &parse_rows(CSV), no_pause(), shutdown)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                rows: 4,
                published: 6,
                skipped: 6,
                interrupted: false,
            }
        );
        assert_eq!(
            payloads(&broker, "Smart_Smoker"),
            vec![
                "6/18/22 12:00:00, 35.0",
                "6/18/22 12:00:30, 35.12",
                "6/18/22 12:01:00, 35.6",
                "6/18/22 12:01:30, 36.0",
            ]
        );
        assert_eq!(payloads(&broker, "Food1"), vec!["6/18/22 12:01:00, 36.2"]);
        assert_eq!(payloads(&broker, "Food2"), vec!["6/18/22 12:01:00, 41.56"]);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_replay_delete_queues() {
        let broker = MemoryBroker::new();
        let options = ReplayOptions {
            delete_queues: true,
            ..no_pause()
        };
        let summary = replay(&broker, &channels(), &parse_rows(CSV), options, Shutdown::never())
            .await
            .unwrap();
        assert_eq!(summary.published, 6);
        assert!(!broker.has_queue("Smart_Smoker"));
        assert!(!broker.has_queue("Food1"));
        assert!(!broker.has_queue("Food2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_paces_rows() {
        let broker = MemoryBroker::new();
        let started = tokio::time::Instant::now();
        let options = ReplayOptions::default();

        replay(&broker, &channels(), &parse_rows(CSV), options, Shutdown::never())
            .await
            .unwrap();
        assert!(started.elapsed() >= DEFAULT_INTERVAL * 3);
        assert!(started.elapsed() < DEFAULT_INTERVAL * 4);
    }

    #[tokio::test]
    async fn test_replay_stops_on_shutdown() {
        let broker = MemoryBroker::new();
        let (trigger, shutdown) = shutdown_channel();
        trigger.trigger();

        let summary = replay(
            &broker,
            &channels(),
            &parse_rows(CSV),
            ReplayOptions::default(),
            shutdown,
        )
        .await
        .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.rows, 0);
        // queues are still declared
        assert!(broker.has_queue("Food2"));
    }

    #[tokio::test]
    async fn test_replay_unreachable_broker() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let result = replay(
            &broker,
            &channels(),
            &parse_rows(CSV),
            no_pause(),
            Shutdown::never(),
        )
        .await;
        assert!(matches!(result, Err(BrokerError::Connection(_))));
    }

    #[test]
    fn test_load_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        assert_eq!(load_rows(file.path()).unwrap().len(), 4);

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        empty.write_all(b"Time (UTC),Channel1\n").unwrap();
        assert!(load_rows(empty.path()).is_err());

        assert!(load_rows(Path::new("/nonexistent/smoker-temps.csv")).is_err());
    }
}
