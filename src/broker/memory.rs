//! In-process broker.
//!
//! Models the parts of RabbitMQ the pipeline relies on: named durable queues
//! behind a default exchange, per-consumer prefetch limits, auto and manual
//! acknowledgment, and requeueing of unacknowledged deliveries when the
//! connection that received them goes away.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use super::{ConsumeOptions, Connection, Connector, Delivery, Subscription};
use crate::error::BrokerError;

#[derive(Debug, Clone)]
struct Message {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    message: Message,
    connection: u64,
    consumer: u64,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Message>,
    unacked: BTreeMap<u64, Unacked>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    open_connections: HashSet<u64>,
    next_connection: u64,
    next_consumer: u64,
    next_tag: u64,
    unreachable: bool,
}

/// An in-process broker shared by every connection created from it.
///
/// Cloning is cheap; clones refer to the same queues.
///
/// # Example
///
/// ```
/// use smokewatch::broker::{ConsumeOptions, Connection, Connector, MemoryBroker, Subscription};
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// broker.enqueue("Food1", b"12:00:00, 150.0");
///
/// let mut connection = broker.connect().await.unwrap();
/// let options = ConsumeOptions { prefetch: 1, no_ack: false };
/// let mut subscription = connection.consume("Food1", options).await.unwrap();
///
/// let delivery = subscription.next_delivery().await.unwrap().unwrap();
/// assert_eq!(delivery.payload, b"12:00:00, 150.0");
/// assert_eq!(broker.unacked_count("Food1"), 1);
///
/// // closing without an ack puts the message back
/// connection.close().await.unwrap();
/// assert_eq!(broker.ready_count("Food1"), 1);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock()
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Declare `queue` if needed and append a message to it.
    pub fn enqueue(&self, queue: &str, payload: &[u8]) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Message {
                payload: payload.to_vec(),
                redelivered: false,
            });
        self.notify.notify_waiters();
    }

    /// Whether `queue` has been declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Messages waiting for delivery on `queue`.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Payloads waiting for delivery on `queue`, front first.
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages delivered on `queue` but not yet acknowledged.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections.len()
    }

    /// Drop a connection and return its unacknowledged deliveries to the
    /// front of their queues, in delivery order.
    fn release(&self, connection: u64) {
        let mut state = self.lock();
        if !state.open_connections.remove(&connection) {
            return;
        }

        for (name, queue) in state.queues.iter_mut() {
            let tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, u)| u.connection == connection)
                .map(|(tag, _)| *tag)
                .collect();

            for tag in tags.into_iter().rev() {
                if let Some(unacked) = queue.unacked.remove(&tag) {
                    debug!(queue = %name, tag, "requeueing unacknowledged delivery");
                    queue.ready.push_front(Message {
                        redelivered: true,
                        ..unacked.message
                    });
                }
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(BrokerError::Connection(
                "memory broker is not accepting connections".to_string(),
            ));
        }
        state.next_connection += 1;
        let id = state.next_connection;
        state.open_connections.insert(id);

        Ok(Box::new(MemoryConnection {
            id,
            broker: self.clone(),
        }))
    }

    fn describe(&self) -> &str {
        "memory"
    }
}

/// A connection to a [`MemoryBroker`].
///
/// Dropping the connection has the same effect as closing it.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
}

impl MemoryConnection {
    fn ensure_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        if state.open_connections.contains(&self.id) {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        self.ensure_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn delete_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        self.ensure_open(&state)?;
        state.queues.remove(queue);
        drop(state);
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        self.ensure_open(&state)?;
        match state.queues.get_mut(queue) {
            Some(q) => q.ready.push_back(Message {
                payload: payload.to_vec(),
                redelivered: false,
            }),
            // the default exchange drops messages with no matching queue
            None => debug!(queue, "dropping unroutable message"),
        }
        drop(state);
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &mut self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.broker.lock();
        self.ensure_open(&state)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Consume {
                queue: queue.to_string(),
                reason: "no such queue".to_string(),
            });
        }
        state.next_consumer += 1;

        Ok(Box::new(MemorySubscription {
            broker: self.broker.clone(),
            connection: self.id,
            consumer: state.next_consumer,
            queue: queue.to_string(),
            options,
        }))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.broker.release(self.id);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.release(self.id);
    }
}

enum Poll {
    Ready(Delivery),
    Empty,
    Ended,
}

struct MemorySubscription {
    broker: MemoryBroker,
    connection: u64,
    consumer: u64,
    queue: String,
    options: ConsumeOptions,
}

impl MemorySubscription {
    fn poll_queue(&self) -> Poll {
        let mut guard = self.broker.lock();
        let state = &mut *guard;
        if !state.open_connections.contains(&self.connection) {
            return Poll::Ended;
        }
        let Some(queue) = state.queues.get_mut(&self.queue) else {
            return Poll::Ended;
        };

        if !self.options.no_ack && self.options.prefetch > 0 {
            let in_flight = queue
                .unacked
                .values()
                .filter(|u| u.consumer == self.consumer)
                .count();
            if in_flight >= usize::from(self.options.prefetch) {
                return Poll::Empty;
            }
        }

        let Some(message) = queue.ready.pop_front() else {
            return Poll::Empty;
        };
        state.next_tag += 1;
        let tag = state.next_tag;

        let delivery = Delivery {
            tag,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        if !self.options.no_ack {
            queue.unacked.insert(
                tag,
                Unacked {
                    message,
                    connection: self.connection,
                    consumer: self.consumer,
                },
            );
        }
        Poll::Ready(delivery)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll_queue() {
                Poll::Ready(delivery) => return Some(Ok(delivery)),
                Poll::Ended => return None,
                Poll::Empty => notified.await,
            }
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if !state.open_connections.contains(&self.connection) {
            return Err(BrokerError::Closed);
        }
        let removed = state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| {
                let owned = q
                    .unacked
                    .get(&tag)
                    .is_some_and(|u| u.connection == self.connection);
                if owned {
                    q.unacked.remove(&tag)
                } else {
                    None
                }
            });
        drop(state);

        match removed {
            Some(_) => {
                self.broker.notify.notify_waiters();
                Ok(())
            }
            None => Err(BrokerError::Ack {
                tag,
                reason: "unknown delivery tag".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MANUAL: ConsumeOptions = ConsumeOptions {
        prefetch: 1,
        no_ack: false,
    };
    const AUTO: ConsumeOptions = ConsumeOptions {
        prefetch: 1,
        no_ack: true,
    };

    async fn next(subscription: &mut Box<dyn Subscription>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), subscription.next_delivery())
            .await
            .expect("delivery timed out")
            .expect("stream ended")
            .expect("delivery failed")
    }

    async fn is_blocked(subscription: &mut Box<dyn Subscription>) -> bool {
        tokio::time::timeout(Duration::from_millis(50), subscription.next_delivery())
            .await
            .is_err()
    }

    #[tokio::test]
    async fn test_publish_requires_declared_queue() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();

        conn.publish("missing", b"a").await.unwrap();
        assert!(!broker.has_queue("missing"));

        conn.declare_queue("q").await.unwrap();
        conn.publish("q", b"a").await.unwrap();
        conn.publish("q", b"b").await.unwrap();
        assert_eq!(broker.ready_payloads("q"), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_consume_unknown_queue() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();
        assert!(matches!(
            conn.consume("missing", MANUAL).await,
            Err(BrokerError::Consume { .. })
        ));
    }

    #[tokio::test]
    async fn test_delivery_order_and_ack() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", b"first");
        broker.enqueue("q", b"second");

        let mut conn = broker.connect().await.unwrap();
        let mut sub = conn.consume("q", MANUAL).await.unwrap();

        let first = next(&mut sub).await;
        assert_eq!(first.payload, b"first");
        assert!(!first.redelivered);

        // prefetch of one holds back the second message until the ack
        assert!(is_blocked(&mut sub).await);
        sub.ack(first.tag).await.unwrap();

        let second = next(&mut sub).await;
        assert_eq!(second.payload, b"second");
        sub.ack(second.tag).await.unwrap();
        assert_eq!(broker.unacked_count("q"), 0);
        assert_eq!(broker.ready_count("q"), 0);
    }

    #[tokio::test]
    async fn test_close_requeues_unacked() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", b"first");
        broker.enqueue("q", b"second");

        let mut conn = broker.connect().await.unwrap();
        let mut sub = conn.consume("q", MANUAL).await.unwrap();
        let _ = next(&mut sub).await;
        conn.close().await.unwrap();

        assert_eq!(
            broker.ready_payloads("q"),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        assert!(sub.next_delivery().await.is_none());

        let mut conn = broker.connect().await.unwrap();
        let mut sub = conn.consume("q", MANUAL).await.unwrap();
        let again = next(&mut sub).await;
        assert_eq!(again.payload, b"first");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_drop_connection_requeues() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", b"first");
        {
            let mut conn = broker.connect().await.unwrap();
            let mut sub = conn.consume("q", MANUAL).await.unwrap();
            let _ = next(&mut sub).await;
            assert_eq!(broker.ready_count("q"), 0);
        }
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.ready_count("q"), 1);
    }

    #[tokio::test]
    async fn test_auto_ack_is_not_requeued() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", b"first");
        broker.enqueue("q", b"second");

        let mut conn = broker.connect().await.unwrap();
        let mut sub = conn.consume("q", AUTO).await.unwrap();
        let first = next(&mut sub).await;
        assert_eq!(broker.unacked_count("q"), 0);
        assert!(sub.ack(first.tag).await.is_err());
        conn.close().await.unwrap();

        assert_eq!(broker.ready_payloads("q"), vec![b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_waits_for_publish() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();
        conn.declare_queue("q").await.unwrap();
        let mut sub = conn.consume("q", MANUAL).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.enqueue("q", b"late");
        });

        assert_eq!(next(&mut sub).await.payload, b"late");
    }

    #[tokio::test]
    async fn test_unreachable() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        assert!(matches!(
            broker.connect().await,
            Err(BrokerError::Connection(_))
        ));
        broker.set_reachable(true);
        assert!(broker.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_operations() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(
            conn.declare_queue("q").await,
            Err(BrokerError::Closed)
        ));
        // closing twice is harmless
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_state_across_tasks() {
        let broker = MemoryBroker::new();
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                broker.enqueue("q", &[i]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(broker.ready_count("q"), 8);
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", b"a");
        let mut conn = broker.connect().await.unwrap();
        conn.delete_queue("q").await.unwrap();
        assert!(!broker.has_queue("q"));
    }
}
