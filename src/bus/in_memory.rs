//! In-memory topic broker for tests and single-process deployments.
//!
//! Models the parts of an AMQP topic exchange the bus client relies on:
//! - queues bound to an exchange by routing pattern (`*` matches one word,
//!   `#` matches zero or more)
//! - durable queues keep messages while no consumer is attached
//! - every connection belongs to an epoch; [`InMemoryBroker::sever`] ends the
//!   epoch, closing open channels and their consumers, just like a dropped
//!   TCP connection
//!
//! ## Example
//!
//! ```
//! use contest_clock::bus::{Channel, Connector, InMemoryBroker};
//!
//! # tokio_test_block(async {
//! let broker = InMemoryBroker::new();
//! let channel = broker.connect("memory://").await.unwrap();
//! channel.declare_queue("contestQueue", true).unwrap();
//! channel.bind_queue("contestQueue", "contestQueue", "contest.*").unwrap();
//! channel.publish("contestQueue", "contest.end", br#"{"id":1}"#).unwrap();
//!
//! assert_eq!(broker.queue_depth("contestQueue"), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BusError, Channel, Connector, Deliveries, Delivery};

/// A message as the broker accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

struct QueueState {
    durable: bool,
    pending: VecDeque<Delivery>,
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

impl QueueState {
    fn deliver(&mut self, delivery: Delivery) {
        if let Some(consumer) = &self.consumer {
            match consumer.send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    self.consumer = None;
                    self.pending.push_back(returned);
                    return;
                }
            }
        }
        self.pending.push_back(delivery);
    }
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

struct BrokerState {
    available: bool,
    epoch: u64,
    connections: u64,
    next_tag: u64,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) {
        let mut targets: Vec<String> = Vec::new();
        for binding in &self.bindings {
            if binding.exchange == exchange
                && topic_matches(&binding.pattern, routing_key)
                && !targets.contains(&binding.queue)
            {
                targets.push(binding.queue.clone());
            }
        }

        for queue in targets {
            self.next_tag += 1;
            let delivery = Delivery {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
                delivery_tag: self.next_tag,
            };
            if let Some(state) = self.queues.get_mut(&queue) {
                state.deliver(delivery);
            }
        }

        self.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
    }
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an available broker with no queues.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                epoch: 0,
                connections: 0,
                next_tag: 0,
                queues: HashMap::new(),
                bindings: Vec::new(),
                published: Vec::new(),
            })),
        }
    }

    /// Make the broker reachable or not. Going unavailable also severs every
    /// open connection; new connection attempts fail until it is back.
    pub fn set_available(&self, available: bool) {
        let was_available = {
            let mut state = self.lock();
            std::mem::replace(&mut state.available, available)
        };
        if was_available && !available {
            self.sever();
        }
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    /// Drop every open connection. Durable queues and their undelivered
    /// messages survive; non-durable queues are deleted.
    pub fn sever(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.queues.retain(|_, queue| queue.durable);
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
        let BrokerState {
            bindings, queues, ..
        } = &mut *state;
        bindings.retain(|binding| queues.contains_key(&binding.queue));
        debug!(epoch = state.epoch, "in-memory broker severed connections");
    }

    /// Publish as an external producer would, outside any client connection.
    pub fn inject(&self, exchange: &str, routing_key: &str, payload: impl AsRef<[u8]>) {
        self.lock().route(exchange, routing_key, payload.as_ref());
    }

    /// Successful connection attempts so far.
    pub fn connections(&self) -> u64 {
        self.lock().connections
    }

    /// Every message accepted by the broker, in acceptance order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Accepted messages with the given routing key.
    pub fn published_with_key(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.lock()
            .queues
            .get(queue)
            .and_then(|q| q.consumer.as_ref())
            .is_some_and(|tx| !tx.is_closed())
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Channel>, BusError> {
        let mut state = self.lock();
        if !state.available {
            return Err(BusError::ConnectionFailed(format!("{url}: broker unavailable")));
        }
        state.connections += 1;
        Ok(Arc::new(InMemoryChannel {
            state: Arc::clone(&self.state),
            epoch: state.epoch,
        }))
    }
}

/// Channel bound to one broker epoch.
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    epoch: u64,
}

impl InMemoryChannel {
    fn open_state(&self) -> Result<MutexGuard<'_, BrokerState>, BusError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.available && state.epoch == self.epoch {
            Ok(state)
        } else {
            Err(BusError::ChannelClosed)
        }
    }
}

impl Channel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.open_state().is_ok()
    }

    fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BusError> {
        let mut state = self.open_state()?;
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState {
                durable,
                pending: VecDeque::new(),
                consumer: None,
            });
        Ok(())
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BusError> {
        let mut state = self.open_state()?;
        if !state.queues.contains_key(queue) {
            return Err(BusError::Rejected(format!("queue {queue} is not declared")));
        }
        let exists = state.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.pattern == routing_key
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: routing_key.to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut state = self.open_state()?;
        state.route(exchange, routing_key, payload);
        Ok(())
    }

    fn consume(&self, queue: &str) -> Result<Deliveries, BusError> {
        let mut state = self.open_state()?;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::Rejected(format!("queue {queue} is not declared")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        while let Some(delivery) = queue_state.pending.pop_front() {
            // The receiver is still in scope, so the send cannot fail.
            let _ = tx.send(delivery);
        }
        queue_state.consumer = Some(tx);
        Ok(rx)
    }
}

/// AMQP topic-exchange matching of `routing_key` against `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &key[1..]),
        (Some(word), Some(part)) => word == part && match_words(&pattern[1..], &key[1..]),
    }
}
