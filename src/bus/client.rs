//! Backlogging bus client with a reconnecting supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    Backlog, BusError, Channel, Connector, Deliveries, EventPublisher, MessageHandler,
    OutboundMessage, OverflowPolicy,
};

/// Connection supervision and backlog settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// How often an idle connection is checked for liveness.
    pub heartbeat: Duration,
    /// First delay between reconnect attempts.
    pub reconnect_initial: Duration,
    /// Upper bound for the doubling reconnect delay.
    pub reconnect_max: Duration,
    /// Backlog size limit; `None` keeps it unbounded.
    pub backlog_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            backlog_capacity: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl BusConfig {
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max.max(initial);
        self
    }

    pub fn with_backlog_capacity(mut self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.backlog_capacity = Some(capacity);
        self.overflow = overflow;
        self
    }

    fn backlog(&self) -> Backlog {
        match self.backlog_capacity {
            Some(capacity) => Backlog::bounded(capacity, self.overflow),
            None => Backlog::unbounded(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or the connection was lost; publishes are backlogged.
    Disconnected,
    Connected,
}

#[derive(Clone)]
struct Subscription {
    queue: String,
    exchange: String,
    routing_keys: Vec<String>,
    handler: Arc<dyn MessageHandler>,
}

struct Link {
    state: ConnectionState,
    channel: Option<Arc<dyn Channel>>,
    backlog: Backlog,
}

impl Link {
    fn mark_lost(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.channel = None;
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: BusConfig,
    url: Mutex<Option<String>>,
    link: Mutex<Link>,
    subscriptions: Mutex<Vec<Subscription>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    wake: Notify,
    closed: AtomicBool,
}

/// Client for one broker connection.
///
/// `publish` never blocks on the broker: while the connection is down (not
/// yet established, or lost) messages go to an in-memory backlog, which is
/// replayed in order on reconnect before any newer message is sent.
///
/// Consumption is at-most-once. Deliveries are acknowledged on receipt, so a
/// handler that fails does not get the message again; handlers must be
/// idempotent and treat a lost message as possible.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<Inner>,
}

impl BusClient {
    pub fn new(connector: impl Connector, config: BusConfig) -> Self {
        let backlog = config.backlog();
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                config,
                url: Mutex::new(None),
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    channel: None,
                    backlog,
                }),
                subscriptions: Mutex::new(Vec::new()),
                consumers: Mutex::new(Vec::new()),
                supervisor: Mutex::new(None),
                wake: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to `url` and start supervising the connection.
    ///
    /// A failed first attempt is not an error: the client stays
    /// [`ConnectionState::Disconnected`], backlogs publishes, and keeps
    /// retrying in the background. The returned state says which case
    /// applies.
    pub async fn connect(&self, url: impl Into<String>) -> Result<ConnectionState, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let url = url.into();
        *lock(&self.inner.url) = Some(url.clone());

        if let Err(e) = self.inner.establish().await {
            warn!(%url, error = %e, "initial broker connection failed; retrying in background");
        }

        let mut supervisor = lock(&self.inner.supervisor);
        if supervisor.is_none() {
            let weak = Arc::downgrade(&self.inner);
            *supervisor = Some(tokio::spawn(supervise(weak, self.inner.config.clone())));
        }
        drop(supervisor);

        Ok(self.state())
    }

    /// Publish `payload`, or backlog it if the broker cannot take it now.
    ///
    /// Returns `Ok` once the message is sent or queued. The only error is a
    /// full backlog under [`OverflowPolicy::RejectNew`].
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let msg = OutboundMessage::new(exchange, routing_key, payload);
        let mut link = lock(&self.inner.link);

        // Newer messages never overtake the backlog.
        if link.state == ConnectionState::Connected && link.backlog.is_empty() {
            if let Some(channel) = link.channel.clone() {
                match channel.publish(&msg.exchange, &msg.routing_key, &msg.payload) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        warn!(exchange, routing_key, error = %e, "publish failed; connection marked lost");
                        link.mark_lost();
                        self.inner.wake.notify_one();
                    }
                }
            }
        }

        self.inner.push_backlog(&mut link, msg)
    }

    /// Encode `event` as JSON and [`publish`](Self::publish) it.
    pub fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        event: &T,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_vec(event)?;
        self.publish(exchange, routing_key, payload)
    }

    /// Publish only if connected with an empty backlog; never backlogs.
    pub fn try_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BusError> {
        let mut link = lock(&self.inner.link);
        if link.state != ConnectionState::Connected || !link.backlog.is_empty() {
            return Err(BusError::NotConnected);
        }
        let channel = link.channel.clone().ok_or(BusError::NotConnected)?;
        channel.publish(exchange, routing_key, payload).map_err(|e| {
            if e.is_connection_loss() {
                link.mark_lost();
                self.inner.wake.notify_one();
            }
            e
        })
    }

    /// Consume from a durable queue named after `exchange`, bound to each of
    /// `routing_keys`. The handler sees deliveries in order and dispatches on
    /// [`Delivery::routing_key`](super::Delivery::routing_key).
    ///
    /// The subscription is re-established after every reconnect. Subscribing
    /// while disconnected is allowed; setup happens on the next connection.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        exchange: &str,
        routing_keys: &[&str],
        handler: H,
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let subscription = Subscription {
            queue: exchange.to_string(),
            exchange: exchange.to_string(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
            handler: Arc::new(handler),
        };

        // Registration and the state check happen under the link lock, so a
        // reconnect in progress either sees this subscription or finishes
        // before it and leaves setup to us.
        let mut link = lock(&self.inner.link);
        {
            let mut subscriptions = lock(&self.inner.subscriptions);
            if subscriptions.iter().any(|s| s.queue == subscription.queue) {
                return Err(BusError::AlreadySubscribed(subscription.queue));
            }
            subscriptions.push(subscription.clone());
        }

        let channel = match link.state {
            ConnectionState::Connected => link.channel.clone(),
            ConnectionState::Disconnected => None,
        };
        if let Some(channel) = channel {
            match self.inner.setup(&channel, &subscription) {
                Ok(consumer) => self.inner.track(vec![consumer]),
                Err(e) => {
                    warn!(queue = %subscription.queue, error = %e, "subscription setup failed; will retry on reconnect");
                    link.mark_lost();
                    self.inner.wake.notify_one();
                }
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.link).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn backlog_len(&self) -> usize {
        lock(&self.inner.link).backlog.len()
    }

    /// Messages discarded by the backlog overflow policy.
    pub fn backlog_dropped(&self) -> u64 {
        lock(&self.inner.link).backlog.dropped()
    }

    /// Stop supervising and consuming. Anything still backlogged is lost.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.supervisor).take() {
            handle.abort();
        }
        for handle in lock(&self.inner.consumers).drain(..) {
            handle.abort();
        }
        let mut link = lock(&self.inner.link);
        if !link.backlog.is_empty() {
            warn!(pending = link.backlog.len(), "bus client closed with undelivered messages");
        }
        link.mark_lost();
        self.inner.wake.notify_one();
    }
}

impl EventPublisher for BusClient {
    fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        BusClient::publish(self, exchange, routing_key, payload)
    }
}

impl Inner {
    fn push_backlog(&self, link: &mut Link, msg: OutboundMessage) -> Result<(), BusError> {
        let routing_key = msg.routing_key.clone();
        match link.backlog.enqueue(msg)? {
            Some(evicted) => warn!(
                evicted_key = %evicted.routing_key,
                enqueued_at = %evicted.enqueued_at,
                "backlog full; dropped oldest message"
            ),
            None => debug!(%routing_key, pending = link.backlog.len(), "message backlogged"),
        }
        Ok(())
    }

    /// Open a channel, restore subscriptions, replay the backlog, and only
    /// then let new publishes through.
    ///
    /// Consumers started by a failed attempt are aborted so the retry does
    /// not run two consumers on one queue.
    async fn establish(self: &Arc<Self>) -> Result<(), BusError> {
        let url = lock(&self.url).clone().ok_or(BusError::NotConnected)?;
        let channel = self.connector.connect(&url).await?;

        let mut started = Vec::new();
        match self.restore(&channel, &mut started) {
            Ok(replayed) => {
                self.track(started);
                info!(replayed, "connected to message broker");
                Ok(())
            }
            Err(e) => {
                for consumer in started {
                    consumer.abort();
                }
                Err(e)
            }
        }
    }

    fn restore(
        self: &Arc<Self>,
        channel: &Arc<dyn Channel>,
        started: &mut Vec<JoinHandle<()>>,
    ) -> Result<usize, BusError> {
        let known = lock(&self.subscriptions).clone();
        for subscription in &known {
            started.push(self.setup(channel, subscription)?);
        }

        let mut link = lock(&self.link);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        // Subscribed while the ones above were being set up.
        let added: Vec<Subscription> = lock(&self.subscriptions)
            .iter()
            .filter(|s| !known.iter().any(|k| k.queue == s.queue))
            .cloned()
            .collect();
        for subscription in &added {
            started.push(self.setup(channel, subscription)?);
        }

        let report = link
            .backlog
            .drain(|msg| channel.publish(&msg.exchange, &msg.routing_key, &msg.payload));
        if let Some(e) = report.error {
            warn!(
                delivered = report.delivered,
                remaining = report.remaining,
                error = %e,
                "backlog replay interrupted"
            );
            link.mark_lost();
            return Err(e);
        }

        link.channel = Some(Arc::clone(channel));
        link.state = ConnectionState::Connected;
        Ok(report.delivered)
    }

    /// Declare, bind and start consuming. The caller owns the returned
    /// consumer until it hands it to [`Inner::track`].
    fn setup(
        self: &Arc<Self>,
        channel: &Arc<dyn Channel>,
        subscription: &Subscription,
    ) -> Result<JoinHandle<()>, BusError> {
        channel.declare_queue(&subscription.queue, true)?;
        for key in &subscription.routing_keys {
            channel.bind_queue(&subscription.queue, &subscription.exchange, key)?;
        }
        let deliveries = channel.consume(&subscription.queue)?;
        debug!(queue = %subscription.queue, keys = ?subscription.routing_keys, "subscription established");
        Ok(tokio::spawn(consume(
            Arc::downgrade(self),
            subscription.queue.clone(),
            deliveries,
            Arc::clone(&subscription.handler),
        )))
    }

    fn track(&self, started: Vec<JoinHandle<()>>) {
        let mut consumers = lock(&self.consumers);
        consumers.retain(|h| !h.is_finished());
        consumers.extend(started);
    }

    /// True when the link claims to be connected and the channel agrees.
    /// A dead channel is demoted to disconnected here.
    fn check_health(&self) -> bool {
        let mut link = lock(&self.link);
        match (&link.state, &link.channel) {
            (ConnectionState::Connected, Some(channel)) if channel.is_open() => true,
            (ConnectionState::Connected, _) => {
                warn!("broker connection lost");
                link.mark_lost();
                false
            }
            (ConnectionState::Disconnected, _) => false,
        }
    }
}

async fn supervise(inner: Weak<Inner>, config: BusConfig) {
    let mut backoff = config.reconnect_initial;
    loop {
        let Some(client) = inner.upgrade() else { break };
        if client.closed.load(Ordering::SeqCst) {
            break;
        }

        if client.check_health() {
            backoff = config.reconnect_initial;
            tokio::select! {
                _ = client.wake.notified() => {}
                _ = tokio::time::sleep(config.heartbeat) => {}
            }
            continue;
        }

        match client.establish().await {
            Ok(()) => backoff = config.reconnect_initial,
            Err(e) => {
                debug!(error = %e, retry_in = ?backoff, "reconnect attempt failed");
                drop(client);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.reconnect_max);
            }
        }
    }
}

async fn consume(
    inner: Weak<Inner>,
    queue: String,
    mut deliveries: Deliveries,
    handler: Arc<dyn MessageHandler>,
) {
    while let Some(delivery) = deliveries.recv().await {
        let routing_key = delivery.routing_key.clone();
        let tag = delivery.delivery_tag;
        // Already acknowledged: a failure here loses the message.
        if let Err(e) = handler.handle(delivery).await {
            error!(%queue, %routing_key, delivery_tag = tag, error = %e, "message handler failed");
        }
    }
    debug!(%queue, "consumer stopped");
    if let Some(inner) = inner.upgrade() {
        inner.wake.notify_one();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
