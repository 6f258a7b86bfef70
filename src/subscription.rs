//! Subscription multiplexer
//!
//! Many independent listeners share one transport connection through a
//! [`SubscriptionRegistry`]. The registry reference-counts interest per topic:
//! the first handler on a topic issues the network subscribe, the last one to
//! leave issues the network unsubscribe, and a reconnect re-issues a subscribe
//! for every topic still of interest.

use crate::error::{Result, SyncError};
use crate::transport::{InboundMessage, Transport};
use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type HandlerFn = dyn Fn(&InboundMessage) -> Result<()> + Send + Sync;

/// Callback invoked for each message on a subscribed topic
///
/// Clones share identity: registering a clone of a handler that is already
/// registered on a topic does not add a second delivery.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&InboundMessage) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, message: &InboundMessage) -> Result<()> {
        (self.0)(message)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.addr()).finish()
    }
}

/// Topic → handlers map for one connection
pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    topics: Mutex<HashMap<String, Vec<Handler>>>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` on `topic`
    ///
    /// The first handler on a topic issues a network subscribe. A failed
    /// subscribe is logged and the topic stays registered, so the next
    /// reconnect retries it.
    pub fn subscribe(&self, topic: &str, handler: &Handler) {
        let mut topics = self.topics.lock();
        let handlers = topics.entry(topic.to_string()).or_default();
        if handlers.contains(handler) {
            tracing::debug!("Handler already registered on {}", topic);
            return;
        }

        let first = handlers.is_empty();
        handlers.push(handler.clone());

        if first {
            tracing::debug!("Subscribing to {}", topic);
            if let Err(e) = self.transport.subscribe(topic) {
                tracing::warn!("Network subscribe to {} failed: {}", topic, e);
            }
        }
    }

    /// Remove `handler` from `topic`
    ///
    /// When the last handler leaves, the topic is dropped and a network
    /// unsubscribe is issued. Local bookkeeping is dropped even if that call
    /// fails.
    pub fn unsubscribe(&self, topic: &str, handler: &Handler) {
        let mut topics = self.topics.lock();
        let Some(handlers) = topics.get_mut(topic) else {
            return;
        };

        handlers.retain(|h| h != handler);
        if !handlers.is_empty() {
            return;
        }

        topics.remove(topic);
        tracing::debug!("Unsubscribing from {}", topic);
        if let Err(e) = self.transport.unsubscribe(topic) {
            tracing::warn!("Network unsubscribe from {} failed: {}", topic, e);
        }
    }

    /// Re-issue a network subscribe for every registered topic
    ///
    /// Called after a reconnect, when the broker may have lost the session.
    /// Returns the number of topics resubscribed.
    pub fn resubscribe_all(&self) -> usize {
        let topics = self.topics.lock();
        for topic in topics.keys() {
            if let Err(e) = self.transport.subscribe(topic) {
                tracing::warn!("Resubscribe to {} failed: {}", topic, e);
            }
        }
        if !topics.is_empty() {
            tracing::info!("Resubscribed to {} topic(s)", topics.len());
        }
        topics.len()
    }

    /// Deliver a message to every handler registered on a matching topic
    ///
    /// Handlers run against a snapshot of the registry, so they may subscribe
    /// or unsubscribe freely. A handler that errors or panics is logged and
    /// does not stop the others. A handler registered on several matching
    /// filters runs once. Returns the number of handlers invoked.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let mut snapshot: Vec<Handler> = Vec::new();
        {
            let topics = self.topics.lock();
            let matching = topics
                .iter()
                .filter(|(filter, _)| rumqttc::matches(&message.topic, filter))
                .flat_map(|(_, handlers)| handlers.iter());
            for handler in matching {
                if !snapshot.contains(handler) {
                    snapshot.push(handler.clone());
                }
            }
        }

        if snapshot.is_empty() {
            tracing::debug!("No handlers for {}", message.topic);
        }

        for handler in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.call(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Handler for {} failed: {}", message.topic, e);
                }
                Err(_) => {
                    tracing::error!("Handler for {} panicked", message.topic);
                }
            }
        }

        snapshot.len()
    }

    /// Topics with at least one handler
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of handlers registered on `topic`
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Subscribe with a channel instead of a callback
    ///
    /// The returned receiver unregisters itself when dropped.
    pub fn subscribe_channel(self: &Arc<Self>, topic: &str) -> TopicReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Handler::new(move |message| {
            tx.send(message.clone())
                .map_err(|_| SyncError::Handler("receiver dropped".to_string()))
        });
        self.subscribe(topic, &handler);

        TopicReceiver {
            rx,
            topic: topic.to_string(),
            handler,
            registry: Arc::downgrade(self),
        }
    }
}

/// Receiver for messages on one topic
pub struct TopicReceiver {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    topic: String,
    handler: Handler,
    registry: Weak<SubscriptionRegistry>,
}

impl TopicReceiver {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next message
    ///
    /// Returns `ConnectionClosed` once the registry has been dropped.
    pub async fn recv(&mut self) -> Result<InboundMessage> {
        self.rx.recv().await.ok_or(SyncError::ConnectionClosed)
    }

    /// Try to receive a message without waiting
    ///
    /// Returns `None` if no message is available.
    pub fn try_recv(&mut self) -> Result<Option<InboundMessage>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SyncError::ConnectionClosed),
        }
    }
}

impl Stream for TopicReceiver {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TopicReceiver {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.topic, &self.handler);
        }
    }
}
