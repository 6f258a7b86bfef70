//! In-process broker
//!
//! Implements the broker semantics the protocol relies on (retained messages,
//! last will, per-topic ordering, session loss on reconnect) without a network.
//! Used for the `local` environment and throughout the test suite. Every
//! request a [`MemoryTransport`] makes is also recorded so callers can assert
//! on the exact network traffic a component produced.

use crate::error::{Result, SyncError};
use crate::transport::{InboundMessage, LastWill, Transport, TransportEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Request recorded by a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Subscribe(String),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnect,
}

struct ClientSlot {
    events: mpsc::UnboundedSender<TransportEvent>,
    subscriptions: HashSet<String>,
    will: Option<LastWill>,
    connected: bool,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientSlot>,
    retained: HashMap<String, Bytes>,
}

impl BrokerState {
    fn route(&mut self, topic: &str, payload: Bytes, retain: bool) {
        if retain {
            if payload.is_empty() {
                self.retained.remove(topic);
            } else {
                self.retained.insert(topic.to_string(), payload.clone());
            }
        }

        for slot in self.clients.values() {
            if !slot.connected {
                continue;
            }
            if slot.subscriptions.iter().any(|filter| rumqttc::matches(topic, filter)) {
                let _ = slot
                    .events
                    .send(TransportEvent::Message(InboundMessage::new(topic, payload.clone())));
            }
        }
    }
}

/// Shared in-process broker; clones refer to the same broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for `client_id`, replacing any previous connection with that id
    ///
    /// The `Connected` event is queued immediately.
    pub fn connect(
        &self,
        client_id: impl Into<String>,
        will: Option<LastWill>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let client_id = client_id.into();
        let (events, rx) = mpsc::unbounded_channel();
        let _ = events.send(TransportEvent::Connected);

        self.state.lock().clients.insert(
            client_id.clone(),
            ClientSlot {
                events,
                subscriptions: HashSet::new(),
                will,
                connected: true,
            },
        );
        tracing::debug!("Memory broker accepted {}", client_id);

        let transport = MemoryTransport {
            client_id,
            state: self.state.clone(),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        (transport, rx)
    }

    /// Drop a connection without a clean close
    ///
    /// The client's last will is published and its broker-side session is lost.
    pub fn drop_connection(&self, client_id: &str) {
        let mut state = self.state.lock();
        let will = match state.clients.get_mut(client_id) {
            Some(slot) if slot.connected => {
                slot.connected = false;
                slot.subscriptions.clear();
                let _ = slot
                    .events
                    .send(TransportEvent::Disconnected("connection lost".to_string()));
                slot.will.clone()
            }
            _ => return,
        };

        if let Some(will) = will {
            tracing::debug!("Publishing last will of {} on {}", client_id, will.topic);
            state.route(&will.topic, Bytes::from(will.payload), will.retain);
        }
    }

    /// Reconnect a dropped client with a fresh broker-side session
    pub fn restore_connection(&self, client_id: &str) {
        let mut state = self.state.lock();
        if let Some(slot) = state.clients.get_mut(client_id) {
            if !slot.connected {
                slot.connected = true;
                let _ = slot.events.send(TransportEvent::Connected);
            }
        }
    }

    /// Current retained payload of a topic
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state.lock().retained.get(topic).cloned()
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.state
            .lock()
            .clients
            .get(client_id)
            .is_some_and(|slot| slot.connected)
    }

    /// Topics the broker currently routes to `client_id`
    pub fn subscriptions(&self, client_id: &str) -> HashSet<String> {
        self.state
            .lock()
            .clients
            .get(client_id)
            .map(|slot| slot.subscriptions.clone())
            .unwrap_or_default()
    }
}

/// Client side of a [`MemoryBroker`] connection
#[derive(Clone)]
pub struct MemoryTransport {
    client_id: String,
    state: Arc<Mutex<BrokerState>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl MemoryTransport {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Every request made through this transport, oldest first
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Topics passed to `subscribe`, oldest first
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// Topics passed to `unsubscribe`, oldest first
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Unsubscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&self, topic: &str) -> Result<()> {
        self.record(TransportCall::Subscribe(topic.to_string()));

        let mut state = self.state.lock();
        let BrokerState { clients, retained } = &mut *state;
        let slot = clients
            .get_mut(&self.client_id)
            .filter(|slot| slot.connected)
            .ok_or(SyncError::ConnectionClosed)?;

        slot.subscriptions.insert(topic.to_string());
        for (retained_topic, payload) in retained.iter() {
            if rumqttc::matches(retained_topic, topic) {
                let _ = slot.events.send(TransportEvent::Message(InboundMessage::new(
                    retained_topic.clone(),
                    payload.clone(),
                )));
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.record(TransportCall::Unsubscribe(topic.to_string()));

        let mut state = self.state.lock();
        let slot = state
            .clients
            .get_mut(&self.client_id)
            .filter(|slot| slot.connected)
            .ok_or(SyncError::ConnectionClosed)?;
        slot.subscriptions.remove(topic);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
            retain,
        });

        let mut state = self.state.lock();
        let connected = state
            .clients
            .get(&self.client_id)
            .is_some_and(|slot| slot.connected);
        if !connected {
            return Err(SyncError::ConnectionClosed);
        }
        state.route(topic, Bytes::from(payload), retain);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.record(TransportCall::Disconnect);

        let mut state = self.state.lock();
        if let Some(slot) = state.clients.get_mut(&self.client_id) {
            if slot.connected {
                slot.connected = false;
                slot.will = None;
                slot.subscriptions.clear();
                let _ = slot
                    .events
                    .send(TransportEvent::Disconnected("client disconnected".to_string()));
            }
        }
        Ok(())
    }
}
