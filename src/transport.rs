use crate::error::Result;
use bytes::Bytes;

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Events raised by a transport's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection (re)established; fires again after every reconnect
    Connected,
    /// Connection lost; the transport will try again on its own
    Disconnected(String),
    /// Inbound publish on a subscribed topic
    Message(InboundMessage),
}

/// Message registered with the broker at connect time, published on our behalf
/// if the connection drops without a clean close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// One connection to the broker
///
/// Every call only queues the request with the connection and returns; none
/// of them waits for a network round trip.
pub trait Transport: Send + Sync {
    /// Queue a network-level subscribe
    fn subscribe(&self, topic: &str) -> Result<()>;

    /// Queue a network-level unsubscribe
    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Queue a publish
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Close the connection cleanly; the broker discards the last will
    fn disconnect(&self) -> Result<()>;
}
