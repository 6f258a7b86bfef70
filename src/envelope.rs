use crate::error::Result;
use crate::types::DeviceId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform wrapper around every payload placed on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub body: T,
    pub meta: Meta,
}

/// Envelope metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Unique per message, for consumers that deduplicate
    pub id: Uuid,
    /// Publishing device
    pub source: DeviceId,
    /// Wall-clock publish time, RFC 3339
    pub ts: DateTime<Utc>,
}

impl<T> Envelope<T> {
    /// Wrap a body with a fresh id and the current time
    ///
    /// The body is never inspected here.
    pub fn wrap(source: &DeviceId, body: T) -> Self {
        Self {
            body,
            meta: Meta {
                id: Uuid::new_v4(),
                source: source.clone(),
                ts: Utc::now(),
            },
        }
    }

    /// Get the message id
    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    /// Transform the body while keeping the metadata
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            body: f(self.body),
            meta: self.meta,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to the JSON wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Parse the JSON wire form
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
