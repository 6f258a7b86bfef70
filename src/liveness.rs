//! Birth and death announcements
//!
//! A device registers a retained `offline` envelope as its last will when it
//! connects, then publishes a retained `online` envelope. If the connection
//! drops without a clean close the broker publishes the will, so observers
//! always converge on the truth.

use crate::envelope::Envelope;
use crate::error::{Result, SyncError};
use crate::protocol::{Availability, AvailabilityStatus};
use crate::topic::Topic;
use crate::transport::{LastWill, Transport};
use crate::types::{DeviceId, Environment};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Publishes presence for one device
pub struct LivenessAnnouncer {
    device: DeviceId,
    topic: String,
    retain: bool,
    will: LastWill,
}

impl LivenessAnnouncer {
    /// Compose the announcer and its last will for `device`
    ///
    /// Fails with `InvalidPayload` if the device id cannot be a single topic
    /// level, i.e. it is empty or contains `/`, `+` or `#`.
    pub fn new(environment: Environment, device: &DeviceId) -> Result<Self> {
        let id = device.as_str();
        if id.is_empty() || id.contains(['/', '+', '#']) {
            return Err(SyncError::InvalidPayload(format!(
                "device id {:?} is not a valid topic level",
                id
            )));
        }

        let availability = Topic::availability(environment, device);
        let topic = availability.to_string();
        if !rumqttc::valid_topic(&topic) {
            return Err(SyncError::InvalidPayload(format!("invalid availability topic {:?}", topic)));
        }

        let retain = availability.is_retained();
        let payload = Envelope::wrap(device, Availability::offline()).to_bytes()?;

        Ok(Self {
            device: device.clone(),
            will: LastWill {
                topic: topic.clone(),
                payload,
                retain,
            },
            topic,
            retain,
        })
    }

    /// Availability topic of this device
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Last will to register with the broker before connecting
    pub fn will(&self) -> &LastWill {
        &self.will
    }

    /// Publish retained `online`
    ///
    /// A failure is returned to the caller; the next reconnect announces again.
    pub fn announce_online(&self, transport: &dyn Transport) -> Result<()> {
        tracing::info!("Announcing {} online", self.device);
        self.publish(transport, Availability::online())
    }

    /// Publish retained `offline` ahead of a graceful shutdown
    pub fn announce_offline(&self, transport: &dyn Transport) -> Result<()> {
        tracing::info!("Announcing {} offline", self.device);
        self.publish(transport, Availability::offline())
    }

    fn publish(&self, transport: &dyn Transport, availability: Availability) -> Result<()> {
        let payload = Envelope::wrap(&self.device, availability).to_bytes()?;
        transport.publish(&self.topic, payload, self.retain)
    }
}

/// Last observed availability per availability topic
///
/// Repeated `online` announcements (one per reconnect) are reported as no
/// change.
#[derive(Default)]
pub struct AvailabilityTracker {
    statuses: Mutex<HashMap<String, AvailabilityStatus>>,
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status; returns `true` if it differs from the previous one
    pub fn observe(&self, topic: &str, status: AvailabilityStatus) -> bool {
        let previous = self.statuses.lock().insert(topic.to_string(), status);
        previous != Some(status)
    }

    pub fn status(&self, topic: &str) -> Option<AvailabilityStatus> {
        self.statuses.lock().get(topic).copied()
    }
}
