use crate::envelope::Envelope;
use crate::error::Result;
use crate::protocol::ExhibitState;
use crate::topic::Topic;
use crate::transport::Transport;
use crate::types::{DeviceId, ExhibitKind};
use std::sync::Arc;

/// Publishes an exhibit's own state
///
/// The exhibit is the only writer of its state topic. The full state is
/// republished retained on every change, so a new subscriber never merges
/// deltas and always sees the current value immediately.
#[derive(Clone)]
pub struct StateReporter {
    source: DeviceId,
    transport: Arc<dyn Transport>,
}

impl StateReporter {
    pub fn new(source: DeviceId, transport: Arc<dyn Transport>) -> Self {
        Self { source, transport }
    }

    /// Publish the complete current state, retained
    pub fn report_state(&self, kind: ExhibitKind, state: &ExhibitState) -> Result<()> {
        let topic = Topic::exhibit_state(kind);
        let payload = Envelope::wrap(&self.source, state).to_bytes()?;
        tracing::debug!(
            "Reporting {} at beat {:?} (tour {:?})",
            kind,
            state.beat_id,
            state.tour_id
        );
        self.transport.publish(&topic.to_string(), payload, topic.is_retained())
    }

    /// Remove the retained state of an exhibit
    pub fn clear_state(&self, kind: ExhibitKind) -> Result<()> {
        let topic = Topic::exhibit_state(kind);
        tracing::info!("Clearing retained state on {}", topic);
        self.transport.publish(&topic.to_string(), Vec::new(), topic.is_retained())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, TransportCall};

    #[test]
    fn state_is_published_retained_and_whole() {
        let broker = MemoryBroker::new();
        let (transport, _rx) = broker.connect("basecamp-1", None);
        let reporter = StateReporter::new(DeviceId::new("basecamp-1"), Arc::new(transport.clone()));

        let state = ExhibitState {
            beat_id: "beat-2".into(),
            tour_id: Some("tour-002".into()),
            ..ExhibitState::default()
        };
        reporter.report_state(ExhibitKind::Basecamp, &state).unwrap();

        assert!(matches!(
            transport.calls().as_slice(),
            [TransportCall::Publish { topic, retain: true, .. }] if topic == "state/basecamp"
        ));

        let retained = broker.retained("state/basecamp").unwrap();
        let envelope = Envelope::<ExhibitState>::from_slice(&retained).unwrap();
        assert_eq!(envelope.body, state);
        assert_eq!(envelope.meta.source, DeviceId::new("basecamp-1"));
    }

    #[test]
    fn clear_removes_retained_value() {
        let broker = MemoryBroker::new();
        let (transport, _rx) = broker.connect("carousel-1", None);
        let reporter = StateReporter::new(DeviceId::new("carousel-1"), Arc::new(transport));

        reporter
            .report_state(ExhibitKind::Carousel, &ExhibitState::default())
            .unwrap();
        reporter.clear_state(ExhibitKind::Carousel).unwrap();

        assert!(broker.retained("state/carousel").is_none());
    }
}
