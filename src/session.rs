use crate::commands::CommandDispatcher;
use crate::error::Result;
use crate::liveness::LivenessAnnouncer;
use crate::reporter::StateReporter;
use crate::subscription::SubscriptionRegistry;
use crate::transport::{Transport, TransportEvent};
use crate::types::{DeviceId, Environment};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Connectivity as seen by this device, for the operator's indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
}

/// One device's connection to the broker
///
/// Owns the subscription registry and liveness announcer for the lifetime of
/// the connection and routes transport events to them: a connect announces
/// the device online (and resubscribes after a reconnect), an inbound message
/// is dispatched to the registry.
pub struct Session {
    device: DeviceId,
    environment: Environment,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    liveness: LivenessAnnouncer,
    connected_before: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
}

impl Session {
    /// Create a session over a transport that was connected with `liveness.will()`
    pub fn new(
        environment: Environment,
        device: DeviceId,
        liveness: LivenessAnnouncer,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            device,
            environment,
            registry: Arc::new(SubscriptionRegistry::new(transport.clone())),
            transport,
            liveness,
            connected_before: AtomicBool::new(false),
            state_tx,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Subscription registry shared by every listener on this connection
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn liveness(&self) -> &LivenessAnnouncer {
        &self.liveness
    }

    /// Dispatcher that publishes commands as this device
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.device.clone(), self.transport.clone())
    }

    /// Reporter that publishes exhibit state as this device
    pub fn reporter(&self) -> StateReporter {
        StateReporter::new(self.device.clone(), self.transport.clone())
    }

    /// Watch connectivity changes
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// React to one transport event
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                tracing::info!("{} connected", self.device);
                if self.connected_before.swap(true, Ordering::SeqCst) {
                    self.registry.resubscribe_all();
                }
                if let Err(e) = self.liveness.announce_online(self.transport.as_ref()) {
                    tracing::warn!("Failed to announce {} online: {}", self.device, e);
                }
                self.state_tx.send_replace(ConnectionState::Connected);
            }
            TransportEvent::Disconnected(reason) => {
                tracing::warn!("{} disconnected: {}", self.device, reason);
                self.state_tx.send_replace(ConnectionState::Disconnected(reason));
            }
            TransportEvent::Message(message) => {
                tracing::debug!("Received message on {}", message.topic);
                self.registry.dispatch(&message);
            }
        }
    }

    /// Handle every event already queued, without waiting
    ///
    /// Returns the number of events handled.
    pub fn process_pending(&self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Spawn the task that handles events until the transport goes away
    pub fn spawn(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_event(event);
            }
            tracing::debug!("Event stream closed for {}", session.device);
        })
    }

    /// Announce offline and close the connection cleanly
    pub fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.liveness.announce_offline(self.transport.as_ref()) {
            tracing::warn!("Failed to announce {} offline: {}", self.device, e);
        }
        self.transport.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::memory::{MemoryBroker, MemoryTransport, TransportCall};
    use crate::protocol::{Availability, AvailabilityStatus};
    use crate::subscription::Handler;
    use crate::transport::InboundMessage;
    use parking_lot::Mutex;

    fn session(
        broker: &MemoryBroker,
        name: &str,
    ) -> (Arc<Session>, MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let device = DeviceId::new(name);
        let liveness = LivenessAnnouncer::new(Environment::Local, &device).unwrap();
        let (transport, rx) = broker.connect(name, Some(liveness.will().clone()));
        let session = Session::new(Environment::Local, device, liveness, Arc::new(transport.clone()));
        (Arc::new(session), transport, rx)
    }

    fn availability(broker: &MemoryBroker, session: &Session) -> AvailabilityStatus {
        let payload = broker.retained(session.liveness().topic()).unwrap();
        Envelope::<Availability>::from_slice(&payload).unwrap().body.status
    }

    #[test]
    fn connect_announces_online() {
        let broker = MemoryBroker::new();
        let (session, _transport, mut rx) = session(&broker, "kiosk");

        session.process_pending(&mut rx);

        assert_eq!(availability(&broker, &session), AvailabilityStatus::Online);
        assert_eq!(*session.connection_state().borrow(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_resubscribes_and_keeps_handlers() {
        let broker = MemoryBroker::new();
        let (session, transport, mut rx) = session(&broker, "kiosk");
        session.process_pending(&mut rx);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handler = Handler::new(move |message: &InboundMessage| {
            sink.lock().push(message.payload.clone());
            Ok(())
        });
        let registry = session.registry();
        registry.subscribe("a", &handler);
        registry.subscribe("b", &handler);

        broker.drop_connection("kiosk");
        session.process_pending(&mut rx);
        assert!(matches!(
            *session.connection_state().borrow(),
            ConnectionState::Disconnected(_)
        ));
        assert_eq!(availability(&broker, &session), AvailabilityStatus::Offline);

        transport.clear_calls();
        broker.restore_connection("kiosk");
        session.process_pending(&mut rx);

        let mut resubscribed = transport.subscribe_calls();
        resubscribed.sort();
        assert_eq!(resubscribed, vec!["a", "b"]);
        assert_eq!(availability(&broker, &session), AvailabilityStatus::Online);

        let (other, _) = broker.connect("other", None);
        other.publish("a", b"after".to_vec(), false).unwrap();
        session.process_pending(&mut rx);
        assert_eq!(received.lock().as_slice(), &[bytes::Bytes::from_static(b"after")]);
    }

    #[test]
    fn first_connect_does_not_resubscribe() {
        let broker = MemoryBroker::new();
        let (session, transport, mut rx) = session(&broker, "kiosk");
        session.registry().subscribe("a", &Handler::new(|_| Ok(())));

        session.process_pending(&mut rx);
        assert_eq!(transport.subscribe_calls(), vec!["a"]);
    }

    #[test]
    fn shutdown_announces_offline_then_disconnects() {
        let broker = MemoryBroker::new();
        let (session, transport, mut rx) = session(&broker, "kiosk");
        session.process_pending(&mut rx);
        transport.clear_calls();

        session.shutdown().unwrap();

        let calls = transport.calls();
        assert!(matches!(calls.first(), Some(TransportCall::Publish { retain: true, .. })));
        assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
        assert_eq!(availability(&broker, &session), AvailabilityStatus::Offline);
    }

    #[tokio::test]
    async fn spawned_pump_reports_connectivity() {
        let broker = MemoryBroker::new();
        let (session, _transport, rx) = session(&broker, "kiosk");
        let mut state = session.connection_state();
        let _pump = session.spawn(rx);

        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }
}
