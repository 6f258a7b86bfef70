use crate::commands::CommandDispatcher;
use crate::config::Settings;
use crate::controller::Controller;
use crate::error::Result;
use crate::exhibit::{ExhibitEvent, ExhibitNode};
use crate::liveness::LivenessAnnouncer;
use crate::memory::MemoryBroker;
use crate::mqtt::MqttTransport;
use crate::reconcile::{Navigator, TourCache};
use crate::reporter::StateReporter;
use crate::session::{ConnectionState, Session};
use crate::transport::{Transport, TransportEvent};
use crate::types::{DeviceId, ExhibitKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// A connected device
///
/// `SyncClient` owns one broker connection and the task that pumps its
/// events into the session. Exhibits and controllers are attached on top of
/// the session it exposes.
///
/// # Example
///
/// ```no_run
/// use exhibit_sync::config::load_config;
/// use exhibit_sync::{ExhibitKind, SyncClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = load_config()?;
///     let client = SyncClient::connect(&settings)?;
///
///     let (_exhibit, mut events) = client.exhibit(ExhibitKind::Carousel);
///     while let Some(event) = events.recv().await {
///         println!("Render: {:?}", event);
///     }
///
///     client.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct SyncClient {
    session: Arc<Session>,
    pump: JoinHandle<()>,
}

impl SyncClient {
    /// Connect to the MQTT broker named in `settings`
    ///
    /// Must be called from within a tokio runtime. The connection is
    /// established in the background; watch [`SyncClient::connection_state`]
    /// for progress.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let device = DeviceId::generate(&settings.device.prefix);
        let liveness = LivenessAnnouncer::new(settings.device.environment, &device)?;
        let (transport, events) = MqttTransport::connect(&settings.broker, device.as_str(), liveness.will());

        Ok(Self::start(settings, device, liveness, Arc::new(transport), events))
    }

    /// Connect to an in-process broker
    pub fn in_memory(broker: &MemoryBroker, settings: &Settings) -> Result<Self> {
        let device = DeviceId::generate(&settings.device.prefix);
        let liveness = LivenessAnnouncer::new(settings.device.environment, &device)?;
        let (transport, events) = broker.connect(device.as_str(), Some(liveness.will().clone()));

        Ok(Self::start(settings, device, liveness, Arc::new(transport), events))
    }

    fn start(
        settings: &Settings,
        device: DeviceId,
        liveness: LivenessAnnouncer,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        tracing::info!("Starting {} in {}", device, settings.device.environment);
        let session = Arc::new(Session::new(settings.device.environment, device, liveness, transport));
        let pump = session.spawn(events);
        Self { session, pump }
    }

    pub fn device(&self) -> &DeviceId {
        self.session.device()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection_state()
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        self.session.dispatcher()
    }

    pub fn reporter(&self) -> StateReporter {
        self.session.reporter()
    }

    /// Run an exhibit of `kind` on this connection
    ///
    /// The receiver carries the work for the rendering layer. Stop the exhibit
    /// with [`ExhibitNode::detach`] on this client's session registry.
    pub fn exhibit(&self, kind: ExhibitKind) -> (Arc<ExhibitNode>, mpsc::UnboundedReceiver<ExhibitEvent>) {
        let (node, events) = ExhibitNode::new(kind, self.session.reporter());
        node.attach(&self.session.registry());
        (node, events)
    }

    /// Run the roaming controller on this connection
    pub fn controller(&self, navigator: Arc<dyn Navigator>, cache: TourCache) -> Arc<Controller> {
        Controller::attach(self.session.clone(), navigator, cache)
    }

    /// Announce offline, disconnect and stop the event pump
    pub async fn shutdown(self) -> Result<()> {
        let result = self.session.shutdown();

        let mut pump = self.pump;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut pump).await.is_err() {
            pump.abort();
        }
        result
    }
}
