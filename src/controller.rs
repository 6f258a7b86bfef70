//! Roaming controller wiring
//!
//! A [`Controller`] listens on one session for everything the operator UI
//! needs: the authority's snapshot (fed to the [`Reconciler`]), its error
//! channel, sync status, exhibit state reports and device availability. Each
//! of those is turned into a [`ControllerEvent`] on a broadcast channel.
//!
//! Route changes decided by the reconciler are applied through the
//! [`Navigator`] only after the reconciler lock is released, so navigation
//! callbacks may query the controller.

use crate::commands::CommandDispatcher;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::liveness::AvailabilityTracker;
use crate::protocol::{Availability, AvailabilityStatus, AuthorityError, ExhibitState, SyncPhase, SyncStatus};
use crate::reconcile::{Navigator, ReconcileOutcome, ReconcileState, Reconciler, RefreshTicket, TourCache};
use crate::session::Session;
use crate::subscription::Handler;
use crate::topic::Topic;
use crate::transport::InboundMessage;
use crate::types::{DeviceId, ExhibitKind, Tour};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notification for the operator UI
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// An authority snapshot was applied
    Reconciled(ReconcileOutcome),
    /// Error reported by the authority; shown to the operator, never retried
    AuthorityError(AuthorityError),
    SyncStatus(SyncPhase),
    /// The authority finished a sync; fetch the tour list and hand it to
    /// [`Controller::complete_refresh`] with this ticket
    RefreshRequested(RefreshTicket),
    /// An exhibit reported (or cleared, with `None`) its state
    ExhibitState {
        kind: ExhibitKind,
        state: Option<ExhibitState>,
    },
    /// A device's availability changed
    Availability {
        device: DeviceId,
        status: AvailabilityStatus,
    },
}

/// Controller side of the protocol, attached to one session
pub struct Controller {
    session: Arc<Session>,
    handler: Handler,
    navigator: Arc<dyn Navigator>,
    reconciler: Mutex<Reconciler>,
    availability: AvailabilityTracker,
    exhibits: Mutex<BTreeMap<ExhibitKind, ExhibitState>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl Controller {
    /// Attach a controller to `session` with an empty reconciliation state
    pub fn attach(session: Arc<Session>, navigator: Arc<dyn Navigator>, cache: TourCache) -> Arc<Self> {
        Self::with_reconciler(session, navigator, Reconciler::new(cache))
    }

    /// Attach a controller with a prepared reconciler
    pub fn with_reconciler(
        session: Arc<Session>,
        navigator: Arc<dyn Navigator>,
        reconciler: Reconciler,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let controller = Arc::new_cyclic(|weak: &Weak<Controller>| {
            let weak = weak.clone();
            let handler = Handler::new(move |message| match weak.upgrade() {
                Some(controller) => controller.handle_message(message),
                None => Ok(()),
            });
            Controller {
                session,
                handler,
                navigator,
                reconciler: Mutex::new(reconciler),
                availability: AvailabilityTracker::new(),
                exhibits: Mutex::new(BTreeMap::new()),
                events,
            }
        });

        let registry = controller.session.registry();
        for topic in controller.topics() {
            registry.subscribe(&topic, &controller.handler);
        }
        controller
    }

    /// Topics (and filters) the controller listens on
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![
            Topic::AuthoritySnapshot.to_string(),
            Topic::AuthorityError.to_string(),
            Topic::SyncStatus.to_string(),
            Topic::availability_filter(self.session.environment()),
        ];
        topics.extend(ExhibitKind::ALL.map(|kind| Topic::exhibit_state(kind).to_string()));
        topics
    }

    /// Stop listening; the session stays connected
    pub fn detach(&self) {
        let registry = self.session.registry();
        for topic in self.topics() {
            registry.unsubscribe(&topic, &self.handler);
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Dispatcher for operator commands
    pub fn dispatcher(&self) -> CommandDispatcher {
        self.session.dispatcher()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn active_tour(&self) -> Option<String> {
        self.reconciler.lock().active_tour().map(str::to_string)
    }

    pub fn reconcile_state(&self) -> ReconcileState {
        self.reconciler.lock().state()
    }

    /// Last state reported by an exhibit
    pub fn exhibit_state(&self, kind: ExhibitKind) -> Option<ExhibitState> {
        self.exhibits.lock().get(&kind).cloned()
    }

    /// Last observed availability of a device in this session's environment
    pub fn device_availability(&self, device: &DeviceId) -> Option<AvailabilityStatus> {
        let topic = Topic::availability(self.session.environment(), device).to_string();
        self.availability.status(&topic)
    }

    /// Start a tour list refresh outside of a sync notification
    pub fn begin_refresh(&self) -> RefreshTicket {
        self.reconciler.lock().begin_refresh()
    }

    /// Hand a fetched tour list to the reconciler
    ///
    /// Returns `None` if a newer refresh has started since `ticket`.
    pub fn complete_refresh(&self, ticket: RefreshTicket, tours: Vec<Tour>) -> Option<ReconcileOutcome> {
        let current = self.navigator.current_path();
        let outcome = self.reconciler.lock().complete_refresh(ticket, tours, &current)?;
        self.follow(&outcome);
        self.emit(ControllerEvent::Reconciled(outcome.clone()));
        Some(outcome)
    }

    /// Apply the route change of `outcome`; the reconciler must not be locked
    fn follow(&self, outcome: &ReconcileOutcome) {
        if let Some(path) = outcome.navigation() {
            tracing::debug!("Navigating to {}", path);
            self.navigator.navigate(path);
        }
    }

    fn handle_message(&self, message: &InboundMessage) -> Result<()> {
        match Topic::parse(&message.topic)? {
            Topic::AuthoritySnapshot => {
                let current = self.navigator.current_path();
                let outcome = self.reconciler.lock().ingest(&message.payload, &current);
                self.follow(&outcome);
                if !matches!(outcome, ReconcileOutcome::Discarded | ReconcileOutcome::Duplicate) {
                    self.emit(ControllerEvent::Reconciled(outcome));
                }
            }
            Topic::AuthorityError => {
                let error = Envelope::<AuthorityError>::from_slice(&message.payload)?.body;
                tracing::warn!("Authority reported {}: {}", error.code, error.detail);
                self.emit(ControllerEvent::AuthorityError(error));
            }
            Topic::SyncStatus => {
                let phase = Envelope::<SyncStatus>::from_slice(&message.payload)?.body.status;
                tracing::info!("Authority sync status {:?}", phase);
                self.emit(ControllerEvent::SyncStatus(phase));
                if phase == SyncPhase::SyncComplete {
                    let ticket = self.begin_refresh();
                    self.emit(ControllerEvent::RefreshRequested(ticket));
                }
            }
            Topic::ExhibitState(kind) => {
                let state = if message.payload.is_empty() {
                    self.exhibits.lock().remove(&kind);
                    None
                } else {
                    let state = Envelope::<ExhibitState>::from_slice(&message.payload)?.body;
                    self.exhibits.lock().insert(kind, state.clone());
                    Some(state)
                };
                self.emit(ControllerEvent::ExhibitState { kind, state });
            }
            Topic::Availability { device, .. } => {
                let status = Envelope::<Availability>::from_slice(&message.payload)?.body.status;
                if self.availability.observe(&message.topic, status) {
                    tracing::info!("{} is now {:?}", device, status);
                    self.emit(ControllerEvent::Availability { device, status });
                }
            }
            Topic::Command { .. } => {
                tracing::debug!("Controller ignoring command on {}", message.topic);
            }
        }
        Ok(())
    }

    fn emit(&self, event: ControllerEvent) {
        // No receivers is fine; the UI may not be listening yet
        let _ = self.events.send(event);
    }
}
