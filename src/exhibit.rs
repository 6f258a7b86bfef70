//! Exhibit side of the protocol
//!
//! An [`ExhibitNode`] listens for the commands addressed to its exhibit kind,
//! turns them into [`ExhibitEvent`]s for the rendering layer, and reports the
//! exhibit's state once a change has actually taken effect.
//!
//! Navigation is asynchronous: the renderer receives a [`Navigation`] carrying
//! a ticket and calls [`ExhibitNode::complete_navigation`] when the transition
//! finishes. Each new navigation (or an end of tour) supersedes the previous
//! ticket, so a slow transition that finishes late cannot overwrite a newer
//! position.

use crate::envelope::Envelope;
use crate::error::Result;
use crate::protocol::{AuthoritySnapshot, Command, CommandName, ExhibitState, GotoBeat, SetVolume};
use crate::reporter::StateReporter;
use crate::subscription::{Handler, SubscriptionRegistry};
use crate::topic::Topic;
use crate::transport::InboundMessage;
use crate::types::{CommandTarget, ExhibitKind};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one navigation request; newer tickets compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NavigationTicket(u64);

/// A beat change for the rendering layer to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub ticket: NavigationTicket,
    pub beat_id: String,
    pub presentation_mode: Option<bool>,
    pub playpause: Option<bool>,
}

/// Work handed to the rendering layer
#[derive(Debug, Clone, PartialEq)]
pub enum ExhibitEvent {
    Navigate(Navigation),
    VolumeChanged { level: f64, muted: bool },
    TourBound(Option<String>),
    TourEnded,
}

struct NodeState {
    state: ExhibitState,
    generation: u64,
    pending: Option<Navigation>,
    last_command: Option<Uuid>,
}

/// Command consumer and state owner for one exhibit
pub struct ExhibitNode {
    kind: ExhibitKind,
    reporter: StateReporter,
    inner: Mutex<NodeState>,
    handler: Handler,
    events: mpsc::UnboundedSender<ExhibitEvent>,
}

impl ExhibitNode {
    pub fn new(
        kind: ExhibitKind,
        reporter: StateReporter,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ExhibitEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let node = Arc::new_cyclic(|weak: &Weak<ExhibitNode>| {
            let weak = weak.clone();
            ExhibitNode {
                kind,
                reporter,
                inner: Mutex::new(NodeState {
                    state: ExhibitState::default(),
                    generation: 0,
                    pending: None,
                    last_command: None,
                }),
                handler: Handler::new(move |message| match weak.upgrade() {
                    Some(node) => node.handle_message(message),
                    None => Ok(()),
                }),
                events,
            }
        });
        (node, rx)
    }

    pub fn kind(&self) -> ExhibitKind {
        self.kind
    }

    /// Current state as last reported
    pub fn state(&self) -> ExhibitState {
        self.inner.lock().state.clone()
    }

    /// Topics this exhibit listens on
    pub fn topics(&self) -> Vec<String> {
        let own = CommandTarget::Exhibit(self.kind);
        vec![
            Topic::command(own, CommandName::GotoBeat).to_string(),
            Topic::command(own, CommandName::SetVolume).to_string(),
            Topic::command(CommandTarget::All, CommandName::EndTour).to_string(),
            Topic::AuthoritySnapshot.to_string(),
        ]
    }

    /// Start listening on a registry; attaching twice is a no-op
    pub fn attach(&self, registry: &SubscriptionRegistry) {
        for topic in self.topics() {
            registry.subscribe(&topic, &self.handler);
        }
    }

    /// Stop listening on a registry
    pub fn detach(&self, registry: &SubscriptionRegistry) {
        for topic in self.topics() {
            registry.unsubscribe(&topic, &self.handler);
        }
    }

    /// Publish the current state, e.g. right after startup
    pub fn report(&self) -> Result<()> {
        let state = self.state();
        self.reporter.report_state(self.kind, &state)
    }

    /// Route one inbound message
    pub fn handle_message(&self, message: &InboundMessage) -> Result<()> {
        match Topic::parse(&message.topic)? {
            Topic::Command { command, .. } => {
                let envelope = Command::decode(command, &message.payload)?;
                if !self.first_delivery(envelope.id()) {
                    tracing::debug!("Ignoring redelivered command {}", envelope.id());
                    return Ok(());
                }
                self.apply(envelope.body)
            }
            Topic::AuthoritySnapshot => {
                let envelope = Envelope::<AuthoritySnapshot>::from_slice(&message.payload)?;
                self.apply_snapshot(&envelope.body)
            }
            other => {
                tracing::debug!("{} ignoring message on {}", self.kind, other);
                Ok(())
            }
        }
    }

    /// Apply a decoded command
    pub fn apply(&self, command: Command) -> Result<()> {
        match command {
            Command::GotoBeat(goto) => {
                self.begin_navigation(goto);
                Ok(())
            }
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::EndTour => self.end_tour(),
            other => {
                tracing::debug!("{} ignoring {} command", self.kind, other.name());
                Ok(())
            }
        }
    }

    /// Confirm that the renderer finished a navigation
    ///
    /// Returns `Ok(false)` without reporting if the ticket was superseded.
    pub fn complete_navigation(&self, ticket: NavigationTicket) -> Result<bool> {
        let state = {
            let mut inner = self.inner.lock();
            match inner.pending.take() {
                Some(navigation) if navigation.ticket == ticket => {
                    inner.state.beat_id = navigation.beat_id;
                    if navigation.playpause.is_some() {
                        inner.state.play_pause = navigation.playpause;
                    }
                    inner.state.clone()
                }
                pending => {
                    inner.pending = pending;
                    tracing::debug!("{} dropping stale navigation {:?}", self.kind, ticket);
                    return Ok(false);
                }
            }
        };

        self.reporter.report_state(self.kind, &state)?;
        Ok(true)
    }

    fn first_delivery(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        if inner.last_command == Some(id) {
            return false;
        }
        inner.last_command = Some(id);
        true
    }

    fn begin_navigation(&self, goto: GotoBeat) {
        let playpause = match goto.playpause {
            Some(_) if !self.kind.supports_playpause() => {
                tracing::warn!("{} has no playback control, ignoring playpause", self.kind);
                None
            }
            other => other,
        };

        let navigation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let navigation = Navigation {
                ticket: NavigationTicket(inner.generation),
                beat_id: goto.beat_id,
                presentation_mode: goto.presentation_mode,
                playpause,
            };
            inner.pending = Some(navigation.clone());
            navigation
        };

        tracing::debug!("{} navigating to {}", self.kind, navigation.beat_id);
        self.emit(ExhibitEvent::Navigate(navigation));
    }

    fn set_volume(&self, volume: SetVolume) -> Result<()> {
        let state = {
            let mut inner = self.inner.lock();
            inner.state.volume_level = volume.volume_level;
            inner.state.volume_muted = volume.is_muted();
            inner.state.clone()
        };

        self.emit(ExhibitEvent::VolumeChanged {
            level: state.volume_level,
            muted: state.volume_muted,
        });
        self.reporter.report_state(self.kind, &state)
    }

    fn end_tour(&self) -> Result<()> {
        let state = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.pending = None;
            inner.state.tour_id = None;
            inner.state.beat_id.clear();
            inner.state.play_pause = None;
            inner.state.clone()
        };

        tracing::info!("{} ending tour", self.kind);
        self.emit(ExhibitEvent::TourEnded);
        self.reporter.report_state(self.kind, &state)
    }

    fn apply_snapshot(&self, snapshot: &AuthoritySnapshot) -> Result<()> {
        let Some(entry) = snapshot.entry(self.kind) else {
            tracing::debug!("Snapshot has no entry for {}", self.kind);
            return Ok(());
        };

        let state = {
            let mut inner = self.inner.lock();
            if inner.state.tour_id == entry.tour_id {
                return Ok(());
            }
            inner.state.tour_id = entry.tour_id.clone();
            inner.state.clone()
        };

        tracing::info!("{} bound to tour {:?}", self.kind, state.tour_id);
        self.emit(ExhibitEvent::TourBound(state.tour_id.clone()));
        self.reporter.report_state(self.kind, &state)
    }

    fn emit(&self, event: ExhibitEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No renderer listening on {}", self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandDispatcher, GotoBeatOptions};
    use crate::memory::{MemoryBroker, MemoryTransport};
    use crate::types::DeviceId;
    use serde_json::json;

    struct Fixture {
        broker: MemoryBroker,
        node: Arc<ExhibitNode>,
        events: mpsc::UnboundedReceiver<ExhibitEvent>,
        transport: MemoryTransport,
    }

    fn fixture(kind: ExhibitKind) -> Fixture {
        let broker = MemoryBroker::new();
        let (transport, _rx) = broker.connect("exhibit", None);
        let reporter = StateReporter::new(DeviceId::new("exhibit"), Arc::new(transport.clone()));
        let (node, events) = ExhibitNode::new(kind, reporter);
        Fixture {
            broker,
            node,
            events,
            transport,
        }
    }

    fn command_message(kind: ExhibitKind, command: &Command) -> InboundMessage {
        let target = match command {
            Command::EndTour => CommandTarget::All,
            _ => CommandTarget::Exhibit(kind),
        };
        let topic = Topic::command(target, command.name()).to_string();
        InboundMessage::new(topic, command.encode(&DeviceId::new("controller")).unwrap())
    }

    fn retained_state(broker: &MemoryBroker, kind: ExhibitKind) -> ExhibitState {
        let payload = broker.retained(&Topic::exhibit_state(kind).to_string()).unwrap();
        Envelope::<ExhibitState>::from_slice(&payload).unwrap().body
    }

    fn goto(beat: &str) -> Command {
        Command::GotoBeat(GotoBeat {
            beat_id: beat.into(),
            presentation_mode: None,
            playpause: None,
        })
    }

    fn next_navigation(events: &mut mpsc::UnboundedReceiver<ExhibitEvent>) -> Navigation {
        match events.try_recv().unwrap() {
            ExhibitEvent::Navigate(navigation) => navigation,
            other => panic!("expected navigation, got {:?}", other),
        }
    }

    #[test]
    fn navigation_is_reported_once_completed() {
        let mut f = fixture(ExhibitKind::Basecamp);
        f.node
            .handle_message(&command_message(ExhibitKind::Basecamp, &goto("beat-4")))
            .unwrap();

        // Nothing reported until the renderer confirms
        assert!(f.transport.calls().is_empty());

        let navigation = next_navigation(&mut f.events);
        assert_eq!(navigation.beat_id, "beat-4");
        assert!(f.node.complete_navigation(navigation.ticket).unwrap());
        assert_eq!(retained_state(&f.broker, ExhibitKind::Basecamp).beat_id, "beat-4");
    }

    #[test]
    fn superseded_navigation_is_not_reported() {
        let mut f = fixture(ExhibitKind::Basecamp);
        f.node.apply(goto("beat-1")).unwrap();
        f.node.apply(goto("beat-2")).unwrap();
        let first = next_navigation(&mut f.events);
        let second = next_navigation(&mut f.events);
        assert!(second.ticket > first.ticket);

        assert!(f.node.complete_navigation(second.ticket).unwrap());
        assert!(!f.node.complete_navigation(first.ticket).unwrap());
        assert_eq!(f.node.state().beat_id, "beat-2");
        assert_eq!(retained_state(&f.broker, ExhibitKind::Basecamp).beat_id, "beat-2");
    }

    #[test]
    fn end_tour_cancels_pending_navigation() {
        let mut f = fixture(ExhibitKind::Carousel);
        f.node.apply(goto("beat-1")).unwrap();
        let navigation = next_navigation(&mut f.events);

        f.node
            .handle_message(&command_message(ExhibitKind::Carousel, &Command::EndTour))
            .unwrap();
        assert_eq!(f.events.try_recv().unwrap(), ExhibitEvent::TourEnded);
        assert!(!f.node.complete_navigation(navigation.ticket).unwrap());

        let state = retained_state(&f.broker, ExhibitKind::Carousel);
        assert_eq!(state.beat_id, "");
        assert_eq!(state.tour_id, None);
    }

    #[test]
    fn mute_is_reported_immediately() {
        let mut f = fixture(ExhibitKind::OverlookWall);
        f.node.apply(Command::SetVolume(SetVolume::from_muted(true))).unwrap();

        assert_eq!(
            f.events.try_recv().unwrap(),
            ExhibitEvent::VolumeChanged {
                level: 0.0,
                muted: true
            }
        );
        let state = retained_state(&f.broker, ExhibitKind::OverlookWall);
        assert!(state.volume_muted);
        assert_eq!(state.volume_level, 0.0);
    }

    #[test]
    fn playpause_only_applies_to_supporting_kinds() {
        let mut wall = fixture(ExhibitKind::OverlookWall);
        let command = Command::GotoBeat(GotoBeat {
            beat_id: "b".into(),
            presentation_mode: None,
            playpause: Some(true),
        });
        wall.node.apply(command.clone()).unwrap();
        let navigation = next_navigation(&mut wall.events);
        assert_eq!(navigation.playpause, Some(true));
        wall.node.complete_navigation(navigation.ticket).unwrap();
        assert_eq!(wall.node.state().play_pause, Some(true));

        let mut basecamp = fixture(ExhibitKind::Basecamp);
        basecamp.node.apply(command).unwrap();
        assert_eq!(next_navigation(&mut basecamp.events).playpause, None);
    }

    #[test]
    fn redelivered_command_is_applied_once() {
        let mut f = fixture(ExhibitKind::Basecamp);
        let message = command_message(ExhibitKind::Basecamp, &goto("beat-1"));
        f.node.handle_message(&message).unwrap();
        f.node.handle_message(&message).unwrap();

        next_navigation(&mut f.events);
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn snapshot_binds_tour() {
        let mut f = fixture(ExhibitKind::Basecamp);
        let snapshot = json!({ "exhibits": { "basecamp": { "tour-id": "tour-002" } } });
        let payload = Envelope::wrap(&DeviceId::new("gec"), snapshot).to_bytes().unwrap();
        let message = InboundMessage::new("state/docent-app", payload);

        f.node.handle_message(&message).unwrap();
        f.node.handle_message(&message).unwrap();

        assert_eq!(f.events.try_recv().unwrap(), ExhibitEvent::TourBound(Some("tour-002".into())));
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.transport.calls().len(), 1);
        assert_eq!(
            retained_state(&f.broker, ExhibitKind::Basecamp).tour_id.as_deref(),
            Some("tour-002")
        );
    }

    #[test]
    fn malformed_command_is_an_error_and_changes_nothing() {
        let f = fixture(ExhibitKind::Basecamp);
        let message = InboundMessage::new("cmd/dev/basecamp/goto-beat", &b"{ nope"[..]);
        assert!(f.node.handle_message(&message).is_err());
        assert_eq!(f.node.state(), ExhibitState::default());
    }

    #[test]
    fn attach_listens_on_commands_end_tour_and_snapshot() {
        let f = fixture(ExhibitKind::OverlookWall);
        let registry = SubscriptionRegistry::new(Arc::new(f.transport.clone()));
        f.node.attach(&registry);
        f.node.attach(&registry);
        assert_eq!(registry.handler_count("state/docent-app"), 1);

        assert_eq!(
            registry.topics(),
            vec![
                "cmd/dev/all/end-tour",
                "cmd/dev/overlook-wall/goto-beat",
                "cmd/dev/overlook-wall/set-volume",
                "state/docent-app",
            ]
        );

        f.node.detach(&registry);
        assert!(registry.topics().is_empty());
    }

    #[test]
    fn dispatcher_commands_reach_the_node_through_the_broker() {
        let mut f = fixture(ExhibitKind::Basecamp);
        let (exhibit_transport, mut exhibit_rx) = f.broker.connect("exhibit-conn", None);
        let registry = SubscriptionRegistry::new(Arc::new(exhibit_transport));
        f.node.attach(&registry);

        let (controller, _) = f.broker.connect("controller", None);
        let dispatcher = CommandDispatcher::new(DeviceId::new("controller"), Arc::new(controller));
        dispatcher
            .goto_beat(ExhibitKind::Basecamp, "beat-8", GotoBeatOptions::default())
            .unwrap();

        while let Ok(event) = exhibit_rx.try_recv() {
            if let crate::transport::TransportEvent::Message(message) = event {
                registry.dispatch(&message);
            }
        }
        assert_eq!(next_navigation(&mut f.events).beat_id, "beat-8");
    }
}
