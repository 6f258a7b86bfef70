//! Device synchronization for multi-room guided tours
//!
//! This library keeps unattended exhibit displays and one roaming controller
//! in step over a shared MQTT broker. It provides:
//!
//! - Enveloped messages and canonical topic names
//! - Birth/death presence via retained availability and the broker's last will
//! - A subscription multiplexer shared by every listener on a connection
//! - Fire-and-forget commands from the controller to the exhibits
//! - Retained exhibit state reports
//! - Controller-side reconciliation against the remote authority's snapshot
//!
//! # Quick Start
//!
//! ```no_run
//! use exhibit_sync::config::load_config;
//! use exhibit_sync::{ExhibitKind, GotoBeatOptions, Navigator, SyncClient, TourCache};
//! use std::sync::Arc;
//!
//! struct Router;
//!
//! impl Navigator for Router {
//!     fn current_path(&self) -> String {
//!         "/tour/tour-002/basecamp".to_string()
//!     }
//!
//!     fn navigate(&self, path: &str) {
//!         println!("Navigate to {}", path);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = load_config()?;
//!     exhibit_sync::logging::init(&settings.logging.level);
//!
//!     let client = SyncClient::connect(&settings)?;
//!     let controller = client.controller(Arc::new(Router), TourCache::default());
//!
//!     // Move the basecamp exhibit
//!     controller
//!         .dispatcher()
//!         .goto_beat(ExhibitKind::Basecamp, "beat-3", GotoBeatOptions::default())?;
//!
//!     // Follow what the authority and exhibits report
//!     let mut events = controller.subscribe_events();
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Transport**: `MqttTransport` over `rumqttc`, or the in-process `MemoryBroker`
//! - **Session**: One connection, its subscription registry and liveness
//! - **Exhibit**: Consumes commands and reports state
//! - **Controller**: Issues commands and reconciles against the authority
//! - **Protocol**: Envelope, topics and typed message bodies

mod client;
mod commands;
pub mod config;
mod controller;
mod envelope;
mod error;
mod exhibit;
mod liveness;
pub mod logging;
pub mod memory;
mod mqtt;
mod protocol;
mod reconcile;
mod reporter;
mod session;
mod subscription;
mod topic;
mod transport;
mod types;

// Public exports
pub use client::SyncClient;
pub use commands::{CommandDispatcher, GotoBeatOptions};
pub use controller::{Controller, ControllerEvent};
pub use envelope::{Envelope, Meta};
pub use error::{Result, SyncError};
pub use exhibit::{ExhibitEvent, ExhibitNode, Navigation, NavigationTicket};
pub use liveness::{AvailabilityTracker, LivenessAnnouncer};
pub use memory::{MemoryBroker, MemoryTransport};
pub use mqtt::MqttTransport;
pub use protocol::{
    AuthorityError, AuthoritySnapshot, Availability, AvailabilityStatus, Command, CommandName,
    ExhibitEntry, ExhibitState, GotoBeat, LoadTour, SetVolume, SyncPhase, SyncStatus,
};
pub use reconcile::{
    rewrite_tour_path, Navigator, ReconcileOutcome, ReconcileState, Reconciler, RefreshTicket,
    TourCache,
};
pub use reporter::StateReporter;
pub use session::{ConnectionState, Session};
pub use subscription::{Handler, SubscriptionRegistry, TopicReceiver};
pub use topic::Topic;
pub use transport::{InboundMessage, LastWill, Transport, TransportEvent};
pub use types::{CommandTarget, DeviceId, Environment, ExhibitKind, Tour};
