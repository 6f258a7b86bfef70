//! Controller-side reconciliation against the remote authority
//!
//! The authority publishes a retained full-state snapshot on
//! `state/docent-app`. The [`Reconciler`] derives exhibit availability and the
//! active tour from it and keeps the operator's current route pointing at that
//! tour. It is the only writer of the active tour: the UI can ask for a
//! different tour with a `load-tour` command, but the change only shows up here
//! once the authority echoes it back in a snapshot.
//!
//! The reconciler never calls into the UI itself. It is handed the current
//! route and returns the route to show in its [`ReconcileOutcome`]; the caller
//! navigates after releasing whatever lock guards the reconciler, so a
//! [`Navigator`] is free to read controller state while it re-renders.

use crate::envelope::Envelope;
use crate::protocol::AuthoritySnapshot;
use crate::types::{ExhibitKind, Tour};
use std::collections::BTreeMap;
use uuid::Uuid;

const TOUR_ROUTE: &str = "/tour/";

/// Routing hooks of the operator UI
pub trait Navigator: Send + Sync {
    /// Path of the screen currently shown
    fn current_path(&self) -> String;

    /// Replace the current screen with `path`
    fn navigate(&self, path: &str);
}

/// Identifies one tour list refresh; newer tickets compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshTicket(u64);

/// The controller's locally cached tour list
///
/// Refreshes are fetched asynchronously by the content layer. Only the
/// result of the most recently started refresh is applied.
#[derive(Debug, Default)]
pub struct TourCache {
    tours: Vec<Tour>,
    latest: u64,
}

impl TourCache {
    pub fn new(tours: Vec<Tour>) -> Self {
        Self { tours, latest: 0 }
    }

    pub fn tours(&self) -> &[Tour] {
        &self.tours
    }

    pub fn get(&self, id: &str) -> Option<&Tour> {
        self.tours.iter().find(|tour| tour.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Start a refresh; supersedes any refresh still in flight
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.latest += 1;
        RefreshTicket(self.latest)
    }

    /// Apply a fetched tour list; `false` if the ticket was superseded
    pub fn complete_refresh(&mut self, ticket: RefreshTicket, tours: Vec<Tour>) -> bool {
        if ticket.0 != self.latest {
            tracing::debug!("Dropping stale tour refresh {:?}", ticket);
            return false;
        }
        self.tours = tours;
        true
    }
}

/// Reconciliation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    NoSnapshotYet,
    Synced {
        tour_id: Option<String>,
        availability: BTreeMap<ExhibitKind, bool>,
    },
}

/// What applying a snapshot did
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payload could not be parsed; state unchanged
    Discarded,
    /// Same envelope as the last applied one
    Duplicate,
    /// Availability refreshed, active tour unchanged
    Unchanged,
    /// The reported tour is not in the local cache; availability refreshed only
    UnknownTour(String),
    /// A new active tour was adopted; `path` is set when the route must change
    TourAdopted {
        previous: Option<String>,
        current: String,
        path: Option<String>,
    },
}

impl ReconcileOutcome {
    /// Route the UI should navigate to, if any
    pub fn navigation(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::TourAdopted { path: Some(path), .. } => Some(path),
            _ => None,
        }
    }
}

/// Reconciles the controller's view with authority snapshots
#[derive(Debug, Default)]
pub struct Reconciler {
    cache: TourCache,
    active_tour: Option<String>,
    availability: Option<BTreeMap<ExhibitKind, bool>>,
    last_snapshot: Option<AuthoritySnapshot>,
    last_id: Option<Uuid>,
}

impl Reconciler {
    pub fn new(cache: TourCache) -> Self {
        Self {
            cache,
            active_tour: None,
            availability: None,
            last_snapshot: None,
            last_id: None,
        }
    }

    /// Start from a tour already known to be active, e.g. restored at launch
    pub fn with_active_tour(mut self, tour_id: impl Into<String>) -> Self {
        self.active_tour = Some(tour_id.into());
        self
    }

    pub fn state(&self) -> ReconcileState {
        match &self.availability {
            None => ReconcileState::NoSnapshotYet,
            Some(availability) => ReconcileState::Synced {
                tour_id: self.active_tour.clone(),
                availability: availability.clone(),
            },
        }
    }

    pub fn active_tour(&self) -> Option<&str> {
        self.active_tour.as_deref()
    }

    pub fn availability(&self) -> Option<&BTreeMap<ExhibitKind, bool>> {
        self.availability.as_ref()
    }

    pub fn cache(&self) -> &TourCache {
        &self.cache
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.cache.begin_refresh()
    }

    /// Apply a tour list refresh and re-reconcile the last snapshot
    ///
    /// Returns `None` if the ticket was stale.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        tours: Vec<Tour>,
        current_path: &str,
    ) -> Option<ReconcileOutcome> {
        if !self.cache.complete_refresh(ticket, tours) {
            return None;
        }
        let snapshot = self.last_snapshot.clone()?;
        Some(self.reconcile(&snapshot, current_path))
    }

    /// Ingest a raw `state/docent-app` payload while the UI shows `current_path`
    pub fn ingest(&mut self, payload: &[u8], current_path: &str) -> ReconcileOutcome {
        match Envelope::<AuthoritySnapshot>::from_slice(payload) {
            Ok(envelope) => self.apply(envelope, current_path),
            Err(e) => {
                tracing::warn!("Discarding malformed authority snapshot: {}", e);
                ReconcileOutcome::Discarded
            }
        }
    }

    /// Apply a decoded snapshot envelope
    pub fn apply(&mut self, envelope: Envelope<AuthoritySnapshot>, current_path: &str) -> ReconcileOutcome {
        let id = envelope.id();
        if self.last_id == Some(id) {
            tracing::debug!("Skipping redelivered snapshot {}", id);
            return ReconcileOutcome::Duplicate;
        }
        self.last_id = Some(id);

        let outcome = self.reconcile(&envelope.body, current_path);
        self.last_snapshot = Some(envelope.body);
        outcome
    }

    fn reconcile(&mut self, snapshot: &AuthoritySnapshot, current_path: &str) -> ReconcileOutcome {
        self.availability = Some(snapshot.availability());

        let Some(reported) = snapshot.tour_id() else {
            return ReconcileOutcome::Unchanged;
        };
        if self.active_tour.as_deref() == Some(reported) {
            return ReconcileOutcome::Unchanged;
        }
        if !self.cache.contains(reported) {
            tracing::warn!("Authority reports tour {} which is not cached locally", reported);
            return ReconcileOutcome::UnknownTour(reported.to_string());
        }

        let previous = self.active_tour.replace(reported.to_string());
        tracing::info!("Active tour changed from {:?} to {}", previous, reported);

        ReconcileOutcome::TourAdopted {
            previous,
            current: reported.to_string(),
            path: rewrite_tour_path(current_path, reported),
        }
    }
}

/// Point a tour-scoped route at `tour_id`, keeping the rest of the path
///
/// Returns `None` for routes outside `/tour/<id>` or already on `tour_id`.
pub fn rewrite_tour_path(path: &str, tour_id: &str) -> Option<String> {
    let scoped = path.strip_prefix(TOUR_ROUTE)?;
    let (current, rest) = match scoped.find('/') {
        Some(index) => scoped.split_at(index),
        None => (scoped, ""),
    };
    if current.is_empty() || current == tour_id {
        return None;
    }
    Some(format!("{}{}{}", TOUR_ROUTE, tour_id, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;
    use serde_json::{json, Value};

    const DETAIL: &str = "/tour/tour-002/basecamp";

    fn cache(ids: &[&str]) -> TourCache {
        TourCache::new(ids.iter().map(|id| Tour::new(*id, format!("Tour {}", id))).collect())
    }

    fn snapshot(body: Value) -> Vec<u8> {
        Envelope::wrap(&DeviceId::new("gec"), body).to_bytes().unwrap()
    }

    fn tour_004_snapshot() -> Vec<u8> {
        snapshot(json!({
            "exhibits": {
                "basecamp": { "tour-id": "tour-004" },
                "overlook-wall": null,
            },
            "volume": 0.8,
        }))
    }

    fn reconciler_on_tour_002(cached: &[&str]) -> Reconciler {
        Reconciler::new(cache(cached)).with_active_tour("tour-002")
    }

    #[test]
    fn tour_switch_rewrites_detail_path() {
        let mut reconciler = reconciler_on_tour_002(&["tour-002", "tour-004"]);

        let outcome = reconciler.ingest(&tour_004_snapshot(), DETAIL);

        assert_eq!(
            outcome,
            ReconcileOutcome::TourAdopted {
                previous: Some("tour-002".into()),
                current: "tour-004".into(),
                path: Some("/tour/tour-004/basecamp".into()),
            }
        );
        assert_eq!(outcome.navigation(), Some("/tour/tour-004/basecamp"));
        assert_eq!(reconciler.active_tour(), Some("tour-004"));
    }

    #[test]
    fn unknown_tour_updates_availability_only() {
        let mut reconciler = reconciler_on_tour_002(&["tour-002"]);

        let outcome = reconciler.ingest(&tour_004_snapshot(), DETAIL);

        assert_eq!(outcome, ReconcileOutcome::UnknownTour("tour-004".into()));
        assert_eq!(outcome.navigation(), None);
        assert_eq!(reconciler.active_tour(), Some("tour-002"));

        let availability = reconciler.availability().unwrap();
        assert_eq!(availability[&ExhibitKind::Basecamp], true);
        assert_eq!(availability[&ExhibitKind::OverlookWall], false);
        assert_eq!(availability[&ExhibitKind::Carousel], false);
    }

    #[test]
    fn malformed_snapshot_leaves_state_untouched() {
        let mut reconciler = reconciler_on_tour_002(&["tour-002", "tour-004"]);
        assert_eq!(reconciler.state(), ReconcileState::NoSnapshotYet);

        assert_eq!(reconciler.ingest(b"not json", DETAIL), ReconcileOutcome::Discarded);
        assert_eq!(reconciler.state(), ReconcileState::NoSnapshotYet);

        let adopted = reconciler.ingest(&tour_004_snapshot(), DETAIL);
        assert!(adopted.navigation().is_some());
        let synced = reconciler.state();

        // Valid envelope, but the snapshot lacks `exhibits`
        let partial = snapshot(json!({ "volume": 1.0 }));
        assert_eq!(reconciler.ingest(&partial, DETAIL), ReconcileOutcome::Discarded);
        assert_eq!(reconciler.state(), synced);
    }

    #[test]
    fn same_snapshot_twice_navigates_once() {
        let mut reconciler = reconciler_on_tour_002(&["tour-002", "tour-004"]);
        let payload = tour_004_snapshot();

        let first = reconciler.ingest(&payload, DETAIL);
        assert_eq!(first.navigation(), Some("/tour/tour-004/basecamp"));
        let route = first.navigation().unwrap_or(DETAIL).to_string();

        assert_eq!(reconciler.ingest(&payload, &route), ReconcileOutcome::Duplicate);

        // A fresh envelope with the same content is a no-op too
        let again = reconciler.ingest(&tour_004_snapshot(), &route);
        assert_eq!(again, ReconcileOutcome::Unchanged);
        assert_eq!(again.navigation(), None);
    }

    #[test]
    fn first_non_null_tour_wins_in_priority_order() {
        let mut reconciler = Reconciler::new(cache(&["tour-a", "tour-b"]));

        let payload = snapshot(json!({
            "exhibits": {
                "carousel": { "tour-id": "tour-b" },
                "overlook-wall": { "tour-id": "tour-a" },
                "basecamp": { "tour-id": null },
            }
        }));
        let outcome = reconciler.ingest(&payload, "/settings");

        // Not a tour-scoped route, so nothing to rewrite
        assert_eq!(
            outcome,
            ReconcileOutcome::TourAdopted {
                previous: None,
                current: "tour-a".into(),
                path: None,
            }
        );
    }

    #[test]
    fn refresh_makes_unknown_tour_adoptable() {
        let mut reconciler = reconciler_on_tour_002(&["tour-002"]);
        let _ = reconciler.ingest(&tour_004_snapshot(), DETAIL);

        let stale = reconciler.begin_refresh();
        let current = reconciler.begin_refresh();

        let tours = vec![Tour::new("tour-002", "Two"), Tour::new("tour-004", "Four")];
        assert_eq!(reconciler.complete_refresh(stale, tours.clone(), DETAIL), None);
        assert!(!reconciler.cache().contains("tour-004"));

        let outcome = reconciler.complete_refresh(current, tours, DETAIL).unwrap();
        assert_eq!(outcome.navigation(), Some("/tour/tour-004/basecamp"));
        assert_eq!(reconciler.active_tour(), Some("tour-004"));
    }

    #[test]
    fn path_rewriting() {
        assert_eq!(
            rewrite_tour_path("/tour/tour-002/basecamp/beat-3", "tour-004").as_deref(),
            Some("/tour/tour-004/basecamp/beat-3")
        );
        assert_eq!(
            rewrite_tour_path("/tour/tour-002", "tour-004").as_deref(),
            Some("/tour/tour-004")
        );
        assert_eq!(rewrite_tour_path("/tour/tour-004/carousel", "tour-004"), None);
        assert_eq!(rewrite_tour_path("/tours", "tour-004"), None);
        assert_eq!(rewrite_tour_path("/tour/", "tour-004"), None);
    }
}
