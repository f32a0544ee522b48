//! Interactive route editing.
//!
//! A session covers one gesture: moving a waypoint, inserting one, or
//! appending one. While a session exists route polling is paused so a poll
//! cannot overwrite the route being edited, and the working copy is
//! republished as a preview on every update. Committing pushes the result
//! and resumes polling.
//!
//! Leg extension and "go to" build on the external routing lookup and push
//! straight away. They hold the session slot while the lookup is awaited, so
//! polling stays paused and no gesture can start until the push settles.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::EditError,
    model::{Coordinate, RouteState},
    route::RouteSync,
    routing::RoutingClient,
    vessel::VesselSync,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditTarget {
    /// Drag existing waypoint `i`.
    Move(usize),
    /// Place a new waypoint before index `i` (`i == len` appends).
    Insert(usize),
    /// Place a new waypoint after the last one.
    Append,
}

/// How the pointer gesture is tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DragStrategy {
    /// Marker drag events from the map; panning is left alone.
    #[default]
    Native,
    /// Document-level pointer tracking; map panning must be disabled for
    /// the duration of the gesture.
    PointerTracking,
}

/// The piece of the map the editor needs to control.
pub trait MapSurface: Send + Sync {
    fn set_panning(&self, enabled: bool);
}

/// Map surface for headless use.
pub struct DetachedMap;

impl MapSurface for DetachedMap {
    fn set_panning(&self, _enabled: bool) {}
}

/// Where a fetched leg starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegStart {
    Vessel,
    RouteEnd,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditSession {
    target: EditTarget,
    /// Index of the waypoint under the pointer, once one exists.
    target_index: Option<usize>,
    pending: Vec<Coordinate>,
    /// False while a commit is being pushed.
    active: bool,
    dirty: bool,
}

impl EditSession {
    fn new(target: EditTarget, pending: Vec<Coordinate>) -> Self {
        let target_index = match target {
            EditTarget::Move(index) => Some(index),
            EditTarget::Insert(_) | EditTarget::Append => None,
        };
        Self {
            target,
            target_index,
            pending,
            active: true,
            dirty: false,
        }
    }

    pub fn target(&self) -> EditTarget {
        self.target
    }

    pub fn target_index(&self) -> Option<usize> {
        self.target_index
    }

    pub fn pending(&self) -> &[Coordinate] {
        &self.pending
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn place(&mut self, coordinate: Coordinate) {
        match (self.target_index, self.target) {
            (Some(index), _) => self.pending[index] = coordinate,
            (None, EditTarget::Insert(index)) => {
                self.pending.insert(index, coordinate);
                self.target_index = Some(index);
            }
            (None, _) => {
                self.pending.push(coordinate);
                self.target_index = Some(self.pending.len() - 1);
            }
        }
        self.dirty = true;
    }
}

/// `existing ++ leg[1..]`: the leg's first point duplicates the junction.
pub fn append_leg(existing: &[Coordinate], leg: &[Coordinate]) -> Vec<Coordinate> {
    existing
        .iter()
        .chain(leg.iter().skip(1))
        .copied()
        .collect()
}

fn active_gesture(slot: &mut Option<Slot>) -> Result<&mut EditSession, EditError> {
    match slot.as_mut() {
        Some(Slot::Gesture(session)) if session.active => Ok(session),
        _ => Err(EditError::NoSession),
    }
}

pub struct RouteEditor {
    route: Arc<RouteSync>,
    vessel: Arc<VesselSync>,
    routing: Arc<RoutingClient>,
    map: Arc<dyn MapSurface>,
    strategy: DragStrategy,
    slot: Mutex<Option<Slot>>,
    preview: watch::Sender<Option<Vec<Coordinate>>>,
}

/// What currently owns the route. A leg lookup holds the slot for its whole
/// round trip so neither polls nor gestures can change the route under it.
enum Slot {
    Gesture(EditSession),
    Lookup,
}

impl RouteEditor {
    pub fn new(
        route: Arc<RouteSync>,
        vessel: Arc<VesselSync>,
        routing: Arc<RoutingClient>,
        map: Arc<dyn MapSurface>,
        strategy: DragStrategy,
    ) -> Self {
        Self {
            route,
            vessel,
            routing,
            map,
            strategy,
            slot: Mutex::new(None),
            preview: watch::Sender::new(None),
        }
    }

    /// The gesture in progress, if any.
    pub fn session(&self) -> Option<EditSession> {
        match self.slot.lock().ok()?.as_ref()? {
            Slot::Gesture(session) => Some(session.clone()),
            Slot::Lookup => None,
        }
    }

    /// True while a gesture or a leg lookup owns the route.
    pub fn is_editing(&self) -> bool {
        self.slot
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Working copy while a gesture is in progress.
    pub fn preview(&self) -> Option<Vec<Coordinate>> {
        self.preview.borrow().clone()
    }

    pub fn subscribe_preview(&self) -> watch::Receiver<Option<Vec<Coordinate>>> {
        self.preview.subscribe()
    }

    pub fn begin(&self, target: EditTarget) -> Result<(), EditError> {
        let mut guard = self.slot.lock().map_err(|_| EditError::NoSession)?;
        if guard.is_some() {
            return Err(EditError::SessionActive);
        }

        let pending = self
            .route
            .route()
            .map(|route| route.coordinates().to_vec())
            .unwrap_or_default();
        let len = pending.len();
        match target {
            EditTarget::Move(index) if index >= len => {
                return Err(EditError::NoSuchWaypoint { index, len });
            }
            EditTarget::Insert(index) if index > len => {
                return Err(EditError::NoSuchWaypoint { index, len });
            }
            _ => {}
        }

        self.route.set_fetch_paused(true);
        if self.strategy == DragStrategy::PointerTracking {
            self.map.set_panning(false);
        }
        self.preview.send_replace(Some(pending.clone()));
        *guard = Some(Slot::Gesture(EditSession::new(target, pending)));
        debug!(?target, "route edit started");
        Ok(())
    }

    /// Move the edited waypoint. Only the preview changes; nothing is sent.
    pub fn update(&self, coordinate: Coordinate) -> Result<(), EditError> {
        let mut guard = self.slot.lock().map_err(|_| EditError::NoSession)?;
        let session = active_gesture(&mut guard)?;
        session.place(coordinate);
        self.preview.send_replace(Some(session.pending.clone()));
        Ok(())
    }

    /// Push the working copy and end the session. Polling resumes whether or
    /// not the push succeeded.
    pub async fn commit(&self) -> Result<Option<RouteState>, EditError> {
        let (pending, dirty) = {
            let mut guard = self.slot.lock().map_err(|_| EditError::NoSession)?;
            let session = active_gesture(&mut guard)?;
            session.active = false;
            (session.pending.clone(), session.dirty)
        };

        let result = if dirty {
            let route = match self.route.route() {
                Some(current) => current.with_coordinates(pending),
                None => RouteState::from_coordinates(pending),
            };
            self.route
                .push_route(route.clone(), true, None)
                .await
                .map(|()| Some(route))
                .map_err(EditError::from)
        } else {
            debug!("route edit committed without changes");
            Ok(None)
        };

        self.finish();
        result
    }

    /// Drop the working copy without pushing.
    pub fn cancel(&self) -> Result<(), EditError> {
        {
            let mut guard = self.slot.lock().map_err(|_| EditError::NoSession)?;
            active_gesture(&mut guard)?;
        }
        self.finish();
        debug!("route edit cancelled");
        Ok(())
    }

    /// Take the slot for a leg lookup and pause route polling.
    fn reserve_lookup(&self) -> Result<(), EditError> {
        let mut guard = self.slot.lock().map_err(|_| EditError::SessionActive)?;
        if guard.is_some() {
            return Err(EditError::SessionActive);
        }
        *guard = Some(Slot::Lookup);
        self.route.set_fetch_paused(true);
        Ok(())
    }

    fn finish(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
        self.preview.send_replace(None);
        self.route.set_fetch_paused(false);
        if self.strategy == DragStrategy::PointerTracking {
            self.map.set_panning(true);
        }
    }

    /// Double-click action: make waypoint `index` the navigation target.
    pub async fn select_goal(&self, index: usize) -> Result<(), EditError> {
        self.route.select_goal(index).await?;
        Ok(())
    }

    /// Fetch a leg to `destination` and append it to the route.
    pub async fn extend_route(
        &self,
        destination: Option<Coordinate>,
        start: LegStart,
    ) -> Result<RouteState, EditError> {
        let destination = destination.ok_or(EditError::MissingDestination)?;
        self.reserve_lookup()?;
        let result = self.extend_reserved(destination, start).await;
        self.finish();
        result
    }

    async fn extend_reserved(
        &self,
        destination: Coordinate,
        start: LegStart,
    ) -> Result<RouteState, EditError> {
        let current = self.route.route();
        let existing = current
            .as_ref()
            .map(|route| route.coordinates().to_vec())
            .unwrap_or_default();
        let start_point = match start {
            LegStart::RouteEnd => existing.last().copied().ok_or(EditError::EmptyRoute)?,
            LegStart::Vessel => self
                .vessel
                .position()
                .map(Coordinate::from)
                .ok_or(EditError::NoVesselPosition)?,
        };

        let leg = self.routing.fetch_leg(start_point, destination).await?;
        let merged = match start {
            LegStart::RouteEnd => append_leg(&existing, leg.coordinates()),
            LegStart::Vessel => {
                let mut from_vessel = leg.coordinates().to_vec();
                if let Some(first) = from_vessel.first_mut() {
                    *first = start_point;
                }
                existing.iter().copied().chain(from_vessel).collect()
            }
        };
        let route = match current {
            Some(current) => current.with_coordinates(merged),
            None => RouteState::from_coordinates(merged),
        };

        self.route.push_route(route.clone(), true, None).await?;
        info!(points = route.coordinates().len(), "route extended");
        Ok(route)
    }

    /// Replace the route with a fresh leg from the vessel to `destination`
    /// and steer for its first waypoint after the start.
    pub async fn go_to(&self, destination: Option<Coordinate>) -> Result<RouteState, EditError> {
        let destination = destination.ok_or(EditError::MissingDestination)?;
        self.reserve_lookup()?;
        let result = self.go_to_reserved(destination).await;
        self.finish();
        result
    }

    async fn go_to_reserved(&self, destination: Coordinate) -> Result<RouteState, EditError> {
        let vessel = self
            .vessel
            .position()
            .map(Coordinate::from)
            .ok_or(EditError::NoVesselPosition)?;

        let mut leg = self.routing.fetch_leg(vessel, destination).await?;
        match leg.geometry.coordinates.first_mut() {
            Some(first) => *first = vessel,
            None => {
                warn!("route lookup returned an empty leg");
                return Err(EditError::EmptyRoute);
            }
        }
        // Steer for the first waypoint after the vessel. A fixed deeper index
        // (the web console used 3) points past the end of short legs.
        let goal = leg.coordinates().len().saturating_sub(1).min(1);
        self.route.push_route(leg.clone(), false, Some(goal)).await?;
        Ok(leg)
    }
}
