//! Vessel telemetry stream: `/all` polls carrying the current steering intent.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

use crate::{
    error::SyncError,
    model::{Location, SteeringMode, VesselSnapshot},
    poller::PollSource,
    steering::SteeringState,
    transport::{ApiRequest, Transport, endpoint, fetch_json},
};

/// Trailing window used by the telemetry page.
pub const DATA_PAGE_TRAIL_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrailPoint {
    pub at: DateTime<Utc>,
    /// `[latitude, longitude]`
    pub position: [f64; 2],
}

/// Positions in arrival order. Unbounded unless a window is set, in which
/// case points older than the window (relative to the newest) are dropped.
#[derive(Clone, Debug, Default)]
pub struct PositionTrail {
    points: Vec<TrailPoint>,
    window: Option<chrono::Duration>,
}

impl PositionTrail {
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            points: Vec::new(),
            window: window.and_then(|w| chrono::Duration::from_std(w).ok()),
        }
    }

    pub fn push(&mut self, location: Location, at: DateTime<Utc>) {
        self.points.push(TrailPoint {
            at,
            position: location.lat_lon(),
        });
        if let Some(window) = self.window {
            let cutoff = at - window;
            let stale = self.points.iter().take_while(|p| p.at < cutoff).count();
            self.points.drain(..stale);
        }
    }

    pub fn points(&self) -> &[TrailPoint] {
        &self.points
    }
}

pub struct VesselSync {
    transport: Arc<dyn Transport>,
    steering: watch::Receiver<SteeringState>,
    snapshot: watch::Sender<Option<VesselSnapshot>>,
    trail: Mutex<PositionTrail>,
    last_error: watch::Sender<Option<String>>,
}

impl VesselSync {
    pub fn new(
        transport: Arc<dyn Transport>,
        steering: watch::Receiver<SteeringState>,
        trail_window: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            steering,
            snapshot: watch::Sender::new(None),
            trail: Mutex::new(PositionTrail::new(trail_window)),
            last_error: watch::Sender::new(None),
        }
    }

    /// `/all` URL for the intent that is current right now.
    pub fn request_url(&self, base: &Url) -> Url {
        let intent = *self.steering.borrow();
        let mut url = endpoint(base, "all");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("controllerType", intent.mode.as_query_value());
            if intent.mode == SteeringMode::Compass {
                if let Some(heading) = intent.heading {
                    query.append_pair("refCourse", &heading.to_string());
                }
            }
        }
        url
    }

    /// Replace the snapshot and extend the trail when the snapshot has a fix.
    pub fn apply(&self, mut snapshot: VesselSnapshot, at: DateTime<Utc>) {
        snapshot.normalize();
        if let Some(location) = snapshot.position() {
            if let Ok(mut trail) = self.trail.lock() {
                trail.push(location, at);
            }
        }
        self.snapshot.send_replace(Some(snapshot));
    }

    pub fn snapshot(&self) -> Option<VesselSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<VesselSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn position(&self) -> Option<Location> {
        self.snapshot
            .borrow()
            .as_ref()
            .and_then(VesselSnapshot::position)
    }

    pub fn trail(&self) -> PositionTrail {
        self.trail
            .lock()
            .map(|trail| trail.clone())
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }
}

#[async_trait]
impl PollSource for VesselSync {
    async fn poll(&self, base: Url) -> Result<(), SyncError> {
        let url = self.request_url(&base);
        trace!("polling {url}");
        let snapshot: VesselSnapshot =
            fetch_json(self.transport.as_ref(), ApiRequest::get(url)).await?;
        self.apply(snapshot, Utc::now());
        self.last_error.send_replace(None);
        Ok(())
    }

    fn report(&self, error: &SyncError) {
        self.last_error.send_replace(Some(error.to_string()));
    }
}
