use std::{sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};
use rawcat_core::{
    Console, Coordinate, Location, RouteState, SteeringMode, VesselSnapshot, ais::AisVessel,
    edit::EditTarget, vessel::TrailPoint,
};
use serde::Serialize;
use tracing::info;

/// How long a notice stays in the state snapshot.
pub(crate) const NOTICE_TTL: Duration = Duration::from_secs(6);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Notice {
    pub(crate) message: String,
    pub(crate) raised_at: DateTime<Utc>,
}

/// Latest user-facing message, shown until it expires or is replaced.
#[derive(Default)]
pub(crate) struct NoticeBoard {
    current: Mutex<Option<Notice>>,
}

impl NoticeBoard {
    pub(crate) fn raise(&self, message: impl Into<String>, now: DateTime<Utc>) {
        let notice = Notice {
            message: message.into(),
            raised_at: now,
        };
        info!("notice: {}", notice.message);
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(notice);
        }
    }

    pub(crate) fn current(&self, now: DateTime<Utc>) -> Option<Notice> {
        let guard = self.current.lock().ok()?;
        let notice = guard.as_ref()?;
        let age = now.signed_duration_since(notice.raised_at).to_std().ok()?;
        (age < NOTICE_TTL).then(|| notice.clone())
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct StreamErrors {
    pub(crate) vessel: Option<String>,
    pub(crate) route: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EditSummary {
    pub(crate) target: String,
    pub(crate) index: Option<usize>,
    pub(crate) committing: bool,
}

/// Everything the rendering side needs, captured at one instant.
#[derive(Debug, Serialize)]
pub(crate) struct ConsoleView {
    pub(crate) captured_at: DateTime<Utc>,
    /// False until a service URL is stored; polling stays idle meanwhile.
    pub(crate) configured: bool,
    pub(crate) mode: SteeringMode,
    pub(crate) heading: Option<f64>,
    pub(crate) reported_mode: Option<SteeringMode>,
    pub(crate) dark_mode: bool,
    pub(crate) position: Option<Location>,
    pub(crate) course: Option<f64>,
    pub(crate) trail: Vec<TrailPoint>,
    pub(crate) route: Option<RouteState>,
    pub(crate) preview: Option<Vec<Coordinate>>,
    pub(crate) edit: Option<EditSummary>,
    pub(crate) route_fetch_paused: bool,
    pub(crate) vessel: Option<VesselSnapshot>,
    pub(crate) ais: Vec<AisVessel>,
    pub(crate) errors: StreamErrors,
    pub(crate) notice: Option<Notice>,
}

impl ConsoleView {
    pub(crate) fn capture(console: &Console, notices: &NoticeBoard, now: DateTime<Utc>) -> Self {
        let steering = console.steering.state();
        let vessel = console.vessel.snapshot();
        let edit = console.editor.session().map(|session| EditSummary {
            target: match session.target() {
                EditTarget::Move(_) => "move".to_string(),
                EditTarget::Insert(_) => "insert".to_string(),
                EditTarget::Append => "append".to_string(),
            },
            index: session.target_index(),
            committing: !session.is_active(),
        });

        Self {
            captured_at: now,
            configured: console.settings.get().base_url().is_ok(),
            mode: steering.mode,
            heading: steering.heading,
            reported_mode: vessel.as_ref().and_then(VesselSnapshot::reported_mode),
            dark_mode: vessel.as_ref().is_some_and(VesselSnapshot::dark_mode),
            position: vessel.as_ref().and_then(VesselSnapshot::position),
            course: vessel.as_ref().and_then(VesselSnapshot::course),
            trail: console.vessel.trail().points().to_vec(),
            route: console.route.route(),
            preview: console.editor.preview(),
            edit,
            route_fetch_paused: console.route.is_fetch_paused(),
            vessel,
            ais: console.ais.traffic(),
            errors: StreamErrors {
                vessel: console.vessel.last_error(),
                route: console.route.last_error(),
            },
            notice: notices.current(now),
        }
    }
}
