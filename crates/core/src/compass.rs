//! Device orientation handling.
//!
//! Two event shapes arrive from devices: a direct compass heading (iOS style
//! `webkitCompassHeading`) or a raw `alpha` rotation that runs
//! counter-clockwise and needs `(360 - alpha) % 360`. Listeners are tracked by
//! a [`Registration`] guard that deregisters on drop.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::normalize_degrees;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationEvent {
    #[serde(
        rename = "webkitCompassHeading",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub compass_heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

impl OrientationEvent {
    pub fn from_alpha(alpha: f64) -> Self {
        Self {
            compass_heading: None,
            alpha: Some(alpha),
        }
    }

    pub fn from_compass_heading(heading: f64) -> Self {
        Self {
            compass_heading: Some(heading),
            alpha: None,
        }
    }

    /// Heading in `[0, 360)`, preferring the direct compass field.
    pub fn heading(&self) -> Option<f64> {
        if let Some(heading) = self.compass_heading.filter(|h| h.is_finite()) {
            return Some(normalize_degrees(heading));
        }
        self.alpha
            .filter(|alpha| alpha.is_finite())
            .map(|alpha| normalize_degrees(360.0 - alpha))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type OrientationHandler = Arc<dyn Fn(OrientationEvent) + Send + Sync>;

#[async_trait]
pub trait OrientationSensor: Send + Sync {
    /// Platforms that gate orientation events behind a prompt answer here;
    /// others grant immediately.
    async fn request_permission(&self) -> Permission;
    fn register(&self, handler: OrientationHandler) -> ListenerId;
    fn deregister(&self, id: ListenerId);
}

/// Live listener registration.
#[must_use = "dropping the registration removes the listener"]
pub struct Registration {
    sensor: Arc<dyn OrientationSensor>,
    id: ListenerId,
}

impl Registration {
    pub fn register(sensor: Arc<dyn OrientationSensor>, handler: OrientationHandler) -> Self {
        let id = sensor.register(handler);
        Self { sensor, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.sensor.deregister(self.id);
    }
}

/// In-process fan-out of orientation events pushed by whatever owns the real
/// device (the preview page posts them to the console).
pub struct OrientationHub {
    permission: Permission,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, OrientationHandler>>,
}

impl OrientationHub {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver an event to every registered listener.
    pub fn dispatch(&self, event: OrientationEvent) -> usize {
        let handlers: Vec<OrientationHandler> = match self.listeners.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => return 0,
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[async_trait]
impl OrientationSensor for OrientationHub {
    async fn request_permission(&self) -> Permission {
        self.permission
    }

    fn register(&self, handler: OrientationHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut guard) = self.listeners.lock() {
            guard.insert(id, handler);
        }
        debug!("orientation listener {} registered", id.0);
        id
    }

    fn deregister(&self, id: ListenerId) {
        if let Ok(mut guard) = self.listeners.lock() {
            guard.remove(&id);
        }
        debug!("orientation listener {} removed", id.0);
    }
}
