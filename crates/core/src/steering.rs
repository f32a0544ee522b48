//! Steering mode state machine: route (initial), compass, hold-line.
//!
//! The current mode and the latest compass heading live in a watch channel
//! that the vessel stream reads at tick time. The orientation listener exists
//! only while the mode is `Compass`.

use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    compass::{OrientationEvent, OrientationSensor, Permission, Registration},
    error::SyncError,
    model::SteeringMode,
    settings::SettingsStore,
    transport::{ApiRequest, Transport, endpoint, send_checked},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SteeringState {
    pub mode: SteeringMode,
    /// Latest heading from the orientation sensor, kept after leaving compass
    /// mode so it can still be displayed.
    pub heading: Option<f64>,
}

pub struct SteeringController {
    state: Arc<watch::Sender<SteeringState>>,
    sensor: Arc<dyn OrientationSensor>,
    listener: Mutex<Option<Registration>>,
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsStore>,
}

impl SteeringController {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsStore>,
        sensor: Arc<dyn OrientationSensor>,
    ) -> Self {
        Self {
            state: Arc::new(watch::Sender::new(SteeringState::default())),
            sensor,
            listener: Mutex::new(None),
            transport,
            settings,
        }
    }

    pub fn state(&self) -> SteeringState {
        *self.state.borrow()
    }

    pub fn mode(&self) -> SteeringMode {
        self.state.borrow().mode
    }

    pub fn heading(&self) -> Option<f64> {
        self.state.borrow().heading
    }

    pub fn subscribe(&self) -> watch::Receiver<SteeringState> {
        self.state.subscribe()
    }

    pub fn listener_active(&self) -> bool {
        self.listener
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Ask for sensor permission and start following the compass. On denial
    /// the previous mode stays active.
    pub async fn enable_compass(&self) -> Result<(), SyncError> {
        if self.mode() == SteeringMode::Compass && self.listener_active() {
            return Ok(());
        }
        if self.sensor.request_permission().await == Permission::Denied {
            warn!("orientation permission denied; staying in {}", self.mode());
            return Err(SyncError::PermissionDenied);
        }

        let state = self.state.clone();
        let handler = Arc::new(move |event: OrientationEvent| {
            if let Some(heading) = event.heading() {
                state.send_modify(|s| s.heading = Some(heading));
            }
        });
        let registration = Registration::register(self.sensor.clone(), handler);
        if let Ok(mut guard) = self.listener.lock() {
            // replacing an old registration drops and deregisters it
            *guard = Some(registration);
        }
        self.set_mode(SteeringMode::Compass);
        Ok(())
    }

    /// Follow the route. Leaving hold-line also tells the device to revert.
    pub async fn enable_route(&self) -> Result<(), SyncError> {
        let previous = self.mode();
        self.release_listener();
        self.set_mode(SteeringMode::Route);
        if previous == SteeringMode::HoldLine {
            let mut url = endpoint(&self.base_url()?, "controller");
            url.query_pairs_mut().append_pair("type", "route");
            self.send_one_shot(url).await?;
        }
        Ok(())
    }

    /// Hold the current line and latch it on the device with one request.
    pub async fn enable_hold_line(&self) -> Result<(), SyncError> {
        self.release_listener();
        self.set_mode(SteeringMode::HoldLine);
        let url = endpoint(&self.base_url()?, "setHoldLine");
        self.send_one_shot(url).await
    }

    /// Drop the orientation listener without changing mode, for teardown.
    pub fn release_listener(&self) {
        let registration = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(registration);
    }

    fn set_mode(&self, mode: SteeringMode) {
        let previous = self.state.borrow().mode;
        if previous != mode {
            info!("steering mode {previous} -> {mode}");
        }
        self.state.send_modify(|s| s.mode = mode);
    }

    fn base_url(&self) -> Result<Url, SyncError> {
        self.settings.get().base_url()
    }

    async fn send_one_shot(&self, url: Url) -> Result<(), SyncError> {
        let target = url.to_string();
        match send_checked(self.transport.as_ref(), ApiRequest::get(url)).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("request to {target} failed: {err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::{compass::OrientationHub, mock::MockTransport, settings::MemoryStore};

    fn controller(permission: Permission) -> (SteeringController, Arc<OrientationHub>, Arc<MockTransport>) {
        let store = SettingsStore::open(MemoryStore::default());
        store
            .save(Some("http://localhost:5000".into()), None)
            .unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond_json("/setHoldLine", json!({}));
        transport.respond_json("/controller", json!({"type": "route"}));
        let hub = Arc::new(OrientationHub::new(permission));
        let controller = SteeringController::new(transport.clone(), Arc::new(store), hub.clone());
        (controller, hub, transport)
    }

    #[derive(Clone, Copy, Debug)]
    enum Call {
        Compass,
        Route,
        HoldLine,
    }

    #[tokio::test]
    async fn exactly_one_mode_and_listener_only_in_compass() {
        let (controller, hub, _transport) = controller(Permission::Granted);
        assert_eq!(controller.mode(), SteeringMode::Route);

        let sequence = [
            Call::Compass,
            Call::Compass,
            Call::HoldLine,
            Call::Compass,
            Call::Route,
            Call::Route,
            Call::HoldLine,
            Call::HoldLine,
            Call::Compass,
            Call::Route,
        ];
        for call in sequence {
            match call {
                Call::Compass => controller.enable_compass().await.unwrap(),
                Call::Route => controller.enable_route().await.unwrap(),
                Call::HoldLine => controller.enable_hold_line().await.unwrap(),
            }
            let expected = match call {
                Call::Compass => SteeringMode::Compass,
                Call::Route => SteeringMode::Route,
                Call::HoldLine => SteeringMode::HoldLine,
            };
            assert_eq!(controller.mode(), expected, "after {call:?}");
            let in_compass = expected == SteeringMode::Compass;
            assert_eq!(controller.listener_active(), in_compass, "after {call:?}");
            assert_eq!(hub.listener_count(), usize::from(in_compass), "after {call:?}");
        }
    }

    #[tokio::test]
    async fn denied_permission_keeps_previous_mode() {
        let (controller, hub, _transport) = controller(Permission::Denied);
        controller.enable_hold_line().await.unwrap();

        assert!(matches!(
            controller.enable_compass().await,
            Err(SyncError::PermissionDenied)
        ));
        assert_eq!(controller.mode(), SteeringMode::HoldLine);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn orientation_events_update_heading_only_while_listening() {
        let (controller, hub, _transport) = controller(Permission::Granted);
        controller.enable_compass().await.unwrap();
        hub.dispatch(OrientationEvent::from_alpha(270.0));
        assert_eq!(controller.heading(), Some(90.0));

        controller.enable_route().await.unwrap();
        hub.dispatch(OrientationEvent::from_alpha(0.0));
        assert_eq!(controller.heading(), Some(90.0));
    }

    #[tokio::test]
    async fn hold_line_is_latched_once_and_reverted_on_route() {
        let (controller, _hub, transport) = controller(Permission::Granted);
        controller.enable_hold_line().await.unwrap();
        assert_eq!(transport.requests_to(Method::GET, "/setHoldLine").len(), 1);

        controller.enable_route().await.unwrap();
        let reverts = transport.requests_to(Method::GET, "/controller");
        assert_eq!(reverts.len(), 1);
        assert_eq!(reverts[0].url.query(), Some("type=route"));

        // route -> route does not talk to the device
        controller.enable_route().await.unwrap();
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn dropping_controller_deregisters_listener() {
        let (controller, hub, _transport) = controller(Permission::Granted);
        controller.enable_compass().await.unwrap();
        assert_eq!(hub.listener_count(), 1);
        drop(controller);
        assert_eq!(hub.listener_count(), 0);
    }
}
