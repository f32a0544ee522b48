//! Explicit wiring of the synchronizers, controller and editor.

use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    ais::{AisClient, DEFAULT_AIS_URL},
    compass::OrientationSensor,
    edit::{DragStrategy, MapSurface, RouteEditor},
    passthrough::DeviceConsole,
    poller::{PollHandle, Poller},
    route::RouteSync,
    routing::{RoutingClient, RoutingOptions},
    settings::SettingsStore,
    steering::SteeringController,
    transport::Transport,
    vessel::VesselSync,
};

pub const VESSEL_STREAM: &str = "vessel";
pub const ROUTE_STREAM: &str = "route";

#[derive(Clone, Debug)]
pub struct ConsoleOptions {
    pub vessel_interval: Duration,
    pub route_interval: Duration,
    /// Trailing window for the position trail; `None` keeps every point.
    pub trail_window: Option<Duration>,
    pub drag_strategy: DragStrategy,
    pub routing: RoutingOptions,
    pub ais_endpoint: String,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            vessel_interval: Duration::from_millis(500),
            route_interval: Duration::from_secs(5),
            trail_window: None,
            drag_strategy: DragStrategy::default(),
            routing: RoutingOptions::default(),
            ais_endpoint: DEFAULT_AIS_URL.to_string(),
        }
    }
}

pub struct Console {
    pub settings: Arc<SettingsStore>,
    pub steering: Arc<SteeringController>,
    pub vessel: Arc<VesselSync>,
    pub route: Arc<RouteSync>,
    pub editor: Arc<RouteEditor>,
    pub device: Arc<DeviceConsole>,
    pub ais: Arc<AisClient>,
    options: ConsoleOptions,
}

/// Running poll timers. Dropping this stops both.
pub struct ConsolePollers {
    pub vessel: PollHandle,
    pub route: PollHandle,
}

impl Console {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsStore>,
        sensor: Arc<dyn OrientationSensor>,
        map: Arc<dyn MapSurface>,
        options: ConsoleOptions,
    ) -> Self {
        let steering = Arc::new(SteeringController::new(
            transport.clone(),
            settings.clone(),
            sensor,
        ));
        let vessel = Arc::new(VesselSync::new(
            transport.clone(),
            steering.subscribe(),
            options.trail_window,
        ));
        let route = Arc::new(RouteSync::new(transport.clone(), settings.clone()));
        let routing = Arc::new(RoutingClient::new(
            transport.clone(),
            settings.clone(),
            options.routing.clone(),
        ));
        let editor = Arc::new(RouteEditor::new(
            route.clone(),
            vessel.clone(),
            routing,
            map,
            options.drag_strategy,
        ));
        let ais = Arc::new(AisClient::new(
            transport.clone(),
            settings.clone(),
            options.ais_endpoint.clone(),
        ));
        let device = Arc::new(DeviceConsole::new(transport, settings.clone()));

        Self {
            settings,
            steering,
            vessel,
            route,
            editor,
            device,
            ais,
            options,
        }
    }

    pub fn vessel_poller(&self) -> Poller {
        Poller::new(
            VESSEL_STREAM,
            self.vessel.clone(),
            self.settings.clone(),
            self.route.pause_flag(),
        )
    }

    pub fn route_poller(&self) -> Poller {
        Poller::new(
            ROUTE_STREAM,
            self.route.clone(),
            self.settings.clone(),
            self.route.pause_flag(),
        )
    }

    pub fn start(&self) -> ConsolePollers {
        info!(
            vessel_ms = self.options.vessel_interval.as_millis() as u64,
            route_ms = self.options.route_interval.as_millis() as u64,
            "starting vessel and route polling"
        );
        ConsolePollers {
            vessel: self.vessel_poller().start(self.options.vessel_interval),
            route: self.route_poller().start(self.options.route_interval),
        }
    }

    /// Teardown: drop the orientation listener. Poll timers stop when their
    /// handles are dropped.
    pub fn shutdown(&self) {
        self.steering.release_listener();
    }
}
