//! Planned-route stream and the optimistic push path.
//!
//! Polls replace the route wholesale unless route fetching is paused, which
//! is what an active edit session does. A successful push replaces the local
//! route right away instead of waiting for the next poll.
//!
//! There is no revision check on apply: a poll that was already in flight
//! when a push went out can still land afterwards and overwrite the pushed
//! route until the next poll corrects it.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::SyncError,
    model::RouteState,
    poller::{PauseFlag, PollSource},
    settings::SettingsStore,
    transport::{ApiRequest, Transport, endpoint, fetch_json, send_checked},
};

pub struct RouteSync {
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsStore>,
    route: watch::Sender<Option<RouteState>>,
    fetch_paused: PauseFlag,
    last_error: watch::Sender<Option<String>>,
}

impl RouteSync {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<SettingsStore>) -> Self {
        Self {
            transport,
            settings,
            route: watch::Sender::new(None),
            fetch_paused: PauseFlag::new(),
            last_error: watch::Sender::new(None),
        }
    }

    pub fn route(&self) -> Option<RouteState> {
        self.route.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RouteState>> {
        self.route.subscribe()
    }

    /// Fetch pause shared by the route and vessel pollers. An edit session
    /// or leg lookup holds it for its whole duration.
    pub fn pause_flag(&self) -> PauseFlag {
        self.fetch_paused.clone()
    }

    pub fn set_fetch_paused(&self, paused: bool) {
        debug!(paused, "route fetch pause changed");
        self.fetch_paused.set(paused);
    }

    pub fn is_fetch_paused(&self) -> bool {
        self.fetch_paused.is_paused()
    }

    /// Overwrite the local route without talking to the service.
    pub fn replace(&self, route: RouteState) {
        self.route.send_replace(Some(route));
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    fn base_url(&self) -> Result<Url, SyncError> {
        self.settings.get().base_url()
    }

    /// POST the full route. On success the local route becomes `route`
    /// immediately; on failure it is left alone and nothing is retried.
    pub async fn push_route(
        &self,
        route: RouteState,
        keep_index: bool,
        goal_index: Option<usize>,
    ) -> Result<(), SyncError> {
        let result = self.try_push(&route, keep_index, goal_index).await;
        match &result {
            Ok(()) => {
                info!(
                    points = route.coordinates().len(),
                    keep_index, "route pushed to vessel"
                );
                self.route.send_replace(Some(route));
            }
            Err(err) => {
                warn!("failed to push route: {err}");
                self.last_error.send_replace(Some(err.to_string()));
            }
        }
        result
    }

    async fn try_push(
        &self,
        route: &RouteState,
        keep_index: bool,
        goal_index: Option<usize>,
    ) -> Result<(), SyncError> {
        let mut url = endpoint(&self.base_url()?, "route");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("keepIndex", if keep_index { "true" } else { "false" });
            if let Some(goal) = goal_index {
                query.append_pair("goalIndex", &goal.to_string());
            }
        }
        let request = ApiRequest::post_json(url, route)?;
        send_checked(self.transport.as_ref(), request).await?;
        Ok(())
    }

    /// Mark waypoint `index` as the current navigation target.
    pub async fn select_goal(&self, index: usize) -> Result<(), SyncError> {
        let mut url = endpoint(&self.base_url()?, "route");
        url.query_pairs_mut()
            .append_pair("goalIndex", &index.to_string());
        match send_checked(self.transport.as_ref(), ApiRequest::get(url)).await {
            Ok(_) => {
                info!(index, "goal waypoint selected");
                Ok(())
            }
            Err(err) => {
                warn!(index, "failed to select goal waypoint: {err}");
                Err(err)
            }
        }
    }
}

#[async_trait]
impl PollSource for RouteSync {
    async fn poll(&self, base: Url) -> Result<(), SyncError> {
        let route: RouteState = fetch_json(
            self.transport.as_ref(),
            ApiRequest::get(endpoint(&base, "route")),
        )
        .await?;
        self.route.send_replace(Some(route));
        self.last_error.send_replace(None);
        Ok(())
    }

    fn report(&self, error: &SyncError) {
        self.last_error.send_replace(Some(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::{
        mock::MockTransport,
        model::Coordinate,
        poller::{Poller, SkipReason},
        settings::MemoryStore,
    };

    fn settings() -> Arc<SettingsStore> {
        let store = SettingsStore::open(MemoryStore::default());
        store
            .save(Some("http://localhost:5000".into()), None)
            .unwrap();
        Arc::new(store)
    }

    fn route_json(points: &[[f64; 2]]) -> serde_json::Value {
        json!({"type": "Feature", "properties": {}, "geometry": {"type": "LineString", "coordinates": points}})
    }

    fn setup() -> (Arc<MockTransport>, Arc<RouteSync>, Poller) {
        let transport = Arc::new(MockTransport::new());
        let settings = settings();
        let sync = Arc::new(RouteSync::new(transport.clone(), settings.clone()));
        let poller = Poller::new("route", sync.clone(), settings, sync.pause_flag());
        (transport, sync, poller)
    }

    #[tokio::test]
    async fn paused_ticks_never_touch_the_route() {
        let (transport, sync, poller) = setup();
        transport.respond_json("/route", route_json(&[[11.0, 57.0]]));
        poller.tick().settle().await;
        let before = sync.route();

        transport.respond_json("/route", route_json(&[[12.0, 58.0]]));
        sync.set_fetch_paused(true);
        for _ in 0..3 {
            assert_eq!(poller.tick().skipped(), Some(SkipReason::Paused));
        }
        assert_eq!(sync.route(), before);
        assert_eq!(transport.requests().len(), 1);

        sync.set_fetch_paused(false);
        poller.tick().settle().await;
        assert_eq!(sync.route().unwrap().coordinates(), &[Coordinate::new(12.0, 58.0)]);
    }

    #[tokio::test]
    async fn successful_push_is_visible_immediately() {
        let (transport, sync, _poller) = setup();
        transport.respond_json_to(Method::POST, "/route", json!({}));
        let route = RouteState::from_coordinates(vec![
            Coordinate::new(11.8, 57.6),
            Coordinate::new(11.9, 57.7),
        ]);

        sync.push_route(route.clone(), true, Some(2)).await.unwrap();
        assert_eq!(sync.route(), Some(route.clone()));

        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.query(), Some("keepIndex=true&goalIndex=2"));
        assert_eq!(request.body, Some(serde_json::to_value(&route).unwrap()));
    }

    #[tokio::test]
    async fn failed_push_leaves_route_unchanged() {
        let (transport, sync, poller) = setup();
        transport.respond_json_to(Method::GET, "/route", route_json(&[[11.0, 57.0]]));
        poller.tick().settle().await;
        let before = sync.route();

        transport.respond_status_to(Method::POST, "/route", 502);
        let pushed = RouteState::from_coordinates(vec![Coordinate::new(1.0, 1.0)]);
        assert!(matches!(
            sync.push_route(pushed, false, None).await,
            Err(SyncError::Status { status: 502, .. })
        ));
        assert_eq!(sync.route(), before);
        assert_eq!(transport.requests_to(Method::POST, "/route").len(), 1);
    }

    #[tokio::test]
    async fn select_goal_sends_index() {
        let (transport, sync, _poller) = setup();
        transport.respond_json("/route", route_json(&[]));
        sync.select_goal(4).await.unwrap();
        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.query(), Some("goalIndex=4"));
        assert!(sync.route().is_none());
    }
}
