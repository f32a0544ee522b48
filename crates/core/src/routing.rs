//! Client for the external auto-route service that computes new route legs.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, warn};

use crate::{
    error::{EditError, SyncError},
    model::{Coordinate, RouteState},
    settings::SettingsStore,
    transport::{ApiRequest, Transport, fetch_json},
};

pub const DEFAULT_AUTOROUTE_URL: &str = "https://nautical-hub.skippo.io/aws/autoroute";

#[derive(Clone, Debug)]
pub struct RoutingOptions {
    pub endpoint: String,
    pub use_hydrographica: bool,
    /// Metres of water required under the keel.
    pub safety_depth: f64,
    /// Metres of clearance required under bridges and cables.
    pub safety_height: f64,
    /// Knots, used by the service for its time estimate.
    pub boat_speed: f64,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_AUTOROUTE_URL.to_string(),
            use_hydrographica: true,
            safety_depth: 1.5,
            safety_height: 10.0,
            boat_speed: 10.0,
        }
    }
}

pub struct RoutingClient {
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsStore>,
    options: RoutingOptions,
}

impl RoutingClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsStore>,
        options: RoutingOptions,
    ) -> Self {
        Self {
            transport,
            settings,
            options,
        }
    }

    fn request(
        &self,
        start: Coordinate,
        destination: Coordinate,
        api_key: &str,
    ) -> Result<ApiRequest, SyncError> {
        let mut url = Url::parse(&self.options.endpoint).map_err(|err| SyncError::InvalidUrl {
            url: self.options.endpoint.clone(),
            reason: err.to_string(),
        })?;
        let course = format!(
            "{},{};{},{}",
            start.longitude, start.latitude, destination.longitude, destination.latitude
        );
        url.query_pairs_mut()
            .append_pair(
                "usehydrographica",
                if self.options.use_hydrographica {
                    "true"
                } else {
                    "false"
                },
            )
            .append_pair("course", &course)
            .append_pair("safetydepth", &self.options.safety_depth.to_string())
            .append_pair("safetyheight", &self.options.safety_height.to_string())
            .append_pair("boatspeed", &self.options.boat_speed.to_string());
        Ok(ApiRequest::get(url).with_basic_auth(api_key))
    }

    /// Compute a leg from `start` to `destination`. The first coordinate of
    /// the returned leg is the service's rendition of `start`.
    pub async fn fetch_leg(
        &self,
        start: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteState, EditError> {
        let settings = self.settings.get();
        let api_key = settings.api_key().ok_or(EditError::MissingApiKey)?;
        let request = self.request(start, destination, api_key)?;
        debug!("requesting route leg {start:?} -> {destination:?}");
        match fetch_json::<RouteState>(self.transport.as_ref(), request).await {
            Ok(leg) => Ok(leg),
            Err(err) => {
                warn!("route lookup failed: {err}");
                Err(err.into())
            }
        }
    }
}
