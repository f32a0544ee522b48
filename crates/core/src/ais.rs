//! Nearby traffic from the AIS bounding-box search.
//!
//! Uses the same API key as the route lookups. The result is kept as the
//! latest known traffic picture; a failed lookup leaves it untouched.

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    error::{EditError, SyncError},
    model::{Location, lenient_f64, lenient_opt_f64},
    settings::SettingsStore,
    transport::{ApiRequest, Transport, fetch_json},
};

pub const DEFAULT_AIS_URL: &str = "https://ais2.skippo.io/search/bbox";

/// Degrees of latitude and longitude either side of the centre.
pub const DEFAULT_HALF_SPAN: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub lat_top: f64,
    pub lon_left: f64,
    pub lat_bottom: f64,
    pub lon_right: f64,
}

impl BoundingBox {
    pub fn around(center: Location, half_span: f64) -> Self {
        Self {
            lat_top: center.latitude + half_span,
            lon_left: center.longitude - half_span,
            lat_bottom: center.latitude - half_span,
            lon_right: center.longitude + half_span,
        }
    }
}

/// One ship as reported by the search. Fields the console does not read are
/// kept in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AisVessel {
    pub mmsi: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub course: Option<f64>,
    /// Knots.
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub speed: Option<f64>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    ais: Option<Vec<AisVessel>>,
}

pub struct AisClient {
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsStore>,
    endpoint: String,
    traffic: watch::Sender<Vec<AisVessel>>,
}

impl AisClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsStore>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            settings,
            endpoint: endpoint.into(),
            traffic: watch::Sender::new(Vec::new()),
        }
    }

    pub fn traffic(&self) -> Vec<AisVessel> {
        self.traffic.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<AisVessel>> {
        self.traffic.subscribe()
    }

    fn request(&self, bbox: BoundingBox, api_key: &str) -> Result<ApiRequest, SyncError> {
        let mut url = Url::parse(&self.endpoint).map_err(|err| SyncError::InvalidUrl {
            url: self.endpoint.clone(),
            reason: err.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("latTop", &bbox.lat_top.to_string())
            .append_pair("lonLeft", &bbox.lon_left.to_string())
            .append_pair("latBottom", &bbox.lat_bottom.to_string())
            .append_pair("lonRight", &bbox.lon_right.to_string());
        Ok(ApiRequest::get(url).with_basic_auth(api_key))
    }

    /// Search for ships inside `bbox` and publish the result. A response
    /// without an `ais` member counts as no traffic.
    pub async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<AisVessel>, EditError> {
        let settings = self.settings.get();
        let api_key = settings.api_key().ok_or(EditError::MissingApiKey)?;
        let request = self.request(bbox, api_key)?;
        debug!(?bbox, "requesting AIS traffic");
        let response = match fetch_json::<SearchResponse>(self.transport.as_ref(), request).await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("AIS lookup failed: {err}");
                return Err(err.into());
            }
        };
        let ships = response.ais.unwrap_or_default();
        debug!(count = ships.len(), "AIS traffic updated");
        self.traffic.send_replace(ships.clone());
        Ok(ships)
    }
}
