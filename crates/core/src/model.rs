//! Wire types shared by the synchronizers.
//!
//! Every payload keeps the members it does not understand in an `extra` map so
//! that a snapshot or route read from the service can be written back without
//! losing data.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Steering intent of the vessel. Exactly one is active at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SteeringMode {
    /// Follow the planned route.
    #[default]
    Route,
    /// Hold the heading reported by the operator's compass.
    Compass,
    /// Hold the current line.
    HoldLine,
}

impl SteeringMode {
    /// Value sent as `controllerType` on vessel polls.
    pub fn as_query_value(self) -> &'static str {
        match self {
            SteeringMode::Route => "route",
            SteeringMode::Compass => "compass",
            SteeringMode::HoldLine => "holdline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "route" => Some(SteeringMode::Route),
            "compass" => Some(SteeringMode::Compass),
            "holdline" => Some(SteeringMode::HoldLine),
            _ => None,
        }
    }
}

impl fmt::Display for SteeringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query_value())
    }
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Leaflet-style `[lat, lon]` pair used by the position trail.
    pub fn lat_lon(self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

impl From<Coordinate> for Location {
    fn from(coordinate: Coordinate) -> Self {
        Location::new(coordinate.latitude, coordinate.longitude)
    }
}

/// GeoJSON position. Serialized as `[longitude, latitude]`; a trailing
/// altitude member is accepted and dropped.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl TryFrom<Vec<f64>> for Coordinate {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        match values.as_slice() {
            [longitude, latitude, ..] => Ok(Coordinate::new(*longitude, *latitude)),
            _ => Err(format!(
                "expected [longitude, latitude], got {} members",
                values.len()
            )),
        }
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(coordinate: Coordinate) -> Self {
        [coordinate.longitude, coordinate.latitude]
    }
}

impl From<Location> for Coordinate {
    fn from(location: Location) -> Self {
        Coordinate::new(location.longitude, location.latitude)
    }
}

/// Full `/all` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselSnapshot {
    #[serde(default)]
    pub data: VesselData,
    #[serde(default)]
    pub settings: VesselSettings,
}

impl VesselSnapshot {
    /// Current GPS fix, if the snapshot carried one.
    pub fn position(&self) -> Option<Location> {
        self.data.gps.as_ref().map(|gps| gps.location)
    }

    pub fn course(&self) -> Option<f64> {
        self.data.gps.as_ref().map(|gps| gps.course)
    }

    /// Mode the device itself reports, which can lag the local intent.
    pub fn reported_mode(&self) -> Option<SteeringMode> {
        self.settings.controller.as_ref().map(|c| c.kind)
    }

    pub fn dark_mode(&self) -> bool {
        self.settings
            .rudder
            .as_ref()
            .map(|rudder| rudder.dark_mode)
            .unwrap_or(false)
    }

    pub(crate) fn normalize(&mut self) {
        if let Some(gps) = self.data.gps.as_mut() {
            gps.course = normalize_degrees(gps.course);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<Gps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rudder: Option<RudderTelemetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerTelemetry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    pub location: Location,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub course: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RudderTelemetry {
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub voltage: f64,
    #[serde(default)]
    pub filtered_voltage: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerTelemetry {
    #[serde(default)]
    pub error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_max: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rudder: Option<RudderSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(rename = "type")]
    pub kind: SteeringMode,
    #[serde(
        rename = "refCourse",
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub ref_course: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflocation: Option<Location>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RudderSettings {
    #[serde(
        rename = "ref",
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference: Option<f64>,
    #[serde(rename = "darkMode", default)]
    pub dark_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    #[serde(rename = "goalIndex", default, skip_serializing_if = "Option::is_none")]
    pub goal_index: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Planned route as a GeoJSON-like feature. Coordinate order is traversal
/// order and indices into it are what `goalIndex` refers to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteState {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    pub geometry: RouteGeometry,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    #[serde(rename = "type", default = "line_string_kind")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn feature_kind() -> String {
    "Feature".to_string()
}

fn line_string_kind() -> String {
    "LineString".to_string()
}

impl RouteState {
    /// Build a bare `Feature`/`LineString` from coordinates, the same shape a
    /// polyline exports.
    pub fn from_coordinates(coordinates: Vec<Coordinate>) -> Self {
        let mut extra = Map::new();
        extra.insert("properties".to_string(), Value::Object(Map::new()));
        Self {
            kind: feature_kind(),
            geometry: RouteGeometry {
                kind: line_string_kind(),
                coordinates,
                extra: Map::new(),
            },
            extra,
        }
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.geometry.coordinates
    }

    /// Same feature with its coordinates swapped out; other members are kept.
    pub fn with_coordinates(&self, coordinates: Vec<Coordinate>) -> Self {
        let mut route = self.clone();
        route.geometry.coordinates = coordinates;
        route
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrText::Number(value) => Ok(value),
            NumberOrText::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected a number, got {text:?}"))),
        }
    }
}

// The device service writes some numbers back as query-string text.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrText::deserialize(deserializer)?.into_f64()
}

pub(crate) fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(value) => value.into_f64().map(Some),
        None => Ok(None),
    }
}
