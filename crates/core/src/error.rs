use thiserror::Error;

/// Failures raised at the synchronizer boundary. None of these reach the
/// rendering layer as panics; they end up as `last_error` strings.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("service URL is not configured")]
    Unconfigured,
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("orientation permission denied")]
    PermissionDenied,
}

impl SyncError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Unconfigured => "unconfigured",
            SyncError::InvalidUrl { .. } => "invalid_url",
            SyncError::Transport { .. } => "transport",
            SyncError::Status { .. } => "status",
            SyncError::Decode { .. } => "decode",
            SyncError::Encode(_) => "encode",
            SyncError::PermissionDenied => "permission",
        }
    }
}

/// User-facing failures of route editing and the keyed lookups. These are
/// shown to the user as a transient notice rather than only logged.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("place a destination marker first")]
    MissingDestination,
    #[error("an API key is required for route and traffic lookups")]
    MissingApiKey,
    #[error("cannot append to an empty route")]
    EmptyRoute,
    #[error("vessel position is not known yet")]
    NoVesselPosition,
    #[error("waypoint {index} does not exist (route has {len} points)")]
    NoSuchWaypoint { index: usize, len: usize },
    #[error("another route edit is already in progress")]
    SessionActive,
    #[error("no route edit is in progress")]
    NoSession,
    #[error(transparent)]
    Sync(#[from] SyncError),
}
