//! Service URL and API key, persisted in a small preference store.

use std::{
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::SyncError;

/// Launch parameter carrying a one-time service URL.
pub const SERVICE_URL_PARAM: &str = "serviceUrl";
/// Launch parameter carrying a one-time API key.
pub const API_KEY_PARAM: &str = "apiKey";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ServiceSettings {
    /// Parsed base URL. Unset or blank is `Unconfigured`; values are not
    /// validated when saved, so a bad one only shows up here.
    pub fn base_url(&self) -> Result<Url, SyncError> {
        let raw = self
            .service_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(SyncError::Unconfigured)?;
        Url::parse(raw).map_err(|err| SyncError::InvalidUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write preferences to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value persistence for user preferences.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> ServiceSettings;
    fn store(&self, settings: &ServiceSettings) -> Result<(), PersistError>;
}

/// Preferences kept as a JSON document on disk.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PreferenceStore for FileStore {
    fn load(&self) -> ServiceSettings {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return ServiceSettings::default(),
            Err(err) => {
                warn!("failed to read preferences at {}: {err}", self.path.display());
                return ServiceSettings::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|err| {
            warn!(
                "ignoring unreadable preferences at {}: {err}",
                self.path.display()
            );
            ServiceSettings::default()
        })
    }

    fn store(&self, settings: &ServiceSettings) -> Result<(), PersistError> {
        let io_err = |source| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json).map_err(io_err)
    }
}

/// Process-local preferences, nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<ServiceSettings>,
}

impl PreferenceStore for MemoryStore {
    fn load(&self) -> ServiceSettings {
        match self.settings.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => ServiceSettings::default(),
        }
    }

    fn store(&self, settings: &ServiceSettings) -> Result<(), PersistError> {
        if let Ok(mut guard) = self.settings.lock() {
            *guard = settings.clone();
        }
        Ok(())
    }
}

pub struct SettingsStore {
    current: watch::Sender<ServiceSettings>,
    backend: Box<dyn PreferenceStore>,
}

impl SettingsStore {
    pub fn open(backend: impl PreferenceStore + 'static) -> Self {
        let initial = backend.load();
        Self {
            current: watch::Sender::new(initial),
            backend: Box::new(backend),
        }
    }

    pub fn get(&self) -> ServiceSettings {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceSettings> {
        self.current.subscribe()
    }

    /// Update whichever values are given. The in-memory value changes even if
    /// persisting fails.
    pub fn save(
        &self,
        service_url: Option<String>,
        api_key: Option<String>,
    ) -> Result<(), PersistError> {
        if service_url.is_none() && api_key.is_none() {
            return Ok(());
        }
        self.current.send_modify(|settings| {
            if let Some(url) = service_url {
                info!("saving service URL {url}");
                settings.service_url = Some(url);
            }
            if let Some(key) = api_key {
                info!("saving API key");
                settings.api_key = Some(key);
            }
        });
        self.backend.store(&self.current.borrow())
    }

    /// Migrate one-time launch parameters into the store and return the
    /// launch reference without them, so it can be shared safely.
    pub fn bootstrap(&self, launch: &Url) -> Result<Url, PersistError> {
        let mut service_url = None;
        let mut api_key = None;
        let mut kept: Vec<(String, String)> = Vec::new();
        for (key, value) in launch.query_pairs() {
            match key.as_ref() {
                SERVICE_URL_PARAM => service_url = Some(value.into_owned()),
                API_KEY_PARAM => api_key = Some(value.into_owned()),
                _ => kept.push((key.into_owned(), value.into_owned())),
            }
        }

        if service_url.is_none() && api_key.is_none() {
            return Ok(launch.clone());
        }

        let mut stripped = launch.clone();
        if kept.is_empty() {
            stripped.set_query(None);
        } else {
            stripped.query_pairs_mut().clear().extend_pairs(kept);
        }

        self.save(service_url, api_key)?;
        Ok(stripped)
    }
}
