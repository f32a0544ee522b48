//! Console fixtures for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rawcat_core::{
    Console, ConsoleOptions, SyncError,
    compass::OrientationSensor,
    edit::DetachedMap,
    settings::{MemoryStore, SettingsStore},
    transport::{ApiRequest, ApiResponse, Transport},
};
use tokio::sync::Semaphore;

/// Fails every request the way an unreachable host does.
pub(crate) struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let source = reqwest::Client::new()
            .get("http://[offline")
            .build()
            .unwrap_err();
        Err(SyncError::Transport {
            url: request.url.to_string(),
            source,
        })
    }
}

/// Answers `200 {}` to everything, records each request on arrival and can
/// hold a path until it is released.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<ApiRequest>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RecordingTransport {
    pub(crate) fn hold(&self, path: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self, path: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(path) {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(request);
        let gate = self.gates.lock().unwrap().get(&path).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        Ok(ApiResponse {
            status: 200,
            body: b"{}".to_vec(),
        })
    }
}

pub(crate) fn console_with(
    transport: Arc<dyn Transport>,
    sensor: Arc<dyn OrientationSensor>,
) -> Arc<Console> {
    let settings = SettingsStore::open(MemoryStore::default());
    let _ = settings.save(
        Some("http://localhost:5000".to_string()),
        Some("a2V5".to_string()),
    );
    Arc::new(Console::new(
        transport,
        Arc::new(settings),
        sensor,
        Arc::new(DetachedMap),
        ConsoleOptions::default(),
    ))
}

pub(crate) fn offline_console(sensor: Arc<dyn OrientationSensor>) -> Arc<Console> {
    console_with(Arc::new(OfflineTransport), sensor)
}
