//! Recording transport for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::{
    error::SyncError,
    transport::{ApiRequest, ApiResponse, Transport},
};

#[derive(Clone)]
enum Reply {
    Json(Value),
    Status(u16),
    Unreachable,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    requests: Mutex<Vec<ApiRequest>>,
    replies: Mutex<HashMap<(Option<Method>, String), Reply>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn set(&self, method: Option<Method>, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert((method, path.to_string()), reply);
    }

    pub(crate) fn respond_json(&self, path: &str, body: Value) {
        self.set(None, path, Reply::Json(body));
    }

    pub(crate) fn respond_json_to(&self, method: Method, path: &str, body: Value) {
        self.set(Some(method), path, Reply::Json(body));
    }

    pub(crate) fn respond_status(&self, path: &str, status: u16) {
        self.set(None, path, Reply::Status(status));
    }

    pub(crate) fn respond_status_to(&self, method: Method, path: &str, status: u16) {
        self.set(Some(method), path, Reply::Status(status));
    }

    pub(crate) fn unreachable(&self, path: &str) {
        self.set(None, path, Reply::Unreachable);
    }

    /// Block requests to `path` until [`release`](Self::release) is called.
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

    pub(crate) fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .collect()
    }

    pub(crate) fn last_request(&self) -> Option<ApiRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// A real `reqwest` failure, produced without touching the network.
pub(crate) fn transport_error(url: String) -> SyncError {
    let source = reqwest::Client::new()
        .get("http://[unreachable")
        .build()
        .unwrap_err();
    SyncError::Transport { url, source }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let path = request.url.path().to_string();
        let method = request.method.clone();
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(request);

        let gate = self.gates.lock().unwrap().get(&path).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let reply = {
            let replies = self.replies.lock().unwrap();
            replies
                .get(&(Some(method), path.clone()))
                .or_else(|| replies.get(&(None, path)))
                .cloned()
        };
        match reply {
            Some(Reply::Json(body)) => Ok(ApiResponse {
                status: 200,
                body: serde_json::to_vec(&body).unwrap(),
            }),
            Some(Reply::Status(status)) => Ok(ApiResponse {
                status,
                body: Vec::new(),
            }),
            Some(Reply::Unreachable) => Err(transport_error(url)),
            None => Ok(ApiResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}
