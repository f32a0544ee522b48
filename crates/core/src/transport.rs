//! HTTP seam used by every synchronizer.
//!
//! The synchronizers only ever build an [`ApiRequest`] and interpret an
//! [`ApiResponse`]; the network itself lives behind [`Transport`] so the
//! reconciliation logic can be driven without a vessel service.

use async_trait::async_trait;
use reqwest::{Client, Method, Url, header};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
    pub authorization: Option<String>,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            authorization: None,
        }
    }

    pub fn post_json<T: Serialize>(url: Url, body: &T) -> Result<Self, SyncError> {
        let body = serde_json::to_value(body).map_err(SyncError::Encode)?;
        Ok(Self {
            method: Method::POST,
            url,
            body: Some(body),
            authorization: None,
        })
    }

    /// Attach `Authorization: Basic <key>`. The key is passed through as-is.
    pub fn with_basic_auth(mut self, key: &str) -> Self {
        self.authorization = Some(format!("Basic {key}"));
        self
    }
}

#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError>;
}

/// `reqwest`-backed transport. No timeout is configured; requests rely on the
/// platform defaults.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let url = request.url.to_string();
        let mut builder = self.client.request(request.method, request.url);
        if let Some(auth) = request.authorization {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|source| SyncError::Transport { url, source })?;
        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Send a request and fail on any non-2xx status.
pub(crate) async fn send_checked(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<ApiResponse, SyncError> {
    let url = request.url.to_string();
    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(SyncError::Status {
            url,
            status: response.status,
        });
    }
    Ok(response)
}

/// Send a request and decode a 2xx JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<T, SyncError> {
    let url = request.url.to_string();
    let response = send_checked(transport, request).await?;
    serde_json::from_slice(&response.body).map_err(|source| SyncError::Decode { url, source })
}

/// Join `path` onto a service base URL, keeping any path prefix the base has.
pub fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    url
}
