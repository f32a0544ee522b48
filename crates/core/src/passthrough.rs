//! Raw JSON access for the settings/telemetry viewer and the theme toggle.

use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use tracing::info;

use crate::{
    error::SyncError,
    settings::SettingsStore,
    transport::{ApiRequest, Transport, endpoint, fetch_json, send_checked},
};

pub struct DeviceConsole {
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsStore>,
}

impl DeviceConsole {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<SettingsStore>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    fn url(&self, path: &str) -> Result<Url, SyncError> {
        Ok(endpoint(&self.settings.get().base_url()?, path))
    }

    pub async fn fetch_settings(&self) -> Result<Value, SyncError> {
        fetch_json(self.transport.as_ref(), ApiRequest::get(self.url("settings")?)).await
    }

    /// Replace the device settings document wholesale.
    pub async fn upload_settings(&self, settings: &Value) -> Result<Value, SyncError> {
        let request = ApiRequest::post_json(self.url("settings")?, settings)?;
        let echoed = fetch_json(self.transport.as_ref(), request).await?;
        info!("device settings uploaded");
        Ok(echoed)
    }

    pub async fn fetch_data(&self) -> Result<Value, SyncError> {
        fetch_json(self.transport.as_ref(), ApiRequest::get(self.url("data")?)).await
    }

    /// Store the UI theme preference on the device.
    pub async fn push_dark_mode(&self, enabled: bool) -> Result<(), SyncError> {
        let mut url = self.url("rudder")?;
        url.query_pairs_mut()
            .append_pair("darkMode", if enabled { "true" } else { "false" });
        send_checked(self.transport.as_ref(), ApiRequest::get(url)).await?;
        Ok(())
    }

    /// Tell the device to resume route following regardless of the local
    /// steering mode.
    pub async fn follow_route(&self) -> Result<(), SyncError> {
        let mut url = self.url("controller")?;
        url.query_pairs_mut().append_pair("type", "route");
        send_checked(self.transport.as_ref(), ApiRequest::get(url)).await?;
        info!("device switched to route following");
        Ok(())
    }
}
