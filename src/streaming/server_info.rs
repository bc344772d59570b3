//! Recognition server metadata over HTTP
//!
//! `GET /ping` and `GET /settings`, both aborted after 8 seconds. The
//! settings response advertises engine, version and the available languages,
//! models and features.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Capabilities advertised by `/settings`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub version: String,
    pub engine: String,
    pub languages: Vec<String>,
    pub models: Vec<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    #[serde(default)]
    settings: Option<ServerSettings>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status_text}")]
    Status { status: u16, status_text: String },
}

impl MetadataError {
    pub fn name(&self) -> &'static str {
        "FetchError"
    }
}

/// HTTP client for the server's metadata endpoints
#[derive(Debug, Clone)]
pub struct ServerInfoClient {
    client: reqwest::Client,
    server_url: String,
}

impl ServerInfoClient {
    pub fn new(server_url: &str) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// `GET /ping`, returning whatever JSON the server answers with
    pub async fn ping(&self) -> Result<Value, MetadataError> {
        let url = format!("{}/ping", self.server_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response)?;
        Ok(response.json().await?)
    }

    /// `GET /settings`
    ///
    /// A response without a `settings` object yields empty capabilities.
    pub async fn load_settings(&self) -> Result<ServerSettings, MetadataError> {
        let url = format!("{}/settings", self.server_url);
        let response = self.client.get(&url).send().await?;
        let response = check_status(response)?;
        let body: SettingsResponse = response.json().await?;

        let settings = body.settings.unwrap_or_default();
        log::info!(
            "ServerInfo: engine '{}' version '{}' ({} languages, {} models)",
            settings.engine,
            settings.version,
            settings.languages.len(),
            settings.models.len()
        );
        Ok(settings)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MetadataError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(MetadataError::Status {
        status: status.as_u16(),
        status_text: status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    })
}
