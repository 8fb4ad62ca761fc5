//! REST tracker client

use super::{Briefing, ExecutionPlan, ItemKind, TrackedItem, TrackerClient};
use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracker reached over HTTPS with a bearer token
pub struct HttpTrackerClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpTrackerClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client whose every request is abandoned after `timeout`
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("a3s-conductor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .timeout(timeout)
            .build()
            .map_err(|e| ConductorError::collaborator(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    /// Client from `[tracker]` config and the resolved token
    pub fn from_config(config: &ConductorConfig) -> Result<Self> {
        let base_url = config.tracker.base_url.clone().ok_or_else(|| {
            ConductorError::ConfigMissing {
                message: "Tracker base URL is not configured".to_string(),
                hint: "Set [tracker] base_url in config.toml or A3S_CONDUCTOR_TRACKER_URL".to_string(),
            }
        })?;
        Self::with_timeout(base_url, config.tracker_token(), config.tracker.timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ConductorError::collaborator(format!("GET {} failed: {}", url, e)))?;
        decode(check(response, &url).await?, &url).await
    }

    async fn post(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        let response = self
            .authorize(self.http.post(&url))
            .send()
            .await
            .map_err(|e| ConductorError::collaborator(format!("POST {} failed: {}", url, e)))?;
        check(response, &url).await?;
        Ok(())
    }
}

async fn check(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConductorError::CollaboratorApi {
        status: Some(status.as_u16()),
        message: format!("{} returned {}: {}", url, status, body.trim()),
    })
}

async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| ConductorError::collaborator(format!("Invalid response from {}: {}", url, e)))
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn execution_plan(&self, epic_id: &str) -> Result<ExecutionPlan> {
        self.get(&format!("epics/{}/execution-plan", epic_id)).await
    }

    async fn list_features(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.get(&format!("epics/{}/features", epic_id)).await
    }

    async fn list_tasks(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.get(&format!("epics/{}/tasks", epic_id)).await
    }

    async fn mark_started(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.post(&format!("{}/{}/start", kind.collection(), identifier))
            .await
    }

    async fn mark_completed(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.post(&format!("{}/{}/complete", kind.collection(), identifier))
            .await
    }

    async fn briefing(&self, epic_id: &str, max_tokens: u32) -> Result<Option<Briefing>> {
        let path = format!("epics/{}/briefing?maxTokens={}", epic_id, max_tokens);
        match self.get::<Briefing>(&path).await {
            Ok(briefing) => Ok(Some(briefing)),
            Err(ConductorError::CollaboratorApi {
                status: Some(status),
                ..
            }) if status == StatusCode::NOT_FOUND.as_u16() => {
                tracing::debug!(epic = %epic_id, "No briefing for epic");
                Ok(None)
            }
            Err(ConductorError::CollaboratorApi { status: None, message }) => {
                tracing::warn!(epic = %epic_id, error = %message, "Briefing unavailable, continuing without it");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
