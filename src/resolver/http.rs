use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::engine::{Outcome, PendingItem, Resolution, Resolver};
use crate::error::{AppError, AppResult};

/// Backoff used when the status endpoint does not suggest one
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a backoff suggested by the status endpoint
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60 * 60);

/// Body returned by the status endpoint
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after_seconds: Option<f64>,
}

impl From<StatusResponse> for Resolution {
    fn from(status: StatusResponse) -> Self {
        if !status.done {
            let retry_after = status
                .retry_after_seconds
                .filter(|secs| *secs > 0.0)
                .map(|secs| {
                    Duration::try_from_secs_f64(secs)
                        .unwrap_or(MAX_RETRY_AFTER)
                        .min(MAX_RETRY_AFTER)
                })
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Resolution::pending_after(retry_after);
        }

        if status.success {
            Resolution::Settled(Outcome::Succeeded(status.result.unwrap_or_default()))
        } else {
            Resolution::Settled(Outcome::Failed(status.error.unwrap_or_default()))
        }
    }
}

/// Polls a remote status endpoint: `GET <endpoint>?request_id=<id>`
pub struct HttpResolver {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpResolver {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("build resolver client: {}", e)))?;
        Self::with_client(client, endpoint, api_key)
    }

    pub fn with_client(client: Client, endpoint: &str, api_key: Option<String>) -> AppResult<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(AppError::Config("resolver endpoint required".to_string()));
        }
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AppError::Config(format!("parse resolver endpoint: {}", e)))?;

        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl<T: PendingItem> Resolver<T> for HttpResolver {
    async fn resolve(&self, item: &T) -> AppResult<Resolution> {
        let id = item.pending_id();
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("request_id", &id.to_string());

        let mut request = self.client.get(url);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AppError::Resolver(format!("resolver status {}", status.as_u16())));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| AppError::Resolver(format!("decode resolver response: {}", e)))?;

        debug!(item_id = %id, done = body.done, "resolver answered");
        Ok(body.into())
    }
}
