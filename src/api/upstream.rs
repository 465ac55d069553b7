// src/api/upstream.rs
//! Upstream sports-data API access.
//!
//! [`Upstream`] is the seam the governor calls through. [`ApiFootballClient`]
//! implements it over HTTP for API-Football style services: GET requests,
//! the key in the `x-apisports-key` header, a JSON envelope carrying the
//! payload in `response` and failures in `errors` (which may show up on an
//! HTTP 200).

use async_trait::async_trait;
use log::debug;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::cache::{normalize_endpoint, RequestParams};
use crate::config::Settings;
use crate::error::{GovernorError, GovernorResult};

pub const API_KEY_HEADER: &str = "x-apisports-key";

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Performs one GET against `endpoint` with the given query parameters.
    async fn fetch(&self, endpoint: &str, params: &RequestParams) -> GovernorResult<Value>;

    /// Whether a credential is configured. Without one the governor rejects
    /// requests before queueing them.
    fn has_credential(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "upstream"
    }
}

pub struct ApiFootballClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiFootballClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> GovernorResult<Self> {
        Url::parse(base_url)
            .map_err(|e| GovernorError::Config(format!("invalid base url {}: {}", base_url, e)))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("matchday-governor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GovernorError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn from_settings(settings: &Settings) -> GovernorResult<Self> {
        Self::new(&settings.api_base_url, settings.api_key.clone())
    }

    pub fn build_url(&self, endpoint: &str, params: &RequestParams) -> GovernorResult<Url> {
        let raw = format!("{}{}", self.base_url, normalize_endpoint(endpoint));
        Ok(Url::parse_with_params(&raw, params.iter())?)
    }
}

#[async_trait]
impl Upstream for ApiFootballClient {
    async fn fetch(&self, endpoint: &str, params: &RequestParams) -> GovernorResult<Value> {
        let api_key = self.api_key.as_deref().ok_or(GovernorError::NoCredential)?;
        let url = self.build_url(endpoint, params)?;
        debug!("🌐 GET {}", url);

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        interpret_response(status, retry_after, &body)
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn name(&self) -> &str {
        "api-football"
    }
}

/// Turns a raw HTTP outcome into a payload or a classified error.
pub fn interpret_response(
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> GovernorResult<Value> {
    if let Some(err) = GovernorError::from_status(status, body, retry_after) {
        return Err(err);
    }

    let value: Value = serde_json::from_str(body)?;
    if let Some(err) = value.get("errors").and_then(logical_error) {
        return Err(err);
    }
    Ok(value)
}

/// Classifies a non-empty `errors` field. Empty maps and arrays mean success.
fn logical_error(errors: &Value) -> Option<GovernorError> {
    match errors {
        Value::Object(map) if !map.is_empty() => {
            if map.keys().any(|k| k.eq_ignore_ascii_case("ratelimit")) {
                return Some(GovernorError::RateLimited { retry_after: None });
            }
            let message = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, error_text(v)))
                .collect::<Vec<_>>()
                .join("; ");
            Some(GovernorError::Upstream { status: None, message })
        }
        Value::Array(items) if !items.is_empty() => {
            let message = items.iter().map(error_text).collect::<Vec<_>>().join("; ");
            Some(GovernorError::Upstream { status: None, message })
        }
        Value::String(text) if !text.trim().is_empty() => Some(GovernorError::Upstream {
            status: None,
            message: text.trim().to_string(),
        }),
        _ => None,
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The `response` payload of an API envelope, if any.
pub fn response_payload(envelope: &Value) -> Option<&Value> {
    envelope.get("response")
}
