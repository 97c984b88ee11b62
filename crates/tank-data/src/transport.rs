//! Ordered HTTP strategies for reaching the telemetry provider.
//!
//! A [`Transport`] turns a [`FeedRequest`] into a decoded JSON body. The
//! telemetry client holds them in priority order and tries each at most once
//! per fetch:
//!
//! 1. `primary`  – direct call against the provider base URL,
//! 2. `fallback` – the same strategy against an alternate base URL,
//! 3. `relay`    – the full provider URL handed to a relay endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tank_core::{Result, TankError};

use crate::feed::FeedRequest;

const USER_AGENT: &str = concat!("tank-monitor/", env!("CARGO_PKG_VERSION"));

// ── Trait ─────────────────────────────────────────────────────────────────────

/// One way of fetching a provider document.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label used in logs and errors.
    fn name(&self) -> &str;

    /// Perform the request and decode the body as JSON.
    async fn get_json(&self, request: &FeedRequest) -> Result<Value>;
}

// ── Direct HTTP ───────────────────────────────────────────────────────────────

/// Calls the provider directly at `base_url`.
pub struct HttpTransport {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_json(&self, request: &FeedRequest) -> Result<Value> {
        let url = request.url_for(&self.base_url)?;
        tracing::debug!(transport = %self.name, path = %request.path, "requesting provider");
        send_json(&self.client, &self.name, url).await
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// Asks a relay to fetch the provider URL on our behalf.
///
/// The relay receives the absolute provider URL as its `url` query
/// parameter. Relays that wrap the upstream body (as a JSON string, or as a
/// `contents` string field) are unwrapped.
pub struct RelayTransport {
    relay_url: String,
    target_base: String,
    client: Client,
}

impl RelayTransport {
    pub fn new(relay_url: impl Into<String>, target_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            relay_url: relay_url.into(),
            target_base: target_base.into(),
            client: build_client(timeout)?,
        })
    }

    /// URL actually sent to the relay for `request`.
    pub fn relay_url_for(&self, request: &FeedRequest) -> Result<Url> {
        let target = request.url_for(&self.target_base)?;
        Url::parse_with_params(&self.relay_url, &[("url", target.as_str())])
            .map_err(|e| TankError::Config(format!("invalid relay URL {}: {}", self.relay_url, e)))
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn name(&self) -> &str {
        "relay"
    }

    async fn get_json(&self, request: &FeedRequest) -> Result<Value> {
        let url = self.relay_url_for(request)?;
        tracing::debug!(path = %request.path, "requesting provider through relay");
        let body = send_json(&self.client, "relay", url).await?;
        unwrap_relay_body(body)
    }
}

/// Peel a relay envelope off `body`, if there is one.
fn unwrap_relay_body(body: Value) -> Result<Value> {
    if let Value::String(inner) = &body {
        return Ok(serde_json::from_str(inner)?);
    }
    let wrapped = body
        .get("contents")
        .and_then(Value::as_str)
        .filter(|_| body.get("feeds").is_none() && body.get("id").is_none());
    if let Some(inner) = wrapped {
        return Ok(serde_json::from_str(inner)?);
    }
    Ok(body)
}

// ── Construction ──────────────────────────────────────────────────────────────

/// Base URLs for the transport chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUrls {
    pub primary: String,
    pub fallback: Option<String>,
    pub relay: Option<String>,
}

/// Build the ordered transport chain described by `urls`.
///
/// The relay, when configured, targets the primary base URL.
pub fn build_transports(urls: &TransportUrls, timeout: Duration) -> Result<Vec<Box<dyn Transport>>> {
    let mut chain: Vec<Box<dyn Transport>> = vec![Box::new(HttpTransport::new(
        "primary",
        urls.primary.clone(),
        timeout,
    )?)];
    if let Some(fallback) = &urls.fallback {
        chain.push(Box::new(HttpTransport::new("fallback", fallback.clone(), timeout)?));
    }
    if let Some(relay) = &urls.relay {
        chain.push(Box::new(RelayTransport::new(
            relay.clone(),
            urls.primary.clone(),
            timeout,
        )?));
    }
    Ok(chain)
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TankError::Config(format!("failed to build HTTP client: {}", e)))
}

async fn send_json(client: &Client, transport: &str, url: Url) -> Result<Value> {
    let fail = |message: String| TankError::Transport {
        transport: transport.to_string(),
        message,
    };

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fail("request timed out".to_string())
        } else {
            fail(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("HTTP {}", status)));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| fail(format!("invalid JSON body: {}", e)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
