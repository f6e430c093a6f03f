//! Consul HTTP API client using `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::backend::{ConsulBackend, Indexed, QueryOptions};
use crate::errors::ConsulError;

/// Consul's server-side default for `wait` when none is given.
const DEFAULT_WAIT: Duration = Duration::from_secs(300);

/// Slack added to the request timeout on top of the blocking wait.
const WAIT_GRACE: Duration = Duration::from_secs(5);

/// Response header carrying the resource's version marker.
pub const INDEX_HEADER: &str = "X-Consul-Index";

/// Request header carrying the ACL token.
pub const TOKEN_HEADER: &str = "X-Consul-Token";

/// Blocking queries against a Consul agent's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpConsulBackend {
    client: reqwest::Client,
    base: Url,
    datacenter: Option<String>,
    token: Option<String>,
}

impl HttpConsulBackend {
    /// Create a client for the agent at `address` (e.g. `http://127.0.0.1:8500`).
    pub fn new(
        address: &str,
        datacenter: Option<String>,
        token: Option<String>,
    ) -> Result<Self, ConsulError> {
        let base = Url::parse(address)
            .map_err(|e| ConsulError::Unavailable(format!("invalid consul address {address}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConsulError::Unavailable(format!(
                "invalid consul address {address}"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            datacenter,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ConsulError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ConsulError::Unavailable(format!("invalid consul address {}", self.base)))?;
            let _ = path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, url: Url, opts: Option<QueryOptions>) -> reqwest::RequestBuilder {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(dc) = &self.datacenter {
            params.push(("dc", dc.clone()));
        }
        let mut timeout = DEFAULT_WAIT + WAIT_GRACE;
        if let Some(opts) = opts {
            if opts.wait_index > 0 {
                params.push(("index", opts.wait_index.to_string()));
            }
            if let Some(wait) = opts.wait_time {
                params.push(("wait", format!("{}ms", wait.as_millis())));
                // consul adds up to wait/16 of jitter
                timeout = wait + wait / 16 + WAIT_GRACE;
            }
        }

        let mut req = self.client.get(url).query(&params).timeout(timeout);
        if let Some(token) = &self.token {
            req = req.header(TOKEN_HEADER, token);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ConsulError> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConsulError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    #[instrument(skip(self), fields(consul = %self.base))]
    async fn blocking_get(
        &self,
        segments: &[&str],
        opts: QueryOptions,
    ) -> Result<Indexed<Value>, ConsulError> {
        let url = self.url(segments)?;
        let response = self.send(self.request(url, Some(opts))).await?;
        let last_index = parse_index(response.headers())?;
        let bytes = response.bytes().await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        debug!(last_index, "blocking query returned");
        Ok(Indexed { value, last_index })
    }
}

/// Parse `X-Consul-Index` from response headers.
pub fn parse_index(headers: &reqwest::header::HeaderMap) -> Result<u64, ConsulError> {
    headers
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or(ConsulError::MissingIndex)
}

#[async_trait]
impl ConsulBackend for HttpConsulBackend {
    async fn services(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.blocking_get(&["v1", "catalog", "services"], opts).await
    }

    async fn nodes(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.blocking_get(&["v1", "catalog", "nodes"], opts).await
    }

    async fn service(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.blocking_get(&["v1", "health", "service", id], opts).await
    }

    async fn node(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.blocking_get(&["v1", "health", "node", id], opts).await
    }

    async fn datacenters(&self) -> Result<Vec<String>, ConsulError> {
        let url = self.url(&["v1", "catalog", "datacenters"])?;
        let response = self.send(self.request(url, None)).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
