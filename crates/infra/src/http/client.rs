use std::time::Duration;

use async_trait::async_trait;
use cloudlink_core::{ChannelRequest, ChannelResponse, HttpTransport, Method};
use cloudlink_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use cloudlink_domain::{CloudLinkError, Result, ServerConfig};
use reqwest::{Client as ReqwestClient, Method as HttpMethod, Url};
use tracing::{debug, instrument};

use crate::errors::InfraError;

/// HTTPS transport backed by reqwest.
///
/// Relative request paths are joined onto the base URL; absolute URLs (such
/// as storage object URIs) are used as-is. Connection failures are re-sent
/// with exponential backoff; timeouts only for idempotent methods, since a
/// POST that timed out may already have been accepted. HTTP statuses are
/// returned untouched so the channel above can decide what a 401 means.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
}

impl ReqwestTransport {
    /// Start building a new transport for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new(base_url)
    }

    /// Build a transport from the server section of the client config.
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        let builder = Self::builder(server.base_url.clone()).timeout(server.request_timeout());
        let builder = if server.use_system_proxy { builder } else { builder.no_proxy() };
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a channel path against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|e| CloudLinkError::Validation(format!("invalid URL {path}: {e}")));
        }

        let mut url = self.base_url.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
        url.set_query(query);
        Ok(url)
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        let multiplier = 1u32 << shift;
        self.base_backoff.saturating_mul(multiplier)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute_once(&self, url: &Url, request: &ChannelRequest) -> reqwest::Result<ChannelResponse> {
        let mut builder = self.client.request(http_method(request.method), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(ChannelResponse { status, headers, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip_all, fields(method = request.method.as_str(), path = %request.path))]
    async fn execute(&self, request: &ChannelRequest) -> Result<ChannelResponse> {
        let url = self.resolve(&request.path)?;
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            debug!(attempt = attempt + 1, %url, "sending HTTP request");

            match self.execute_once(&url, request).await {
                Ok(response) => {
                    debug!(attempt = attempt + 1, status = response.status, "received HTTP response");
                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, "HTTP request failed");

                    if attempt + 1 < attempts && should_retry_error(request.method, &err) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Err(InfraError::http(err, self.timeout).into());
                }
            }
        }

        Err(CloudLinkError::Internal(
            "http transport exhausted retries without producing a result".into(),
        ))
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    base_url: String,
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
    no_proxy: bool,
}

impl ReqwestTransportBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            user_agent: None,
            no_proxy: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts (initial try + re-sends).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Ignore system proxy settings and connect directly.
    pub fn no_proxy(mut self) -> Self {
        self.no_proxy = true;
        self
    }

    /// # Errors
    /// Returns `CloudLinkError::Config` for an unparsable base URL or a
    /// reqwest client that cannot be constructed.
    pub fn build(self) -> Result<ReqwestTransport> {
        let base_url = Url::parse(&self.base_url).map_err(|e| {
            CloudLinkError::Config(format!("invalid base URL {}: {e}", self.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CloudLinkError::Config(format!("base URL {base_url} cannot be a base")));
        }

        let mut builder = ReqwestClient::builder().timeout(self.timeout);
        if self.no_proxy {
            builder = builder.no_proxy();
        }
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder
            .build()
            .map_err(|err| CloudLinkError::Config(format!("http client: {err}")))?;

        Ok(ReqwestTransport {
            client,
            base_url,
            timeout: self.timeout,
            max_attempts: self.max_attempts.max(1),
            base_backoff: self.base_backoff,
        })
    }
}

fn http_method(method: Method) -> HttpMethod {
    match method {
        Method::Get => HttpMethod::GET,
        Method::Post => HttpMethod::POST,
        Method::Put => HttpMethod::PUT,
        Method::Delete => HttpMethod::DELETE,
    }
}

fn should_retry_error(method: Method, err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }
    err.is_timeout() && method != Method::Post
}
