//! OAuth2 client-credentials token source
//!
//! Exchanges the endpoint's client id and secret for a bearer token at the
//! configured token URL. The token is cached until the session asks for a
//! refresh.

use std::time::Duration;

use async_trait::async_trait;
use cloudlink_core::CredentialProvider;
use cloudlink_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use cloudlink_domain::{CloudLinkError, CredentialsConfig, Result};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::errors::InfraError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct ClientCredentialsProvider {
    client: Client,
    config: CredentialsConfig,
    timeout: Duration,
    token: RwLock<Option<String>>,
}

impl ClientCredentialsProvider {
    /// # Errors
    /// Returns `CloudLinkError::Config` when the HTTP client cannot be built.
    pub fn new(config: CredentialsConfig) -> Result<Self> {
        Self::with_timeout(config, Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    /// # Errors
    /// Returns `CloudLinkError::Config` when the HTTP client cannot be built.
    pub fn with_timeout(config: CredentialsConfig, timeout: Duration) -> Result<Self> {
        Self::build(config, timeout, true)
    }

    /// Like [`with_timeout`](Self::with_timeout), but ignoring system proxy
    /// settings.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Config` when the HTTP client cannot be built.
    pub fn direct(config: CredentialsConfig, timeout: Duration) -> Result<Self> {
        Self::build(config, timeout, false)
    }

    fn build(config: CredentialsConfig, timeout: Duration, use_system_proxy: bool) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if !use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| CloudLinkError::Config(format!("token client: {err}")))?;
        Ok(Self { client, config, timeout, token: RwLock::new(None) })
    }

    /// Drop the cached token so the next request fetches a new one.
    pub fn clear(&self) {
        self.token.write().take();
    }

    async fn request_token(&self) -> Result<String> {
        if self.config.token_url.trim().is_empty() {
            return Err(CloudLinkError::Config("credentials.token_url is not set".into()));
        }

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(scope) = self.config.scope.as_deref() {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| CloudLinkError::from(InfraError::http(err, self.timeout)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| CloudLinkError::from(InfraError::http(err, self.timeout)))?;

        if !status.is_success() {
            let detail = match serde_json::from_slice::<TokenError>(&body) {
                Ok(error) => match error.error_description {
                    Some(description) => format!("{}: {description}", error.error),
                    None => error.error,
                },
                Err(_) => String::from_utf8_lossy(&body).into_owned(),
            };
            warn!(status = status.as_u16(), %detail, "token request refused");
            return Err(match status.as_u16() {
                // Refused credentials are terminal for this endpoint.
                400 | 401 | 403 => CloudLinkError::Auth(format!("token request refused: {detail}")),
                code => CloudLinkError::from_status(code, &detail).unwrap_or_else(|| {
                    CloudLinkError::Protocol(format!("unexpected token status {code}"))
                }),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| CloudLinkError::Protocol(format!("malformed token response: {e}")))?;
        if token.access_token.trim().is_empty() {
            return Err(CloudLinkError::Protocol("token response without access_token".into()));
        }
        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(CloudLinkError::Protocol(format!("unsupported token type {kind}")));
            }
        }

        info!(expires_in = token.expires_in, "access token obtained");
        Ok(token.access_token)
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }

    #[instrument(skip(self), fields(client_id = %self.config.client_id))]
    async fn refresh(&self) -> Result<String> {
        if !self.is_activated() {
            return Err(CloudLinkError::Auth("endpoint is not activated".into()));
        }
        let token = self.request_token().await?;
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    fn is_activated(&self) -> bool {
        !self.config.client_id.trim().is_empty() && !self.config.client_secret.is_empty()
    }
}

impl std::fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("token_url", &self.config.token_url)
            .field("client_id", &self.config.client_id)
            .field("has_token", &self.token.read().is_some())
            .finish_non_exhaustive()
    }
}
