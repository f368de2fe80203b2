//! Client wiring over the production adapters

use std::sync::Arc;

use cloudlink_core::CloudClient;
use cloudlink_domain::{ClientConfig, Result};

use crate::auth::ClientCredentialsProvider;
use crate::http::ReqwestTransport;

/// Build a [`CloudClient`] talking HTTPS through reqwest and authenticating
/// with the configured OAuth2 client credentials.
///
/// # Errors
/// Returns `CloudLinkError::Config` for an invalid configuration or adapters
/// that cannot be constructed.
pub fn build_client(config: ClientConfig) -> Result<CloudClient> {
    config.validate()?;
    let timeout = config.server.request_timeout();
    let http = ReqwestTransport::from_config(&config.server)?;
    let credentials = if config.server.use_system_proxy {
        ClientCredentialsProvider::with_timeout(config.credentials.clone(), timeout)?
    } else {
        ClientCredentialsProvider::direct(config.credentials.clone(), timeout)?
    };

    CloudClient::builder(config).credentials(Arc::new(credentials)).http(Arc::new(http)).build()
}
