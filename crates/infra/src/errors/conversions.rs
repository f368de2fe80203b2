//! Conversions from external infrastructure errors into domain errors.

use std::time::Duration;

use cloudlink_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use cloudlink_domain::CloudLinkError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CloudLinkError);

impl From<InfraError> for CloudLinkError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CloudLinkError> for InfraError {
    fn from(value: CloudLinkError) -> Self {
        InfraError(value)
    }
}

impl InfraError {
    /// Convert a reqwest failure, reporting timeouts against `timeout`.
    pub fn http(err: HttpError, timeout: Duration) -> Self {
        if err.is_timeout() {
            return InfraError(CloudLinkError::Timeout(timeout));
        }

        if err.is_connect() {
            return InfraError(CloudLinkError::Transport(format!("HTTP connection failure: {err}")));
        }

        if let Some(status) = err.status() {
            let detail = status.canonical_reason().unwrap_or("unknown status");
            if let Some(mapped) = CloudLinkError::from_status(status.as_u16(), detail) {
                return InfraError(mapped);
            }
        }

        if err.is_builder() {
            return InfraError(CloudLinkError::Config(format!("invalid HTTP request: {err}")));
        }

        if err.is_decode() {
            return InfraError(CloudLinkError::Protocol(format!("undecodable HTTP body: {err}")));
        }

        InfraError(CloudLinkError::Transport(format!("HTTP request failed: {err}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CloudLinkError */
/* -------------------------------------------------------------------------- */

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError::http(value, Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}
