//! Authenticated request/response channel

use std::sync::Arc;

use cloudlink_domain::constants::{HEADER_AUTHORIZATION, HEADER_ENDPOINT_ID};
use cloudlink_domain::{CloudLinkError, Result};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::ports::{ChannelRequest, ChannelResponse, HttpTransport, Method};
use crate::auth::BearerSession;

/// HTTPS channel with bearer-refresh-on-401
///
/// Every request carries `Authorization: Bearer <token>` and `X-EndpointId`.
/// A 401 triggers one session refresh (shared with any concurrent caller)
/// followed by exactly one retry; a second 401 is surfaced as an auth error.
pub struct TransportChannel {
    transport: Arc<dyn HttpTransport>,
    session: Arc<BearerSession>,
    endpoint_id: String,
}

impl TransportChannel {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<BearerSession>,
        endpoint_id: impl Into<String>,
    ) -> Self {
        Self { transport, session, endpoint_id: endpoint_id.into() }
    }

    pub fn session(&self) -> &Arc<BearerSession> {
        &self.session
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Send an authenticated request.
    ///
    /// # Errors
    /// - `Auth` when the retry after refresh is still unauthorized, or the
    ///   refresh itself fails
    /// - `Transport`/`Timeout` when no response could be obtained or the
    ///   server answered 408/429/5xx
    /// - `Rejected` for other 4xx responses
    #[instrument(skip_all, fields(method = request.method.as_str(), path = %request.path))]
    pub async fn send(&self, request: ChannelRequest) -> Result<ChannelResponse> {
        let token = self.session.token().await?;
        let response = self.execute(&request, &token).await?;

        if response.status != 401 {
            return response.into_result();
        }

        warn!("request unauthorized; refreshing bearer token");
        let fresh = self.session.refresh(Some(&token)).await?;
        let retry = self.execute(&request, &fresh).await?;

        if retry.status == 401 {
            return Err(CloudLinkError::Auth(format!(
                "{} {} still unauthorized after token refresh",
                request.method.as_str(),
                request.path
            )));
        }

        retry.into_result()
    }

    /// POST `body` as JSON.
    ///
    /// # Errors
    /// See [`TransportChannel::send`].
    pub async fn post_json<T: Serialize + ?Sized + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ChannelResponse> {
        self.send(ChannelRequest::post(path).with_json(body)?).await
    }

    /// GET `path`.
    ///
    /// # Errors
    /// See [`TransportChannel::send`].
    pub async fn get(&self, path: &str) -> Result<ChannelResponse> {
        self.send(ChannelRequest::new(Method::Get, path)).await
    }

    async fn execute(&self, request: &ChannelRequest, token: &str) -> Result<ChannelResponse> {
        let mut authorized = request.clone();
        authorized.set_header(HEADER_AUTHORIZATION, format!("Bearer {token}"));
        authorized.set_header(HEADER_ENDPOINT_ID, self.endpoint_id.clone());

        let response = self.transport.execute(&authorized).await?;
        debug!(status = response.status, "channel response");
        Ok(response)
    }
}
