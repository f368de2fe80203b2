use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cloudlink_domain::{CloudLinkError, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::ports::CredentialProvider;

type RefreshFuture = Shared<BoxFuture<'static, Result<String>>>;

/// Bearer token plus single-flight refresh
///
/// At most one refresh runs at a time. Callers that ask for a refresh while
/// one is in flight await that same refresh and all observe its outcome,
/// success or failure.
pub struct BearerSession {
    provider: Arc<dyn CredentialProvider>,
    token: RwLock<Option<String>>,
    inflight: Mutex<Option<RefreshFuture>>,
    refreshes: AtomicU64,
}

impl BearerSession {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            token: RwLock::new(None),
            inflight: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Whether credentials have been provisioned for this endpoint.
    pub fn is_activated(&self) -> bool {
        self.provider.is_activated()
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// Number of refreshes initiated since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Current token. Waits for an in-flight refresh; asks the provider when
    /// nothing is cached, and refreshes when the provider has nothing either.
    ///
    /// # Errors
    /// Propagates provider failures.
    pub async fn token(&self) -> Result<String> {
        let pending = self.inflight.lock().clone();
        if let Some(pending) = pending {
            return self.complete(pending).await;
        }

        if let Some(token) = self.token.read().clone() {
            return Ok(token);
        }

        match self.provider.token().await? {
            Some(token) => {
                *self.token.write() = Some(token.clone());
                Ok(token)
            }
            None => self.refresh(None).await,
        }
    }

    /// Renew the token after `stale` was rejected.
    ///
    /// Joins an in-flight refresh if there is one. If the cached token already
    /// differs from `stale`, someone else refreshed in the meantime and that
    /// token is returned without contacting the provider.
    ///
    /// # Errors
    /// Returns the refresh failure to every waiting caller.
    #[instrument(skip_all)]
    pub async fn refresh(&self, stale: Option<&str>) -> Result<String> {
        let pending = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    if let Some(current) = self.token.read().as_deref() {
                        if stale.is_some_and(|stale| stale != current) {
                            debug!("token already renewed by another caller");
                            return Ok(current.to_string());
                        }
                    }

                    let count = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(refresh = count, "refreshing bearer token");
                    let provider = Arc::clone(&self.provider);
                    let fut: RefreshFuture =
                        async move { provider.refresh().await }.boxed().shared();
                    *inflight = Some(fut.clone());
                    fut
                }
            }
        };

        self.complete(pending).await
    }

    async fn complete(&self, pending: RefreshFuture) -> Result<String> {
        let result = pending.clone().await;

        let mut inflight = self.inflight.lock();
        if inflight.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
            // Publish the outcome before clearing the in-flight marker so a
            // reader that sees no refresh also sees the new token.
            match &result {
                Ok(token) => *self.token.write() = Some(token.clone()),
                Err(error) => {
                    warn!(error = %error, "bearer token refresh failed");
                    *self.token.write() = None;
                }
            }
            *inflight = None;
        }
        drop(inflight);

        result
    }

    /// Forget the cached token so the next call asks the provider again.
    pub fn invalidate(&self) {
        *self.token.write() = None;
    }
}

impl std::fmt::Debug for BearerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerSession")
            .field("has_token", &self.token.read().is_some())
            .field("refreshing", &self.is_refreshing())
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}

/// Convenience for callers that must have a token and cannot proceed without
/// activation.
pub(crate) fn require_activated(session: &BearerSession) -> Result<()> {
    if session.is_activated() {
        Ok(())
    } else {
        Err(CloudLinkError::Auth("endpoint is not activated".into()))
    }
}
