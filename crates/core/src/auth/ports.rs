//! Port interfaces for credentials

use async_trait::async_trait;
use cloudlink_domain::Result;

/// Source of bearer tokens for one endpoint
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, if one has already been obtained
    async fn token(&self) -> Result<Option<String>>;

    /// Obtain a new token, replacing whatever the provider held before
    async fn refresh(&self) -> Result<String>;

    /// Whether the endpoint has been provisioned with credentials at all
    fn is_activated(&self) -> bool;
}
