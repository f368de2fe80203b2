//! # CloudLink Infrastructure
//!
//! Infrastructure implementations of core engine ports.
//!
//! This crate contains:
//! - HTTPS transport (reqwest)
//! - OAuth2 client-credentials token provider
//! - Configuration loading from environment and files
//! - Tracing subscriber bootstrap
//!
//! ## Architecture
//! - Implements traits defined in `cloudlink-core`
//! - Depends on `cloudlink-domain` and `cloudlink-core`
//! - Contains all "impure" code (network, filesystem, global subscriber)

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use auth::ClientCredentialsProvider;
pub use bootstrap::build_client;
pub use errors::InfraError;
pub use http::{ReqwestTransport, ReqwestTransportBuilder};
pub use observability::init_tracing;
