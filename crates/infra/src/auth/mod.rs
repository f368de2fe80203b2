//! Credential providers

mod token_client;

pub use token_client::ClientCredentialsProvider;
