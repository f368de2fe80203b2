//! Bearer-token session shared by every transport user of one client

pub mod ports;
mod session;

pub use ports::CredentialProvider;
pub use session::BearerSession;
pub(crate) use session::require_activated;
