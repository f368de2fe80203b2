//! Storage-object uploads and downloads

pub mod dispatcher;
pub mod ports;
pub mod transport;

pub use dispatcher::{StorageDispatcher, TransferHandle, TransferRequest, TransferStream};
pub use ports::StorageTransport;
pub use transport::ChannelStorageTransport;
