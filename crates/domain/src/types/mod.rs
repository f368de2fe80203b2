//! Domain data types

pub mod async_request;
pub mod connectivity;
pub mod message;
pub mod storage;

pub use async_request::{AsyncOutcome, AsyncStatus, PollResponse};
pub use connectivity::{ConnectivityCommand, ConnectivityStatus, ControlResponse};
pub use message::{DataItem, DataItems, Message, MessageType, Priority, Reliability};
pub use storage::{
    AtomicProgressState, ProgressState, StorageObject, TransferDirection, TransferEvent,
};
