//! Port interface for storage-object I/O

use async_trait::async_trait;
use cloudlink_domain::{Result, StorageObject};

/// Chunked access to the storage service
#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Create the object and return its URI.
    async fn allocate(&self, object: &StorageObject) -> Result<String>;

    /// Write `chunk` at `offset`. `total` is the full object length when known.
    async fn put_chunk(&self, uri: &str, offset: u64, chunk: &[u8], total: Option<u64>)
        -> Result<()>;

    /// Read up to `len` bytes from `offset`. Fewer bytes means end of object.
    async fn get_chunk(&self, uri: &str, offset: u64, len: usize) -> Result<Vec<u8>>;
}
