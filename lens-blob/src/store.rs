use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::{BlobFile, BlobId, BlobResult, Collection};

/// Storage primitives every backend implements.
///
/// A blob's chunks are staged first and become visible only when
/// [`commit`](BlobStore::commit) stores its file document. Readers never
/// observe staged chunks.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stage chunk `index` of a blob that is still being written
    async fn put_chunk(
        &self,
        collection: &Collection,
        id: &BlobId,
        index: u32,
        data: Bytes,
    ) -> BlobResult<()>;

    /// Make a fully staged blob visible.
    ///
    /// With `unique_field` set, fails with `BlobError::Conflict` when a
    /// committed blob already has the same value for that metadata field.
    /// The check and the publish are atomic with respect to other commits.
    async fn commit(&self, file: BlobFile, unique_field: Option<&str>) -> BlobResult<()>;

    /// Drop everything staged for a blob. Not an error if nothing is staged.
    async fn discard(&self, collection: &Collection, id: &BlobId) -> BlobResult<()>;

    /// Load a committed file document
    async fn find_file(&self, collection: &Collection, id: &BlobId) -> BlobResult<Option<BlobFile>>;

    /// Load one chunk of a committed blob
    async fn get_chunk(&self, collection: &Collection, id: &BlobId, index: u32) -> BlobResult<Bytes>;

    /// Committed blobs whose top-level metadata `field` equals `value`
    async fn query(
        &self,
        collection: &Collection,
        field: &str,
        value: &Value,
    ) -> BlobResult<Vec<BlobFile>>;

    /// Remove a committed blob. Returns false if it did not exist.
    async fn delete(&self, collection: &Collection, id: &BlobId) -> BlobResult<bool>;

    /// Reclaim staged chunks older than `older_than` (writers that crashed
    /// before commit or discard). Returns the number of blobs reclaimed.
    async fn sweep_staged(&self, older_than: Duration) -> BlobResult<usize>;

    fn capabilities(&self) -> StoreCapabilities;
}

/// Store capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Data survives a process restart
    pub durable: bool,
    /// Several processes may open the same store
    pub shared: bool,
    /// `commit` honours `unique_field`
    pub unique_fields: bool,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self {
            durable: false,
            shared: false,
            unique_fields: true,
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }
}
