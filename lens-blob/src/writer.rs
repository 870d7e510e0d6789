use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::{BlobError, BlobFile, BlobId, BlobPut, BlobResult, BlobStore, ByteStream, Collection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Finished,
    Aborted,
}

/// Scoped write handle for one blob.
///
/// Bytes are cut into fixed-size chunks and staged as they fill. The blob
/// becomes visible only when [`finish`](BlobWriter::finish) commits it. A
/// failed write, [`abort`](BlobWriter::abort), or dropping the writer
/// without finishing discards whatever was staged.
pub struct BlobWriter {
    store: Arc<dyn BlobStore>,
    collection: Collection,
    id: BlobId,
    put: BlobPut,
    chunk_size: usize,
    max_bytes: u64,
    buffer: BytesMut,
    length: u64,
    next_index: u32,
    state: WriterState,
}

impl BlobWriter {
    pub(crate) fn new(
        store: Arc<dyn BlobStore>,
        collection: Collection,
        put: BlobPut,
        chunk_size: usize,
        max_bytes: u64,
    ) -> Self {
        Self {
            store,
            collection,
            id: BlobId::new(),
            put,
            chunk_size: chunk_size.max(1),
            max_bytes,
            buffer: BytesMut::with_capacity(chunk_size.max(1)),
            length: 0,
            next_index: 0,
            state: WriterState::Open,
        }
    }

    /// Id the blob will have once committed
    pub fn id(&self) -> BlobId {
        self.id
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn bytes_written(&self) -> u64 {
        self.length
    }

    fn ensure_open(&self) -> BlobResult<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Finished => Err(BlobError::invalid("writer already finished")),
            WriterState::Aborted => Err(BlobError::invalid("writer was aborted")),
        }
    }

    /// Append bytes. On error the writer is aborted before returning.
    pub async fn write(&mut self, data: &[u8]) -> BlobResult<()> {
        self.ensure_open()?;
        match self.write_inner(data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    async fn write_inner(&mut self, data: &[u8]) -> BlobResult<()> {
        let new_len = self.length + data.len() as u64;
        if new_len > self.max_bytes {
            return Err(BlobError::TooLarge {
                limit: self.max_bytes,
            });
        }
        self.length = new_len;
        self.buffer.extend_from_slice(data);

        while self.buffer.len() >= self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size).freeze();
            self.stage(chunk).await?;
        }
        Ok(())
    }

    async fn stage(&mut self, chunk: Bytes) -> BlobResult<()> {
        self.store
            .put_chunk(&self.collection, &self.id, self.next_index, chunk)
            .await?;
        self.next_index += 1;
        Ok(())
    }

    /// Pipe an entire source stream into the blob. A source error aborts
    /// the writer and surfaces as `BlobError::Source`.
    pub async fn copy_from(&mut self, mut source: ByteStream) -> BlobResult<u64> {
        self.ensure_open()?;
        let start = self.length;
        while let Some(item) = source.next().await {
            match item {
                Ok(bytes) => self.write(&bytes).await?,
                Err(e) => {
                    self.discard().await;
                    return Err(BlobError::Source { source: e });
                }
            }
        }
        Ok(self.length - start)
    }

    /// Flush the tail chunk and commit. The returned document describes
    /// the now-visible blob.
    pub async fn finish(mut self) -> BlobResult<BlobFile> {
        self.ensure_open()?;

        if !self.buffer.is_empty() {
            let tail = self.buffer.split().freeze();
            if let Err(e) = self.stage(tail).await {
                self.discard().await;
                return Err(e);
            }
        }

        let file = BlobFile {
            id: self.id,
            collection: self.collection.clone(),
            filename: self.put.filename.clone(),
            content_type: self.put.content_type.clone(),
            length: self.length,
            chunk_size: self.chunk_size as u32,
            chunk_count: self.next_index,
            uploaded_at: Utc::now(),
            metadata: std::mem::take(&mut self.put.metadata),
        };

        let unique = self.put.unique_field.clone();
        match self.store.commit(file.clone(), unique.as_deref()).await {
            Ok(()) => {
                self.state = WriterState::Finished;
                debug!(
                    collection = %self.collection,
                    id = %self.id,
                    length = file.length,
                    chunks = file.chunk_count,
                    "Blob committed"
                );
                Ok(file)
            }
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    /// Discard everything staged so far
    pub async fn abort(mut self) -> BlobResult<()> {
        self.ensure_open()?;
        self.state = WriterState::Aborted;
        self.store.discard(&self.collection, &self.id).await
    }

    async fn discard(&mut self) {
        self.state = WriterState::Aborted;
        self.buffer.clear();
        if let Err(e) = self.store.discard(&self.collection, &self.id).await {
            warn!(collection = %self.collection, id = %self.id, error = %e, "Failed to discard staged chunks");
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.state != WriterState::Open {
            return;
        }
        let store = self.store.clone();
        let collection = self.collection.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.discard(&collection, &id).await {
                        warn!(%collection, %id, error = %e, "Failed to discard dropped writer");
                    }
                });
            }
            Err(_) => {
                warn!(%collection, %id, "Writer dropped outside a runtime; staged chunks left for sweep");
            }
        }
    }
}
