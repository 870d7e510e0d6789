use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::instrument;

use crate::{
    BlobConfig, BlobError, BlobFile, BlobKey, BlobPut, BlobResult, BlobStore, BlobWriter,
    ByteStream, Collection, StoreCapabilities,
};

/// A committed blob opened for reading: its file document plus a lazy,
/// finite stream over its chunks. The stream can be consumed once.
pub struct OpenedBlob {
    pub file: BlobFile,
    pub stream: ByteStream,
}

impl OpenedBlob {
    pub fn content_type(&self) -> Option<&str> {
        self.file.content_type.as_deref()
    }

    pub fn content_length(&self) -> u64 {
        self.file.length
    }

    /// Buffer the whole blob, refusing anything larger than `limit`.
    pub async fn into_bytes(self, limit: u64) -> BlobResult<Bytes> {
        if self.file.length > limit {
            return Err(BlobError::TooLarge { limit });
        }
        let mut buf = BytesMut::with_capacity(self.file.length as usize);
        let mut stream = self.stream;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (buf.len() + chunk.len()) as u64 > limit {
                return Err(BlobError::TooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// The blob adapter - infrastructure that services embed, not a service
/// itself.
#[derive(Clone)]
pub struct BlobAdapter {
    store: Arc<dyn BlobStore>,
    config: BlobConfig,
}

impl BlobAdapter {
    pub fn new<S: BlobStore + 'static>(store: S, config: BlobConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    pub fn from_shared(store: Arc<dyn BlobStore>, config: BlobConfig) -> Self {
        Self { store, config }
    }

    /// Open a scoped write handle. Nothing is visible until
    /// [`BlobWriter::finish`].
    pub fn open_write(&self, collection: &Collection, put: BlobPut) -> BlobWriter {
        BlobWriter::new(
            self.store.clone(),
            collection.clone(),
            put,
            self.config.chunk_size,
            self.config.max_blob_bytes,
        )
    }

    /// Store a blob from a stream. Any stream or store error aborts the
    /// write and is returned.
    #[instrument(skip_all, fields(collection = %collection))]
    pub async fn put(
        &self,
        collection: &Collection,
        put: BlobPut,
        body: ByteStream,
    ) -> BlobResult<BlobFile> {
        let mut writer = self.open_write(collection, put);
        writer.copy_from(body).await?;
        writer.finish().await
    }

    /// Open a committed blob for streaming. Malformed and absent ids are
    /// both `NotFound`.
    pub async fn open_read<K>(&self, collection: &Collection, id: &K) -> BlobResult<OpenedBlob>
    where
        K: BlobKey + ?Sized,
    {
        let file = self
            .get(collection, id)
            .await?
            .ok_or_else(|| BlobError::not_found(id.to_string()))?;

        let store = self.store.clone();
        let collection = collection.clone();
        let blob_id = file.id;
        let chunk_count = file.chunk_count;

        let stream = async_stream::stream! {
            for index in 0..chunk_count {
                match store.get_chunk(&collection, &blob_id, index).await {
                    Ok(chunk) => yield Ok(chunk),
                    Err(e) => {
                        yield Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Failed to read chunk {index} of {blob_id}: {e}"),
                        ));
                        return;
                    }
                }
            }
        };

        Ok(OpenedBlob {
            file,
            stream: Box::pin(stream),
        })
    }

    /// File document only. `None` for malformed or absent ids.
    pub async fn get<K>(&self, collection: &Collection, id: &K) -> BlobResult<Option<BlobFile>>
    where
        K: BlobKey + ?Sized,
    {
        match id.blob_id() {
            Some(blob_id) => self.store.find_file(collection, &blob_id).await,
            None => Ok(None),
        }
    }

    /// Exact match on a top-level metadata field. Order is unspecified.
    pub async fn find_by_metadata(
        &self,
        collection: &Collection,
        field: &str,
        value: impl Into<Value>,
    ) -> BlobResult<Vec<BlobFile>> {
        self.store.query(collection, field, &value.into()).await
    }

    /// Administrative removal. Returns false when nothing was deleted.
    pub async fn delete<K>(&self, collection: &Collection, id: &K) -> BlobResult<bool>
    where
        K: BlobKey + ?Sized,
    {
        match id.blob_id() {
            Some(blob_id) => self.store.delete(collection, &blob_id).await,
            None => Ok(false),
        }
    }

    pub async fn sweep_staged(&self, older_than: Duration) -> BlobResult<usize> {
        self.store.sweep_staged(older_than).await
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.store.capabilities()
    }
}
