use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use crate::store::{BlobStore, StoreCapabilities};
use crate::{BlobError, BlobFile, BlobId, BlobResult, Collection};

type BlobKeyPair = (Collection, BlobId);

struct StagedBlob {
    chunks: BTreeMap<u32, Bytes>,
    started: Instant,
}

struct StoredBlob {
    file: BlobFile,
    chunks: Vec<Bytes>,
}

#[derive(Default)]
struct MemoryState {
    staged: HashMap<BlobKeyPair, StagedBlob>,
    files: HashMap<Collection, HashMap<BlobId, StoredBlob>>,
}

/// In-memory store for tests and single-process development
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs with staged, uncommitted chunks
    pub fn staged_count(&self) -> usize {
        self.state.read().staged.len()
    }

    /// Number of committed blobs in a collection
    pub fn committed_count(&self, collection: &Collection) -> usize {
        self.state
            .read()
            .files
            .get(collection)
            .map(|files| files.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_chunk(
        &self,
        collection: &Collection,
        id: &BlobId,
        index: u32,
        data: Bytes,
    ) -> BlobResult<()> {
        let mut state = self.state.write();
        let staged = state
            .staged
            .entry((collection.clone(), *id))
            .or_insert_with(|| StagedBlob {
                chunks: BTreeMap::new(),
                started: Instant::now(),
            });
        staged.chunks.insert(index, data);
        Ok(())
    }

    async fn commit(&self, file: BlobFile, unique_field: Option<&str>) -> BlobResult<()> {
        let mut state = self.state.write();
        let key = (file.collection.clone(), file.id);

        let staged_len = state.staged.get(&key).map(|s| s.chunks.len()).unwrap_or(0);
        if staged_len != file.chunk_count as usize {
            return Err(BlobError::invalid(format!(
                "blob {} has {} staged chunks, expected {}",
                file.id, staged_len, file.chunk_count
            )));
        }

        if let Some(field) = unique_field {
            if let Some(value) = file.metadata.get(field) {
                let taken = state
                    .files
                    .get(&file.collection)
                    .map(|files| files.values().any(|b| b.file.matches(field, value)))
                    .unwrap_or(false);
                if taken {
                    return Err(BlobError::conflict(field, value_label(value)));
                }
            }
        }

        let chunks = state
            .staged
            .remove(&key)
            .map(|s| s.chunks.into_values().collect())
            .unwrap_or_default();

        state.files.entry(file.collection.clone()).or_default().insert(
            file.id,
            StoredBlob { file, chunks },
        );
        Ok(())
    }

    async fn discard(&self, collection: &Collection, id: &BlobId) -> BlobResult<()> {
        self.state.write().staged.remove(&(collection.clone(), *id));
        Ok(())
    }

    async fn find_file(&self, collection: &Collection, id: &BlobId) -> BlobResult<Option<BlobFile>> {
        let state = self.state.read();
        Ok(state
            .files
            .get(collection)
            .and_then(|files| files.get(id))
            .map(|b| b.file.clone()))
    }

    async fn get_chunk(&self, collection: &Collection, id: &BlobId, index: u32) -> BlobResult<Bytes> {
        let state = self.state.read();
        state
            .files
            .get(collection)
            .and_then(|files| files.get(id))
            .and_then(|b| b.chunks.get(index as usize).cloned())
            .ok_or_else(|| BlobError::not_found(format!("{id} chunk {index}")))
    }

    async fn query(
        &self,
        collection: &Collection,
        field: &str,
        value: &Value,
    ) -> BlobResult<Vec<BlobFile>> {
        let state = self.state.read();
        Ok(state
            .files
            .get(collection)
            .map(|files| {
                files
                    .values()
                    .filter(|b| b.file.matches(field, value))
                    .map(|b| b.file.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &Collection, id: &BlobId) -> BlobResult<bool> {
        let mut state = self.state.write();
        let removed = state
            .files
            .get_mut(collection)
            .and_then(|files| files.remove(id));
        Ok(removed.is_some())
    }

    async fn sweep_staged(&self, older_than: Duration) -> BlobResult<usize> {
        let mut state = self.state.write();
        let before = state.staged.len();
        state.staged.retain(|_, s| s.started.elapsed() < older_than);
        Ok(before - state.staged.len())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic()
    }
}

pub(crate) fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file(collection: Collection, id: BlobId, chunks: u32, original: &str) -> BlobFile {
        let mut metadata = serde_json::Map::new();
        metadata.insert("originalId".into(), Value::String(original.into()));
        BlobFile {
            id,
            collection,
            filename: None,
            content_type: None,
            length: chunks as u64,
            chunk_size: 1,
            chunk_count: chunks,
            uploaded_at: Utc::now(),
            metadata,
        }
    }

    #[tokio::test]
    async fn commit_requires_every_chunk() {
        let store = MemoryBlobStore::new();
        let c = Collection::thumbnails();
        let id = BlobId::new();
        store.put_chunk(&c, &id, 0, Bytes::from_static(b"a")).await.unwrap();

        let err = store.commit(file(c.clone(), id, 2, "x"), None).await.unwrap_err();
        assert!(matches!(err, BlobError::Invalid { .. }));
        assert_eq!(store.committed_count(&c), 0);
    }

    #[tokio::test]
    async fn unique_field_rejects_second_commit() {
        let store = MemoryBlobStore::new();
        let c = Collection::thumbnails();

        let first = BlobId::new();
        store.put_chunk(&c, &first, 0, Bytes::from_static(b"a")).await.unwrap();
        store.commit(file(c.clone(), first, 1, "orig"), Some("originalId")).await.unwrap();

        let second = BlobId::new();
        store.put_chunk(&c, &second, 0, Bytes::from_static(b"b")).await.unwrap();
        let err = store
            .commit(file(c.clone(), second, 1, "orig"), Some("originalId"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.committed_count(&c), 1);
    }

    #[tokio::test]
    async fn sweep_reclaims_old_staging() {
        let store = MemoryBlobStore::new();
        let c = Collection::photos();
        store.put_chunk(&c, &BlobId::new(), 0, Bytes::from_static(b"a")).await.unwrap();

        assert_eq!(store.sweep_staged(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.sweep_staged(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.staged_count(), 0);
    }
}
