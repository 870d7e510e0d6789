//! Filesystem store shared by several processes.
//!
//! ```text
//! {root}/{collection}/staging/{id}/00000000.chunk   chunks of an open writer
//! {root}/{collection}/files/{id}/file.json          committed file document
//! {root}/{collection}/files/{id}/00000000.chunk     committed chunks
//! {root}/{collection}/unique/{field}/{hex(value)}   marker holding the owner id
//! ```
//!
//! Commit writes the file document into the staging directory and renames
//! the whole directory into `files/`, so readers see either nothing or a
//! complete blob. Unique values are claimed with create-new marker files
//! before the rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::backend::memory::value_label;
use crate::store::{BlobStore, StoreCapabilities};
use crate::{BlobError, BlobFile, BlobId, BlobResult, Collection};

const FILE_DOC: &str = "file.json";
const CLAIM_ATTEMPTS: usize = 8;
const CLAIM_BACKOFF: Duration = Duration::from_millis(5);
/// Age after which an unwritten marker or a clearing lock is abandoned
const STALE_GRACE: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize)]
struct StoredDoc {
    file: BlobFile,
    #[serde(default)]
    unique_field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

enum Claim {
    Claimed(PathBuf),
    Taken,
}

enum Clearing {
    /// The marker belongs to a staged or committed blob
    Live,
    Cleared,
    /// Another process is clearing it
    Busy,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self, collection: &Collection, id: &BlobId) -> PathBuf {
        self.root.join(collection.as_str()).join("staging").join(id.to_string())
    }

    fn files_root(&self, collection: &Collection) -> PathBuf {
        self.root.join(collection.as_str()).join("files")
    }

    fn file_dir(&self, collection: &Collection, id: &BlobId) -> PathBuf {
        self.files_root(collection).join(id.to_string())
    }

    fn marker_path(&self, collection: &Collection, field: &str, value: &Value) -> PathBuf {
        self.root
            .join(collection.as_str())
            .join("unique")
            .join(hex::encode(field))
            .join(hex::encode(value.to_string()))
    }

    fn chunk_name(index: u32) -> String {
        format!("{index:08}.chunk")
    }

    async fn read_doc(dir: &Path) -> BlobResult<Option<StoredDoc>> {
        match fs::read(dir.join(FILE_DOC)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn count_chunks(dir: &Path) -> BlobResult<u32> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(".chunk") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Create the marker for `value`, clearing it first if it was left by
    /// a writer that never committed.
    async fn claim(&self, file: &BlobFile, field: &str, value: &Value) -> BlobResult<Claim> {
        let marker = self.marker_path(&file.collection, field, value);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent).await?;
        }

        for attempt in 0..CLAIM_ATTEMPTS {
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
                .await;
            match opened {
                Ok(mut f) => {
                    f.write_all(file.id.to_string().as_bytes()).await?;
                    f.flush().await?;
                    return Ok(Claim::Claimed(marker));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match self.clear_if_stale(&file.collection, field, &marker).await? {
                        Clearing::Live => return Ok(Claim::Taken),
                        Clearing::Cleared => {}
                        Clearing::Busy => {
                            tokio::time::sleep(CLAIM_BACKOFF * (attempt as u32 + 1)).await;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Claim::Taken)
    }

    /// Only one process clears a given marker at a time. The lock file sits
    /// next to the marker and is itself reclaimed once it is old.
    async fn clear_if_stale(
        &self,
        collection: &Collection,
        field: &str,
        marker: &Path,
    ) -> BlobResult<Clearing> {
        let lock = marker.with_extension("clearing");
        match fs::OpenOptions::new().write(true).create_new(true).open(&lock).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Self::older_than(&lock, STALE_GRACE).await {
                    warn!(%collection, field, "Removing abandoned unique marker lock");
                    Self::remove_file_if_present(&lock).await?;
                }
                return Ok(Clearing::Busy);
            }
            Err(e) => return Err(e.into()),
        }

        let cleared = self.clear_locked(collection, field, marker).await;
        if let Err(e) = Self::remove_file_if_present(&lock).await {
            warn!(%collection, field, error = %e, "Failed to release unique marker lock");
        }
        cleared
    }

    async fn clear_locked(
        &self,
        collection: &Collection,
        field: &str,
        marker: &Path,
    ) -> BlobResult<Clearing> {
        let raw = match fs::read_to_string(marker).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Clearing::Cleared),
            Err(e) => return Err(e.into()),
        };

        match BlobId::parse(raw.trim()) {
            Some(owner) => {
                // staging first: a commit renames staging into files
                if fs::try_exists(self.staging_dir(collection, &owner)).await?
                    || fs::try_exists(self.file_dir(collection, &owner)).await?
                {
                    return Ok(Clearing::Live);
                }
            }
            // the owner crashed between creating the marker and writing it
            None if Self::older_than(marker, STALE_GRACE).await => {}
            None => return Ok(Clearing::Live),
        }

        debug!(%collection, field, "Clearing stale unique marker");
        Self::remove_file_if_present(marker).await?;
        Ok(Clearing::Cleared)
    }

    async fn older_than(path: &Path, age: Duration) -> bool {
        match fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|elapsed| elapsed >= age)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn remove_file_if_present(path: &Path) -> BlobResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_dir_if_present(dir: &Path) -> BlobResult<bool> {
        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_chunk(
        &self,
        collection: &Collection,
        id: &BlobId,
        index: u32,
        data: Bytes,
    ) -> BlobResult<()> {
        let dir = self.staging_dir(collection, id);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(Self::chunk_name(index)), &data).await?;
        Ok(())
    }

    async fn commit(&self, file: BlobFile, unique_field: Option<&str>) -> BlobResult<()> {
        let staging = self.staging_dir(&file.collection, &file.id);
        if file.chunk_count == 0 {
            fs::create_dir_all(&staging).await?;
        }

        let staged = Self::count_chunks(&staging).await?;
        if staged != file.chunk_count {
            return Err(BlobError::invalid(format!(
                "blob {} has {} staged chunks, expected {}",
                file.id, staged, file.chunk_count
            )));
        }

        let doc = StoredDoc {
            file: file.clone(),
            unique_field: unique_field.map(str::to_string),
        };
        fs::write(staging.join(FILE_DOC), serde_json::to_vec(&doc)?).await?;

        let mut marker = None;
        if let Some(field) = unique_field {
            if let Some(value) = file.metadata.get(field) {
                match self.claim(&file, field, value).await? {
                    Claim::Claimed(path) => marker = Some(path),
                    Claim::Taken => return Err(BlobError::conflict(field, value_label(value))),
                }
            }
        }

        let target = self.file_dir(&file.collection, &file.id);
        fs::create_dir_all(self.files_root(&file.collection)).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            if let Some(marker) = marker {
                if let Err(cleanup) = Self::remove_file_if_present(&marker).await {
                    warn!(
                        collection = %file.collection,
                        id = %file.id,
                        marker = %marker.display(),
                        error = %cleanup,
                        "Failed to release unique marker after aborted commit"
                    );
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn discard(&self, collection: &Collection, id: &BlobId) -> BlobResult<()> {
        Self::remove_dir_if_present(&self.staging_dir(collection, id)).await?;
        Ok(())
    }

    async fn find_file(&self, collection: &Collection, id: &BlobId) -> BlobResult<Option<BlobFile>> {
        Ok(Self::read_doc(&self.file_dir(collection, id)).await?.map(|d| d.file))
    }

    async fn get_chunk(&self, collection: &Collection, id: &BlobId, index: u32) -> BlobResult<Bytes> {
        let path = self.file_dir(collection, id).join(Self::chunk_name(index));
        match fs::read(&path).await {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobError::not_found(format!("{id} chunk {index}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Scans every file document in the collection.
    async fn query(
        &self,
        collection: &Collection,
        field: &str,
        value: &Value,
    ) -> BlobResult<Vec<BlobFile>> {
        let mut entries = match fs::read_dir(self.files_root(collection)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(doc) = Self::read_doc(&entry.path()).await? {
                if doc.file.matches(field, value) {
                    found.push(doc.file);
                }
            }
        }
        Ok(found)
    }

    async fn delete(&self, collection: &Collection, id: &BlobId) -> BlobResult<bool> {
        let dir = self.file_dir(collection, id);
        let doc = match Self::read_doc(&dir).await? {
            Some(doc) => doc,
            None => return Ok(false),
        };

        if let Some(field) = doc.unique_field.as_deref() {
            if let Some(value) = doc.file.metadata.get(field) {
                Self::remove_file_if_present(&self.marker_path(collection, field, value)).await?;
            }
        }
        Self::remove_dir_if_present(&dir).await
    }

    async fn sweep_staged(&self, older_than: Duration) -> BlobResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut reclaimed = 0;

        let mut collections = fs::read_dir(&self.root).await?;
        while let Some(collection) = collections.next_entry().await? {
            let staging = collection.path().join("staging");
            let mut staged = match fs::read_dir(&staging).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = staged.next_entry().await? {
                let modified = entry.metadata().await?.modified()?;
                if modified <= cutoff {
                    if let Err(e) = fs::remove_dir_all(entry.path()).await {
                        warn!(path = %entry.path().display(), error = %e, "Failed to sweep staged blob");
                        continue;
                    }
                    reclaimed += 1;
                }
            }
        }
        Ok(reclaimed)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().durable().shared()
    }
}
