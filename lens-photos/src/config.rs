//! Typed settings for the photo pipeline, read from a [`LensConfig`].
//!
//! Layering: built-in defaults, then `.env`, then `LENS__*` environment
//! variables (`LENS__THUMBNAIL__WIDTH=200` sets `thumbnail.width`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lens_blob::BlobConfig;
use lens_core::{bail_lens, LensConfig, LensConfigSnapshot, LensError, LensResult, ENV_PREFIX};
use lens_queue::QueueConfig;

struct PhotosDefaults;

impl PhotosDefaults {
    const STORAGE_BACKEND: &'static str = "memory";
    const STORAGE_ROOT: &'static str = "./data/blobs";
    const CHUNK_SIZE: &'static str = "261120";
    const MAX_BLOB_BYTES: &'static str = "67108864";
    const QUEUE_BACKEND: &'static str = "memory";
    const QUEUE_NAME: &'static str = "photos";
    const MAX_DELIVERIES: &'static str = "5";
    const LEASE_SECS: &'static str = "300";
    const BASE_RETRY_BACKOFF_MS: &'static str = "1000";
    const MAX_RETRY_BACKOFF_MS: &'static str = "60000";
    const WORKER_CONCURRENCY: &'static str = "2";
    const THUMBNAIL_WIDTH: &'static str = "100";
    const THUMBNAIL_HEIGHT: &'static str = "100";
    const THUMBNAIL_QUALITY: &'static str = "85";
    const MAX_SOURCE_BYTES: &'static str = "33554432";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Fs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub root: PathBuf,
    pub chunk_size: usize,
    pub max_blob_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backend: QueueBackendKind,
    pub url: Option<String>,
    pub name: String,
    pub max_deliveries: u32,
    pub lease: Duration,
    pub base_retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Consumer loops per worker process
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Largest original the worker will buffer
    pub max_source_bytes: u64,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            quality: 85,
            max_source_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhotosConfig {
    pub storage: StorageSettings,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub thumbnail: ThumbnailSettings,
}

impl PhotosConfig {
    /// Every key with its built-in default
    pub fn defaults() -> LensConfig {
        LensConfig::with_defaults([
            ("storage.backend", PhotosDefaults::STORAGE_BACKEND),
            ("storage.root", PhotosDefaults::STORAGE_ROOT),
            ("storage.chunk_size", PhotosDefaults::CHUNK_SIZE),
            ("storage.max_blob_bytes", PhotosDefaults::MAX_BLOB_BYTES),
            ("queue.backend", PhotosDefaults::QUEUE_BACKEND),
            ("queue.name", PhotosDefaults::QUEUE_NAME),
            ("queue.max_deliveries", PhotosDefaults::MAX_DELIVERIES),
            ("queue.lease_secs", PhotosDefaults::LEASE_SECS),
            ("queue.base_retry_backoff_ms", PhotosDefaults::BASE_RETRY_BACKOFF_MS),
            ("queue.max_retry_backoff_ms", PhotosDefaults::MAX_RETRY_BACKOFF_MS),
            ("worker.concurrency", PhotosDefaults::WORKER_CONCURRENCY),
            ("thumbnail.width", PhotosDefaults::THUMBNAIL_WIDTH),
            ("thumbnail.height", PhotosDefaults::THUMBNAIL_HEIGHT),
            ("thumbnail.quality", PhotosDefaults::THUMBNAIL_QUALITY),
            ("thumbnail.max_source_bytes", PhotosDefaults::MAX_SOURCE_BYTES),
        ])
    }

    /// Defaults, then `.env`, then the process environment
    pub fn load() -> LensResult<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::defaults();
        config.load_env(ENV_PREFIX);
        Self::from_config(&config)
    }

    pub fn from_config(config: &LensConfig) -> LensResult<Self> {
        let snap = config.snapshot();

        let storage_backend = match snap.get_or("storage.backend", "memory").as_str() {
            "memory" => StorageBackend::Memory,
            "fs" => StorageBackend::Fs,
            other => {
                bail_lens!(bad_request, "unknown storage.backend '{}' (memory|fs)", other)
            }
        };
        let queue_backend = match snap.get_or("queue.backend", "memory").as_str() {
            "memory" => QueueBackendKind::Memory,
            "redis" => QueueBackendKind::Redis,
            other => {
                bail_lens!(bad_request, "unknown queue.backend '{}' (memory|redis)", other)
            }
        };
        let url = snap.get_string("queue.url").filter(|u| !u.is_empty());
        if queue_backend == QueueBackendKind::Redis && url.is_none() {
            bail_lens!(bad_request, "queue.backend=redis requires queue.url");
        }

        let thumbnail = ThumbnailSettings {
            width: required(&snap, "thumbnail.width")?,
            height: required(&snap, "thumbnail.height")?,
            quality: required(&snap, "thumbnail.quality")?,
            max_source_bytes: required(&snap, "thumbnail.max_source_bytes")?,
        };
        if thumbnail.width == 0 || thumbnail.height == 0 {
            bail_lens!(bad_request, "thumbnail dimensions must be positive");
        }
        if !(1..=100).contains(&thumbnail.quality) {
            bail_lens!(bad_request, "thumbnail.quality must be within 1..=100");
        }

        Ok(Self {
            storage: StorageSettings {
                backend: storage_backend,
                root: PathBuf::from(snap.get_or("storage.root", PhotosDefaults::STORAGE_ROOT)),
                chunk_size: required(&snap, "storage.chunk_size")?,
                max_blob_bytes: required(&snap, "storage.max_blob_bytes")?,
            },
            queue: QueueSettings {
                backend: queue_backend,
                url,
                name: snap.get_or("queue.name", PhotosDefaults::QUEUE_NAME),
                max_deliveries: required(&snap, "queue.max_deliveries")?,
                lease: Duration::from_secs(required(&snap, "queue.lease_secs")?),
                base_retry_backoff: Duration::from_millis(required(
                    &snap,
                    "queue.base_retry_backoff_ms",
                )?),
                max_retry_backoff: Duration::from_millis(required(
                    &snap,
                    "queue.max_retry_backoff_ms",
                )?),
            },
            worker: WorkerSettings {
                concurrency: required::<usize>(&snap, "worker.concurrency")?.max(1),
            },
            thumbnail,
        })
    }

    /// In-memory everything, no backoff: tests and one-shot CLI runs
    pub fn in_memory() -> Self {
        Self {
            storage: StorageSettings {
                backend: StorageBackend::Memory,
                root: PathBuf::from(PhotosDefaults::STORAGE_ROOT),
                chunk_size: lens_blob::DEFAULT_CHUNK_SIZE,
                max_blob_bytes: 64 * 1024 * 1024,
            },
            queue: QueueSettings {
                backend: QueueBackendKind::Memory,
                url: None,
                name: PhotosDefaults::QUEUE_NAME.to_string(),
                max_deliveries: 5,
                lease: Duration::from_secs(300),
                base_retry_backoff: Duration::ZERO,
                max_retry_backoff: Duration::ZERO,
            },
            worker: WorkerSettings { concurrency: 1 },
            thumbnail: ThumbnailSettings::default(),
        }
    }

    pub fn blob_config(&self) -> BlobConfig {
        BlobConfig::default()
            .with_chunk_size(self.storage.chunk_size)
            .with_max_blob_bytes(self.storage.max_blob_bytes)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            lease_duration: self.queue.lease,
            max_deliveries: self.queue.max_deliveries.max(1),
            base_retry_backoff: self.queue.base_retry_backoff,
            max_retry_backoff: self.queue.max_retry_backoff,
            ..QueueConfig::default()
        }
    }
}

fn required<T: FromStr>(snap: &LensConfigSnapshot, key: &str) -> LensResult<T> {
    let raw = snap
        .get(key)
        .ok_or_else(|| LensError::bad_request(format!("missing config key {key}")).into_anyhow())?;
    raw.trim().parse().map_err(|_| {
        LensError::bad_request(format!("invalid value for {key}: '{raw}'")).into_anyhow()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline() {
        let config = PhotosConfig::from_config(&PhotosConfig::defaults()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.chunk_size, 255 * 1024);
        assert_eq!(config.queue.name, "photos");
        assert_eq!(config.queue.max_deliveries, 5);
        assert_eq!(config.thumbnail.width, 100);
        assert_eq!(config.thumbnail.height, 100);
        assert_eq!(config.thumbnail.quality, 85);
        assert_eq!(config.queue_config().max_deliveries, 5);
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut config = PhotosConfig::defaults();
        let applied = config.load_vars(
            ENV_PREFIX,
            [
                ("LENS__THUMBNAIL__WIDTH".to_string(), "200".to_string()),
                ("LENS__STORAGE__BACKEND".to_string(), "fs".to_string()),
                ("OTHER".to_string(), "x".to_string()),
            ],
        );
        assert_eq!(applied, 2);

        let config = PhotosConfig::from_config(&config).unwrap();
        assert_eq!(config.thumbnail.width, 200);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = PhotosConfig::defaults();
        config.set("thumbnail.quality", "101");
        assert!(PhotosConfig::from_config(&config).is_err());

        let mut config = PhotosConfig::defaults();
        config.set("worker.concurrency", "many");
        let err = PhotosConfig::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("worker.concurrency"));

        let mut config = PhotosConfig::defaults();
        config.set("queue.backend", "redis");
        assert!(PhotosConfig::from_config(&config).is_err());
    }

    #[test]
    fn in_memory_has_no_backoff() {
        let config = PhotosConfig::in_memory();
        assert_eq!(config.queue.base_retry_backoff, Duration::ZERO);
        assert_eq!(config.queue_config().retry_backoff(3), Duration::ZERO);
    }
}
