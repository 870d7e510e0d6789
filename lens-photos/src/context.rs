//! Process-wide wiring: one blob adapter and one queue channel, built at
//! startup from [`PhotosConfig`] and shared by every path.

use std::sync::Arc;

use lens_blob::backend::{FsBlobStore, MemoryBlobStore};
use lens_blob::BlobAdapter;
use lens_core::{LensError, LensResult};
use lens_queue::{ConsumerHandle, MemoryBackend, QueueChannel, QueueError};
use tracing::{info, warn};

use crate::config::{PhotosConfig, QueueBackendKind, StorageBackend};
use crate::photos::PhotosService;
use crate::thumbnails::ThumbnailWorker;

pub struct AppContext {
    pub config: PhotosConfig,
    pub blobs: BlobAdapter,
    pub queue: QueueChannel,
}

impl AppContext {
    /// Open storage, connect the queue and declare the thumbnail queue
    pub async fn build(config: PhotosConfig) -> LensResult<Arc<Self>> {
        let blobs = match config.storage.backend {
            StorageBackend::Memory => BlobAdapter::new(MemoryBlobStore::new(), config.blob_config()),
            StorageBackend::Fs => {
                let store = FsBlobStore::open(config.storage.root.clone())
                    .await
                    .map_err(|e| {
                        LensError::unavailable(format!(
                            "cannot open blob store at {}: {e}",
                            config.storage.root.display()
                        ))
                        .into_anyhow()
                    })?;
                BlobAdapter::new(store, config.blob_config())
            }
        };

        let queue = connect_queue(&config).await.map_err(|e| {
            LensError::unavailable(format!("cannot connect queue: {e}")).into_anyhow()
        })?;
        queue
            .declare(&config.queue.name)
            .await
            .map_err(|e| LensError::unavailable(e.to_string()).into_anyhow())?;

        info!(
            storage = ?config.storage.backend,
            queue_backend = ?config.queue.backend,
            queue = %config.queue.name,
            "Context ready"
        );
        Ok(Arc::new(Self { config, blobs, queue }))
    }

    /// Memory storage and queue with zero backoff
    pub async fn in_memory() -> LensResult<Arc<Self>> {
        Self::build(PhotosConfig::in_memory()).await
    }

    pub fn photos(&self) -> PhotosService {
        PhotosService::new(self.blobs.clone(), self.queue.clone(), self.config.queue.name.clone())
    }

    pub fn thumbnail_worker(&self) -> ThumbnailWorker {
        ThumbnailWorker::new(self.blobs.clone(), &self.config.thumbnail)
    }

    /// Spawn `concurrency` consumer loops sharing one worker
    pub async fn start_workers(&self, concurrency: usize) -> LensResult<Vec<ConsumerHandle>> {
        let worker = Arc::new(self.thumbnail_worker());
        let mut handles = Vec::with_capacity(concurrency.max(1));
        for _ in 0..concurrency.max(1) {
            let handle = self
                .queue
                .consume(&self.config.queue.name, worker.clone())
                .await
                .map_err(|e| LensError::unavailable(e.to_string()).into_anyhow())?;
            handles.push(handle);
        }
        info!(consumers = handles.len(), queue = %self.config.queue.name, "Thumbnail workers started");
        Ok(handles)
    }

    /// Stop consumers, then close the channel
    pub async fn shutdown(&self, handles: Vec<ConsumerHandle>) {
        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                warn!(error = %e, "Consumer did not stop cleanly");
            }
        }
        self.queue.shutdown().await;
    }
}

async fn connect_queue(config: &PhotosConfig) -> Result<QueueChannel, QueueError> {
    match config.queue.backend {
        QueueBackendKind::Memory => {
            QueueChannel::connect(MemoryBackend::new(), config.queue_config()).await
        }
        QueueBackendKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &PhotosConfig) -> Result<QueueChannel, QueueError> {
    let url = config
        .queue
        .url
        .as_deref()
        .ok_or_else(|| QueueError::Backend("queue.url is not set".into()))?;
    let backend = lens_queue::RedisBackend::connect(url).await?;
    QueueChannel::connect(backend, config.queue_config()).await
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &PhotosConfig) -> Result<QueueChannel, QueueError> {
    Err(QueueError::Backend(
        "queue.backend=redis needs the `redis` feature".into(),
    ))
}
