use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{backend::QueueBackend, QueueResult};

/// Lease expiry reaper: hands expired deliveries back to their queue so a
/// crashed consumer's messages are redelivered.
pub struct LeaseReaper {
    backend: Arc<dyn QueueBackend>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(backend: Arc<dyn QueueBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Run one reaper cycle
    pub async fn reap_expired_leases(&self) -> QueueResult<usize> {
        let reclaimed = self.backend.reclaim_expired().await?;
        if reclaimed > 0 {
            info!("Reclaimed {} expired leases", reclaimed);
        } else {
            debug!("No expired leases found");
        }
        Ok(reclaimed)
    }

    /// Start the reaper background task
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            info!("Starting lease reaper with interval: {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Lease reaper shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.reap_expired_leases().await {
                            warn!("Error during lease reaping: {}", e);
                        }
                    }
                }
            }
        });

        ReaperHandle {
            shutdown_tx,
            join_handle,
        }
    }
}

pub struct ReaperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::DeliveryStatus;

    #[tokio::test]
    async fn reaper_task_reclaims_expired_leases() {
        let backend = MemoryBackend::new();
        let id = backend
            .publish("photos", b"507f1f77bcf86cd799439011".to_vec(), 3)
            .await
            .unwrap();
        backend
            .receive("photos", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        backend.force_lease_expiry(&id).unwrap();

        let handle =
            LeaseReaper::with_interval(Arc::new(backend.clone()), Duration::from_millis(10)).spawn();
        for _ in 0..50 {
            if !backend.get_record(&id).await.unwrap().status.is_leased() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(matches!(
            backend.get_record(&id).await.unwrap().status,
            DeliveryStatus::Retrying { .. }
        ));
    }
}
