//! Thumbnail worker: runs `worker.concurrency` consumer loops until ctrl-c.

use lens_photos::prelude::*;
use lens_photos::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = PhotosConfig::load()?;
    let concurrency = config.worker.concurrency;
    let ctx = AppContext::build(config).await?;

    let handles = ctx.start_workers(concurrency).await?;
    info!(queue = %ctx.config.queue.name, "lens-worker running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    ctx.shutdown(handles).await;
    Ok(())
}
