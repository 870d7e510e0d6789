//! # lens-blob: chunked blob storage
//!
//! Binary blobs are written as a sequence of fixed-size chunks together
//! with a file document (length, chunk layout, content type, free-form
//! metadata). Blobs live in named collections and are addressed by a
//! system-generated 24-hex id.
//!
//! - **Streamed both ways**: writers take bytes incrementally, readers get
//!   a lazy chunk stream. Nothing buffers a whole blob unless asked to.
//! - **Commit-time visibility**: a blob is invisible until its writer
//!   finishes. Failed, aborted or dropped writers leave nothing behind.
//! - **Metadata queries**: exact-match lookup on top-level metadata
//!   fields, with optional per-field uniqueness enforced at commit.
//!
//! ```text
//! ┌─────────────────┐
//! │   Your Service  │  ← ingestion, workers, retrieval
//! ├─────────────────┤
//! │   BlobAdapter   │  ← writers, chunk streams, id resolution
//! ├─────────────────┤
//! │   BlobStore     │  ← staging, commit, chunk I/O
//! └─────────────────┘
//! ```
//!
//! ```rust
//! use lens_blob::prelude::*;
//! use lens_blob::backend::MemoryBlobStore;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let blobs = BlobAdapter::new(MemoryBlobStore::new(), BlobConfig::default());
//! let photos = Collection::photos();
//!
//! let mut writer = blobs.open_write(&photos, BlobPut::new().with_content_type("image/png"));
//! writer.write(b"\x89PNG...").await?;
//! let file = writer.finish().await?;
//!
//! let opened = blobs.open_read(&photos, &file.id).await?;
//! assert_eq!(opened.content_type(), Some("image/png"));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
mod config;
mod error;
pub mod store;
mod types;
mod writer;

pub use adapter::{BlobAdapter, OpenedBlob};
pub use config::{BlobConfig, DEFAULT_CHUNK_SIZE};
pub use error::{BlobError, BlobResult};
pub use store::{BlobStore, StoreCapabilities};
pub use types::{BlobFile, BlobId, BlobKey, BlobPut, ByteStream, Collection, Metadata};
pub use writer::BlobWriter;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobAdapter, BlobConfig, BlobError, BlobFile, BlobId, BlobPut, BlobResult, BlobStore,
        BlobWriter, ByteStream, Collection, OpenedBlob,
    };
}
