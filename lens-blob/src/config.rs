/// Default chunk size: 255 KiB, small enough that a chunk plus its
/// bookkeeping stays under 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Configuration for blob operations
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Bytes per stored chunk (the last chunk may be shorter)
    pub chunk_size: usize,

    /// Absolute max size allowed for a single blob (safety guard)
    pub max_blob_bytes: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_blob_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl BlobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size (clamped to at least one byte)
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn with_max_blob_bytes(mut self, bytes: u64) -> Self {
        self.max_blob_bytes = bytes;
        self
    }
}
