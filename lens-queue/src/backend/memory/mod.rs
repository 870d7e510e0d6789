mod storage;

pub use storage::{MemoryBackend, DEFAULT_ACKED_RETENTION};
