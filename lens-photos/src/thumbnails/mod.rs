mod thumbnails_processor;
mod thumbnails_worker;

pub use thumbnails_processor::{RenderError, Stage, Thumbnail, ThumbnailProcessor};
pub use thumbnails_worker::{ThumbnailOutcome, ThumbnailWorker};
