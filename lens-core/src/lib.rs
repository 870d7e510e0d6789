//! lens-core: shared errors, configuration and identifiers for the lens
//! media pipeline.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{LensConfig, LensConfigSnapshot, ENV_PREFIX};
pub use errors::{ErrorKind, LensError, LensResult};
pub use ids::{ObjectId, ParseObjectIdError};
