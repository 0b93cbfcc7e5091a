//! Versioned model artifact registry
//!
//! - `store`: on-disk versions, index, atomic active pointer
//! - `lock`: single-writer lock (in-process mutex + on-disk marker)
//! - `promotion`: metric-based activation of candidates

pub mod errors;
pub mod lock;
pub mod promotion;
pub mod store;
pub mod types;

pub use errors::{RegistryError, RegistryResult};
pub use promotion::{promote, PromotionDecision, PromotionPolicy};
pub use store::{version_id, ModelRegistry, DEFAULT_KEEP_LAST};
pub use types::{ActivePointer, DataSpan, ModelMetadata, ModelVersion};
