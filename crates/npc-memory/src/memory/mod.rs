//! Memory types and conversation context
//!
//! Defines the memory document stored in the search index and the context
//! block assembled from ranked search results.

pub mod context;
pub mod types;

pub use context::{MemoryContext, relationship_score};
pub use types::{Memory, MemoryCategory, RankedMemory, normalize_tags};
