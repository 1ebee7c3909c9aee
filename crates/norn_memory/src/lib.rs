pub mod consolidation;
pub mod relevance;
pub mod short_term;

pub use consolidation::{Consolidator, Summarizer};
pub use relevance::rank_memories;
pub use short_term::{BufferStore, ShortTermBuffer};
