//! Analysis pipeline: concurrent aggregation, threshold scoring and
//! LLM narration.

pub mod aggregator;
pub mod narrative;
pub mod scoring;

pub use aggregator::Aggregator;
pub use narrative::{AreaAnalysis, Narration, NarrativeSettings, Narrator};
