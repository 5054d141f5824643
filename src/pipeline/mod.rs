//! The message-processing pipeline: extraction, normalization, validation,
//! and per-message orchestration.

pub mod extract;
pub mod normalize;
pub mod processor;

pub use extract::Extractor;
pub use normalize::{GeofenceRules, normalize, validate};
pub use processor::{MessageProcessor, PipelineStats};
