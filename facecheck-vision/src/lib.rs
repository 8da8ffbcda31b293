pub mod client;
pub mod face;
pub mod pipeline;

// Re-export commonly used types
pub use client::{ExtractError, Extractor, HttpExtractor};
pub use face::Embedding;
pub use pipeline::Pipeline;
