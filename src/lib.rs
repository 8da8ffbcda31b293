pub mod config;
pub mod enroll;
pub mod error;
pub mod identify;
pub mod index;
pub mod matcher;
pub mod registry;
pub mod service;
pub mod storage;
pub mod upload;

// Re-export vision types for convenience
pub use facecheck_vision::{Embedding, ExtractError, Extractor, HttpExtractor, Pipeline};

pub use error::FaceError;
pub use identify::Candidate;
pub use service::FaceService;
pub use storage::{FaceSample, FaceStore, SampleId};
