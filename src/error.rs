use facecheck_vision::ExtractError;

use crate::storage::{SampleId, StoreError};

/// Errors surfaced by enrollment and identification.
///
/// Store and registry failures are logged where they happen and reach callers
/// only as [`FaceError::Storage`] or [`FaceError::CreateFailed`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FaceError {
    #[error("student {0} not found")]
    StudentNotFound(String),

    #[error("student {0} has no registered card")]
    CardNotFound(String),

    #[error("class {0} not found")]
    ClassNotFound(String),

    #[error("face sample {id} not found for student {student}")]
    SampleNotFound { student: String, id: SampleId },

    #[error("{0}")]
    Validation(String),

    #[error("card and selfie do not match (similarity {similarity:.3} < {threshold:.3})")]
    MatchRejected { similarity: f64, threshold: f64 },

    #[error("face service timed out, try again")]
    Timeout,

    #[error("face service unavailable")]
    ServiceUnavailable,

    #[error("internal storage error")]
    Storage,

    #[error("face sample creation failed")]
    CreateFailed,
}

impl FaceError {
    /// Log the underlying cause and hide it behind [`FaceError::Storage`].
    pub fn storage(cause: anyhow::Error) -> Self {
        log::error!("storage failure: {:#}", cause);
        FaceError::Storage
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FaceError::StudentNotFound(_)
                | FaceError::CardNotFound(_)
                | FaceError::ClassNotFound(_)
                | FaceError::SampleNotFound { .. }
        )
    }

    /// Transient failures where repeating the whole attempt is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaceError::Timeout | FaceError::ServiceUnavailable)
    }
}

impl From<ExtractError> for FaceError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Validation { message, .. } => FaceError::Validation(message),
            ExtractError::Timeout => FaceError::Timeout,
            ExtractError::Image { path, message } => {
                FaceError::storage(anyhow::anyhow!("cannot read image {}: {}", path, message))
            }
            other => {
                log::error!("face service failure: {}", other);
                FaceError::ServiceUnavailable
            }
        }
    }
}

impl From<StoreError> for FaceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DimensionMismatch { .. } | StoreError::NonFinite => {
                FaceError::Validation(err.to_string())
            }
            StoreError::NotFound { id, owner } => FaceError::SampleNotFound { student: owner, id },
            StoreError::Persist(cause) => FaceError::storage(cause),
        }
    }
}
