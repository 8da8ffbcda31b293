use facecheck_vision::{Extractor, Pipeline};
use log::{debug, info, warn};

use crate::error::FaceError;
use crate::registry::StudentDirectory;
use crate::storage::{FaceStore, SampleId, StoreError};
use crate::upload::Upload;

/// Decides whether a new selfie may become a face sample.
pub struct EnrollmentGate<'a> {
    pub store: &'a FaceStore,
    pub students: &'a dyn StudentDirectory,
    pub extractor: &'a dyn Extractor,
    pub threshold: f64,
    pub verification: Pipeline,
    pub identification: Pipeline,
}

impl EnrollmentGate<'_> {
    /// Verify `selfie` against the student's card, then store its embedding.
    ///
    /// The selfie file is kept only when a sample referencing it was stored;
    /// on every error it is deleted.
    pub fn enroll(&self, username: &str, selfie: Upload) -> Result<SampleId, FaceError> {
        let student = self
            .students
            .student(username)
            .map_err(FaceError::storage)?
            .ok_or_else(|| FaceError::StudentNotFound(username.to_string()))?;
        let card = student
            .card
            .as_deref()
            .ok_or_else(|| FaceError::CardNotFound(username.to_string()))?;

        let similarity = self
            .extractor
            .compare(card, selfie.path(), self.verification)?;
        debug!(
            "{}: card/selfie similarity {:.4} (threshold {:.4})",
            username, similarity, self.threshold
        );

        if similarity.is_nan() || similarity < self.threshold {
            warn!(
                "{}: selfie rejected, similarity {:.4} below {:.4}",
                username, similarity, self.threshold
            );
            return Err(FaceError::MatchRejected {
                similarity,
                threshold: self.threshold,
            });
        }

        let embedding = self.extractor.embed(selfie.path(), self.identification)?;

        let id = self
            .store
            .insert(username, embedding.into_vec(), selfie.path())
            .map_err(|e| match e {
                StoreError::Persist(cause) => {
                    log::error!("{}: storing face sample failed: {:#}", username, cause);
                    FaceError::CreateFailed
                }
                other => FaceError::from(other),
            })?;

        let image = selfie.keep();
        info!(
            "{}: enrolled face sample {} ({})",
            username,
            id,
            image.display()
        );
        Ok(id)
    }
}
