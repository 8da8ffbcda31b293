use log::info;
use serde::Serialize;

use crate::error::FaceError;
use crate::index::{Neighbor, VectorIndex};
use crate::matcher;
use crate::registry::{ClassRoster, StudentDirectory};
use crate::storage::FaceStore;

/// Best matching student for a probe embedding.
///
/// `similarity` is the cosine score against the winning sample and is the
/// confidence callers should act on; the L2 distance only ranks candidates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub username: String,
    pub fullname: String,
    pub course: String,
    pub class_name: String,
    pub is_active: bool,
    pub similarity: f64,
}

pub struct Identifier<'a> {
    pub store: &'a FaceStore,
    pub students: &'a dyn StudentDirectory,
    pub classes: &'a dyn ClassRoster,
}

impl Identifier<'_> {
    /// Search every enrolled student.
    pub fn identify(&self, query: &[f32]) -> Result<Option<Candidate>, FaceError> {
        self.store.check_vector(query)?;
        let hit = self.index().nearest(query, None).map_err(FaceError::storage)?;
        Ok(hit.map(|n| self.candidate(query, n)))
    }

    /// Search only the roster of `class_id`.
    pub fn identify_in_class(
        &self,
        class_id: &str,
        query: &[f32],
    ) -> Result<Option<Candidate>, FaceError> {
        if !self.classes.class_exists(class_id).map_err(FaceError::storage)? {
            return Err(FaceError::ClassNotFound(class_id.to_string()));
        }
        self.store.check_vector(query)?;

        let roster = self
            .classes
            .students_in_class(class_id)
            .map_err(FaceError::storage)?;
        let hit = self
            .index()
            .nearest(query, Some(&roster))
            .map_err(FaceError::storage)?;
        Ok(hit.map(|n| self.candidate(query, n)))
    }

    fn index(&self) -> VectorIndex<'_> {
        VectorIndex::new(self.store, self.students)
    }

    fn candidate(&self, query: &[f32], hit: Neighbor) -> Candidate {
        let similarity = matcher::match_slices(query, &hit.embedding);
        info!(
            "identified {} (sample {}, distance {:.4}, similarity {:.4})",
            hit.student.username, hit.sample_id, hit.distance, similarity
        );
        Candidate {
            username: hit.student.username,
            fullname: hit.student.fullname,
            course: hit.student.course,
            class_name: hit.student.class_name,
            is_active: hit.student.is_active,
            similarity,
        }
    }
}
