use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use facecheck_vision::{Extractor, HttpExtractor};
use log::{info, warn};

use crate::config::Config;
use crate::enroll::EnrollmentGate;
use crate::error::FaceError;
use crate::identify::{Candidate, Identifier};
use crate::registry::{ClassRoster, Registry, StudentDirectory};
use crate::storage::{FaceSample, FaceStore, SampleId};
use crate::upload::Upload;

/// Face sample operations for one student store.
pub struct FaceService {
    config: Config,
    store: FaceStore,
    students: Arc<dyn StudentDirectory>,
    classes: Arc<dyn ClassRoster>,
    extractor: Arc<dyn Extractor>,
}

impl FaceService {
    pub fn new(
        config: Config,
        store: FaceStore,
        students: Arc<dyn StudentDirectory>,
        classes: Arc<dyn ClassRoster>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            config,
            store,
            students,
            classes,
            extractor,
        }
    }

    /// Wire up the file store, the TOML registry and the HTTP face service.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = FaceStore::open(&config.store_path, config.dimension)
            .context("Failed to open face store")?;
        let registry = Arc::new(Registry::load(&config.registry_path)?);
        let extractor = HttpExtractor::new(&config.service_url, config.timeout())?;

        Ok(Self::new(
            config,
            store,
            registry.clone(),
            registry,
            Arc::new(extractor),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    /// Copy a selfie into the upload directory.
    pub fn accept_upload(&self, source: &Path) -> Result<Upload, FaceError> {
        Upload::accept(source, &self.config.upload_dir, self.config.max_upload_bytes)
    }

    pub fn enroll(&self, username: &str, selfie: Upload) -> Result<SampleId, FaceError> {
        EnrollmentGate {
            store: &self.store,
            students: self.students.as_ref(),
            extractor: self.extractor.as_ref(),
            threshold: self.config.threshold,
            verification: self.config.verification_pipeline,
            identification: self.config.identification_pipeline,
        }
        .enroll(username, selfie)
    }

    pub fn list_samples(&self, username: &str) -> Result<Vec<FaceSample>, FaceError> {
        self.require_student(username)?;
        Ok(self.store.list_by_owner(username))
    }

    pub fn find_sample(&self, username: &str, id: SampleId) -> Result<FaceSample, FaceError> {
        self.require_student(username)?;
        self.store
            .find_by_id(id)
            .filter(|s| s.owner == username)
            .ok_or_else(|| FaceError::SampleNotFound {
                student: username.to_string(),
                id,
            })
    }

    /// Delete one sample, then its image once the row is gone.
    pub fn delete_sample(&self, username: &str, id: SampleId) -> Result<(), FaceError> {
        self.require_student(username)?;
        let removed = self.store.delete_by_id(id, username)?;
        remove_image(&removed.image);
        info!("{}: deleted face sample {}", username, id);
        Ok(())
    }

    /// Drop every sample of a student whose card was replaced or who was removed.
    pub fn purge_student(&self, username: &str) -> Result<usize, FaceError> {
        let removed = self.store.delete_all_by_owner(username)?;
        for sample in &removed {
            remove_image(&sample.image);
        }
        info!("{}: purged {} face sample(s)", username, removed.len());
        Ok(removed.len())
    }

    pub fn identify(&self, query: &[f32]) -> Result<Option<Candidate>, FaceError> {
        self.identifier().identify(query)
    }

    pub fn identify_in_class(
        &self,
        class_id: &str,
        query: &[f32],
    ) -> Result<Option<Candidate>, FaceError> {
        self.identifier().identify_in_class(class_id, query)
    }

    /// Embed a captured image with the identification pipeline and identify it.
    pub fn identify_image(
        &self,
        image: &Path,
        class_id: Option<&str>,
    ) -> Result<Option<Candidate>, FaceError> {
        let embedding = self
            .extractor
            .embed(image, self.config.identification_pipeline)?
            .into_vec();
        match class_id {
            Some(class_id) => self.identify_in_class(class_id, &embedding),
            None => self.identify(&embedding),
        }
    }

    fn identifier(&self) -> Identifier<'_> {
        Identifier {
            store: &self.store,
            students: self.students.as_ref(),
            classes: self.classes.as_ref(),
        }
    }

    fn require_student(&self, username: &str) -> Result<(), FaceError> {
        if self.students.exists(username).map_err(FaceError::storage)? {
            Ok(())
        } else {
            Err(FaceError::StudentNotFound(username.to_string()))
        }
    }
}

fn remove_image(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("failed to remove image {}: {}", path.display(), e);
    }
}
