#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use facecheck::config::Config;
use facecheck::registry::{Class, Registry, Student};
use facecheck::{Embedding, ExtractError, Extractor, FaceService, FaceStore, Pipeline};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const DIM: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Compare {
        first: PathBuf,
        second: PathBuf,
        pipeline: Pipeline,
    },
    Embed {
        image: PathBuf,
        pipeline: Pipeline,
    },
}

/// Extractor answering with pre-set results and recording every call.
pub struct ScriptedExtractor {
    pub similarity: Mutex<Result<f64, ExtractError>>,
    pub embedding: Mutex<Result<Vec<f32>, ExtractError>>,
    pub calls: Mutex<Vec<Call>>,
}

impl ScriptedExtractor {
    pub fn new(similarity: f64, embedding: Vec<f32>) -> Self {
        Self {
            similarity: Mutex::new(Ok(similarity)),
            embedding: Mutex::new(Ok(embedding)),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl Extractor for ScriptedExtractor {
    fn embed(&self, image: &Path, pipeline: Pipeline) -> Result<Embedding, ExtractError> {
        self.calls.lock().push(Call::Embed {
            image: image.to_path_buf(),
            pipeline,
        });
        self.embedding.lock().clone().map(Embedding::from_vec)
    }

    fn compare(
        &self,
        first: &Path,
        second: &Path,
        pipeline: Pipeline,
    ) -> Result<f64, ExtractError> {
        self.calls.lock().push(Call::Compare {
            first: first.to_path_buf(),
            second: second.to_path_buf(),
            pipeline,
        });
        self.similarity.lock().clone()
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub service: FaceService,
    pub extractor: Arc<ScriptedExtractor>,
}

pub fn student(username: &str, card: Option<&Path>) -> Student {
    Student {
        username: username.to_string(),
        fullname: format!("Student {}", username),
        course: "K17".to_string(),
        class_name: "KTPM2022".to_string(),
        is_active: true,
        card: card.map(Path::to_path_buf),
    }
}

/// Service over an in-memory store.
///
/// Students: s1 and s2 with cards, s3 without. Class C1 holds s1, C2 is empty.
pub fn fixture(extractor: ScriptedExtractor) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FaceStore::in_memory(DIM);
    fixture_with_store(dir, store, extractor)
}

pub fn fixture_with_store(dir: TempDir, store: FaceStore, extractor: ScriptedExtractor) -> Fixture {
    let cards = dir.path().join("cards");
    std::fs::create_dir_all(&cards).expect("cards dir");
    let card = cards.join("card.jpg");
    std::fs::write(&card, b"card").expect("card");

    let registry = Arc::new(Registry::new(
        vec![
            student("s1", Some(&card)),
            student("s2", Some(&card)),
            student("s3", None),
        ],
        vec![
            Class {
                id: "C1".to_string(),
                name: "Class one".to_string(),
                students: vec!["s1".to_string()],
            },
            Class {
                id: "C2".to_string(),
                name: "Empty class".to_string(),
                students: vec![],
            },
        ],
    ));

    let config = Config {
        dimension: DIM,
        upload_dir: dir.path().join("uploads"),
        ..Config::default()
    };
    let extractor = Arc::new(extractor);
    let service = FaceService::new(
        config,
        store,
        registry.clone(),
        registry,
        extractor.clone(),
    );

    Fixture {
        dir,
        service,
        extractor,
    }
}

impl Fixture {
    /// A selfie already sitting in the upload directory.
    pub fn selfie(&self, name: &str) -> PathBuf {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        let path = uploads.join(name);
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0]).expect("selfie");
        path
    }
}
