use anyhow::{Context, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u8 = 1;

pub type SampleId = u64;

/// One stored embedding of a student's face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub id: SampleId,
    pub owner: String,
    pub image: PathBuf,
    pub embedding: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("embedding has {got} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding contains non-finite values")]
    NonFinite,

    #[error("face sample {id} not found for {owner}")]
    NotFound { id: SampleId, owner: String },

    #[error("persisting face store")]
    Persist(#[source] anyhow::Error),
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u8,
    dimension: usize,
    next_id: SampleId,
    samples: Vec<&'a FaceSample>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u8,
    dimension: usize,
    next_id: SampleId,
    samples: Vec<FaceSample>,
}

struct State {
    next_id: SampleId,
    samples: BTreeMap<SampleId, FaceSample>,
}

/// Face samples of every student, optionally persisted to one file.
///
/// Every write is persisted while the write lock is held, so a failed write
/// leaves neither memory nor disk changed.
pub struct FaceStore {
    path: Option<PathBuf>,
    dimension: usize,
    state: RwLock<State>,
}

/// Read view over the store; holds the read lock until dropped.
pub struct Snapshot<'a> {
    state: RwLockReadGuard<'a, State>,
}

impl Snapshot<'_> {
    /// Samples in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &FaceSample> {
        self.state.samples.values()
    }
}

impl FaceStore {
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            path: None,
            dimension,
            state: RwLock::new(State {
                next_id: 1,
                samples: BTreeMap::new(),
            }),
        }
    }

    /// Open the store file at `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let mut store = Self::in_memory(dimension);
        store.path = Some(path.to_path_buf());

        if !path.exists() {
            return Ok(store);
        }

        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let file: StoreFile =
            postcard::from_bytes(&data).with_context(|| format!("decoding {}", path.display()))?;

        if file.version != FORMAT_VERSION {
            anyhow::bail!(
                "{} has format version {}, expected {}",
                path.display(),
                file.version,
                FORMAT_VERSION
            );
        }
        if file.dimension != dimension {
            anyhow::bail!(
                "{} holds {}-dimensional embeddings, configured dimension is {}",
                path.display(),
                file.dimension,
                dimension
            );
        }

        let state = store.state.get_mut();
        state.next_id = file.next_id;
        for sample in file.samples {
            if sample.embedding.len() != dimension {
                anyhow::bail!(
                    "sample {} in {} has {} dimensions",
                    sample.id,
                    path.display(),
                    sample.embedding.len()
                );
            }
            state.next_id = state.next_id.max(sample.id + 1);
            state.samples.insert(sample.id, sample);
        }

        log::debug!(
            "loaded {} face samples from {}",
            state.samples.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.state.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self) -> Snapshot<'_> {
        Snapshot {
            state: self.state.read(),
        }
    }

    /// Reject vectors that could never be compared with the stored ones.
    pub fn check_vector(&self, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                got: embedding.len(),
            });
        }
        if !embedding.iter().all(|v| v.is_finite()) {
            return Err(StoreError::NonFinite);
        }
        Ok(())
    }

    pub fn insert(
        &self,
        owner: &str,
        embedding: Vec<f32>,
        image: &Path,
    ) -> Result<SampleId, StoreError> {
        self.check_vector(&embedding)?;

        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        state.samples.insert(
            id,
            FaceSample {
                id,
                owner: owner.to_string(),
                image: image.to_path_buf(),
                embedding,
            },
        );

        if let Err(e) = self.persist(&state) {
            state.samples.remove(&id);
            state.next_id -= 1;
            return Err(StoreError::Persist(e));
        }
        Ok(id)
    }

    pub fn find_by_id(&self, id: SampleId) -> Option<FaceSample> {
        self.state.read().samples.get(&id).cloned()
    }

    /// Samples of `owner` in ascending id order.
    pub fn list_by_owner(&self, owner: &str) -> Vec<FaceSample> {
        self.state
            .read()
            .samples
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }

    /// Remove one sample; it must belong to `owner`.
    pub fn delete_by_id(&self, id: SampleId, owner: &str) -> Result<FaceSample, StoreError> {
        let mut state = self.state.write();
        match state.samples.get(&id) {
            Some(sample) if sample.owner == owner => {}
            _ => {
                return Err(StoreError::NotFound {
                    id,
                    owner: owner.to_string(),
                })
            }
        }

        let removed = state.samples.remove(&id).ok_or_else(|| StoreError::NotFound {
            id,
            owner: owner.to_string(),
        })?;

        if let Err(e) = self.persist(&state) {
            state.samples.insert(id, removed);
            return Err(StoreError::Persist(e));
        }
        Ok(removed)
    }

    /// Remove every sample of `owner`, returning what was removed.
    pub fn delete_all_by_owner(&self, owner: &str) -> Result<Vec<FaceSample>, StoreError> {
        let mut state = self.state.write();
        let ids: Vec<SampleId> = state
            .samples
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| s.id)
            .collect();
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let removed: Vec<FaceSample> = ids
            .iter()
            .filter_map(|id| state.samples.remove(id))
            .collect();

        if let Err(e) = self.persist(&state) {
            for sample in removed {
                state.samples.insert(sample.id, sample);
            }
            return Err(StoreError::Persist(e));
        }
        Ok(removed)
    }

    fn persist(&self, state: &State) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = StoreFileRef {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            next_id: state.next_id,
            samples: state.samples.values().collect(),
        };
        let data = postcard::to_allocvec(&file)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        // temp file -> fsync -> rename so readers never see a half-written store
        let tmp = path.with_extension("tmp");
        let written = write_synced(&tmp, &data)
            .with_context(|| format!("writing {}", tmp.display()))
            .and_then(|_| {
                std::fs::rename(&tmp, path)
                    .with_context(|| format!("replacing {}", path.display()))
            });
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(seed: f32) -> Vec<f32> {
        (0..4).map(|i| seed + i as f32 * 0.1).collect()
    }

    #[test]
    fn test_insert_and_find() {
        let store = FaceStore::in_memory(4);
        let v = vec![0.123_456_79, -1.0e-7, 3.5, f32::MIN_POSITIVE];
        let id = store.insert("s1", v.clone(), Path::new("a.jpg")).unwrap();

        let sample = store.find_by_id(id).unwrap();
        assert_eq!(sample.embedding, v);
        assert_eq!(sample.owner, "s1");
        assert_eq!(sample.image, PathBuf::from("a.jpg"));
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let store = FaceStore::in_memory(4);
        let a = store.insert("s1", vector(0.0), Path::new("a.jpg")).unwrap();
        let b = store.insert("s1", vector(0.0), Path::new("b.jpg")).unwrap();
        store.delete_by_id(b, "s1").unwrap();
        let c = store.insert("s2", vector(1.0), Path::new("c.jpg")).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_rejects_wrong_dimension_and_nan() {
        let store = FaceStore::in_memory(4);
        assert!(matches!(
            store.insert("s1", vec![1.0; 3], Path::new("a.jpg")),
            Err(StoreError::DimensionMismatch {
                expected: 4,
                got: 3
            })
        ));
        assert!(matches!(
            store.insert("s1", vec![1.0, f32::NAN, 0.0, 0.0], Path::new("a.jpg")),
            Err(StoreError::NonFinite)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_by_owner_is_ordered() {
        let store = FaceStore::in_memory(4);
        let a = store.insert("s1", vector(0.0), Path::new("a.jpg")).unwrap();
        store.insert("s2", vector(1.0), Path::new("b.jpg")).unwrap();
        let c = store.insert("s1", vector(2.0), Path::new("c.jpg")).unwrap();

        let ids: Vec<_> = store.list_by_owner("s1").iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(store.list_by_owner("nobody").is_empty());
    }

    #[test]
    fn test_delete_checks_owner() {
        let store = FaceStore::in_memory(4);
        let id = store.insert("s1", vector(0.0), Path::new("a.jpg")).unwrap();

        assert!(matches!(
            store.delete_by_id(id, "s2"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.find_by_id(id).is_some());

        store.delete_by_id(id, "s1").unwrap();
        assert!(store.find_by_id(id).is_none());
        assert!(matches!(
            store.delete_by_id(id, "s1"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_all_by_owner() {
        let store = FaceStore::in_memory(4);
        assert!(store.delete_all_by_owner("s1").unwrap().is_empty());

        store.insert("s1", vector(0.0), Path::new("a.jpg")).unwrap();
        store.insert("s1", vector(1.0), Path::new("b.jpg")).unwrap();
        store.insert("s2", vector(2.0), Path::new("c.jpg")).unwrap();

        let removed = store.delete_all_by_owner("s1").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list_by_owner("s1").is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reload_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.bin");
        let v = vec![0.1, 0.2, 0.300_000_01, -7.25e-12];

        let id = {
            let store = FaceStore::open(&path, 4).unwrap();
            store.insert("s1", vector(0.5), Path::new("a.jpg")).unwrap();
            store.insert("s1", v.clone(), Path::new("b.jpg")).unwrap()
        };

        let store = FaceStore::open(&path, 4).unwrap();
        assert_eq!(store.len(), 2);
        let loaded = store.find_by_id(id).unwrap();
        for (a, b) in loaded.embedding.iter().zip(&v) {
            assert_eq!(a.to_bits(), b.to_bits());
        }

        // ids keep growing after a reload
        let next = store.insert("s2", vector(1.0), Path::new("c.jpg")).unwrap();
        assert!(next > id);
    }

    #[test]
    fn test_open_rejects_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.bin");
        {
            let store = FaceStore::open(&path, 4).unwrap();
            store.insert("s1", vector(0.0), Path::new("a.jpg")).unwrap();
        }
        assert!(FaceStore::open(&path, 512).is_err());
    }

    #[test]
    fn test_failed_persist_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the store directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = FaceStore::open(&blocker.join("faces.bin"), 4).unwrap();

        assert!(matches!(
            store.insert("s1", vector(0.0), Path::new("a.jpg")),
            Err(StoreError::Persist(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_insert_and_purge() {
        let store = FaceStore::in_memory(4);
        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..50 {
                        store
                            .insert("s1", vector(t as f32 + i as f32), Path::new("x.jpg"))
                            .unwrap();
                        if i % 10 == 0 {
                            store.delete_all_by_owner("s1").unwrap();
                        }
                    }
                });
            }
        });

        let listed = store.list_by_owner("s1");
        assert_eq!(listed.len(), store.len());
        let mut ids: Vec<_> = listed.iter().map(|s| s.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), listed.len());
    }
}
