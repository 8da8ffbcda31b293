use std::collections::HashSet;

use anyhow::Result;

use crate::registry::{Student, StudentDirectory};
use crate::storage::{FaceSample, FaceStore, SampleId};

/// Squared Euclidean distance, accumulated in f64.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

/// Sample closest to `query` by L2 distance with its squared distance.
///
/// Exact ties go to the sample seen first, so callers iterating in id order
/// get the lowest id.
pub fn nearest<'a, I>(samples: I, query: &[f32]) -> Option<(&'a FaceSample, f64)>
where
    I: IntoIterator<Item = &'a FaceSample>,
{
    let mut best: Option<(&FaceSample, f64)> = None;
    for sample in samples {
        let d = squared_distance(&sample.embedding, query);
        match best {
            Some((_, best_d)) if best_d <= d => {}
            _ => best = Some((sample, d)),
        }
    }
    best
}

/// Winning sample joined with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub sample_id: SampleId,
    pub student: Student,
    pub embedding: Vec<f32>,
    pub distance: f64,
}

/// Query-time view over a [`FaceStore`], joined against the student directory.
pub struct VectorIndex<'a> {
    store: &'a FaceStore,
    students: &'a dyn StudentDirectory,
}

impl<'a> VectorIndex<'a> {
    pub fn new(store: &'a FaceStore, students: &'a dyn StudentDirectory) -> Self {
        Self { store, students }
    }

    /// Nearest sample overall, or among owners in `roster` when given.
    ///
    /// Samples whose owner is unknown to the directory never match.
    pub fn nearest(
        &self,
        query: &[f32],
        roster: Option<&HashSet<String>>,
    ) -> Result<Option<Neighbor>> {
        let mut unknown: HashSet<String> = HashSet::new();

        loop {
            let hit = {
                let snapshot = self.store.read();
                let candidates = snapshot.iter().filter(|s| {
                    !unknown.contains(&s.owner) && roster.map_or(true, |r| r.contains(&s.owner))
                });
                nearest(candidates, query).map(|(s, d)| (s.clone(), d))
            };

            let Some((sample, squared)) = hit else {
                return Ok(None);
            };

            match self.students.student(&sample.owner)? {
                Some(student) => {
                    log::debug!(
                        "nearest sample {} of {} at distance {:.4}",
                        sample.id,
                        student.username,
                        squared.sqrt()
                    );
                    return Ok(Some(Neighbor {
                        sample_id: sample.id,
                        student,
                        embedding: sample.embedding,
                        distance: squared.sqrt(),
                    }));
                }
                None => {
                    log::warn!(
                        "face sample {} belongs to unknown student {}",
                        sample.id,
                        sample.owner
                    );
                    unknown.insert(sample.owner);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use rand::Rng;
    use std::path::{Path, PathBuf};

    fn sample(id: SampleId, owner: &str, embedding: Vec<f32>) -> FaceSample {
        FaceSample {
            id,
            owner: owner.to_string(),
            image: PathBuf::from("x.jpg"),
            embedding,
        }
    }

    fn registry(names: &[&str]) -> Registry {
        Registry::new(
            names.iter().map(|n| Student::new(n, None)).collect(),
            vec![],
        )
    }

    #[test]
    fn test_nearest_empty() {
        assert!(nearest(std::iter::empty(), &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_ties_go_to_lowest_id() {
        let samples = vec![
            sample(3, "a", vec![1.0, 0.0]),
            sample(5, "b", vec![-1.0, 0.0]),
        ];
        let (best, d) = nearest(&samples, &[0.0, 0.0]).unwrap();
        assert_eq!(best.id, 3);
        assert_eq!(d, 1.0);
    }

    #[test]
    fn test_nearest_matches_brute_force() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let samples: Vec<FaceSample> = (0..40)
                .map(|i| {
                    sample(
                        i,
                        "s",
                        (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect(),
                    )
                })
                .collect();
            let query: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let (best, d) = nearest(&samples, &query).unwrap();
            let brute = samples
                .iter()
                .map(|s| squared_distance(&s.embedding, &query))
                .fold(f64::INFINITY, f64::min);
            assert_eq!(d, brute);
            assert_eq!(squared_distance(&best.embedding, &query), brute);
        }
    }

    #[test]
    fn test_index_on_empty_store() {
        let store = FaceStore::in_memory(2);
        let reg = registry(&["s1"]);
        let index = VectorIndex::new(&store, &reg);
        assert!(index.nearest(&[1.0, 0.0], None).unwrap().is_none());
    }

    #[test]
    fn test_index_respects_roster() {
        let store = FaceStore::in_memory(2);
        store.insert("s1", vec![1.0, 0.0], Path::new("a.jpg")).unwrap();
        store.insert("s2", vec![0.0, 1.0], Path::new("b.jpg")).unwrap();
        let reg = registry(&["s1", "s2"]);
        let index = VectorIndex::new(&store, &reg);

        let global = index.nearest(&[0.1, 0.9], None).unwrap().unwrap();
        assert_eq!(global.student.username, "s2");

        let roster: HashSet<String> = ["s1".to_string()].into_iter().collect();
        let scoped = index.nearest(&[0.1, 0.9], Some(&roster)).unwrap().unwrap();
        assert_eq!(scoped.student.username, "s1");
        assert_eq!(scoped.embedding, vec![1.0, 0.0]);

        let empty = HashSet::new();
        assert!(index.nearest(&[0.1, 0.9], Some(&empty)).unwrap().is_none());
    }

    #[test]
    fn test_index_skips_unknown_owner() {
        let store = FaceStore::in_memory(2);
        store.insert("ghost", vec![0.0, 1.0], Path::new("a.jpg")).unwrap();
        store.insert("s1", vec![1.0, 0.0], Path::new("b.jpg")).unwrap();
        let reg = registry(&["s1"]);
        let index = VectorIndex::new(&store, &reg);

        let hit = index.nearest(&[0.0, 1.0], None).unwrap().unwrap();
        assert_eq!(hit.student.username, "s1");
    }
}
