use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Face embedding as returned by the recognition pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    /// Every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.vector.iter().all(|v| v.is_finite())
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.vector.iter().copied().collect()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::from_vec(values)
    }
}
