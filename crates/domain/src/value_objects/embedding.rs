//! Embedding vector produced by the backbone

use serde::{Deserialize, Serialize};

/// A fixed-dimension feature vector from the backbone's penultimate layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap raw values
    pub const fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of dimensions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no dimensions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the values
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Take ownership of the values
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Whether every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}
