//! Nearest-neighbour matches against the reference embedding index

use serde::Serialize;

use crate::value_objects::ImageId;

/// Map a distance to a similarity score in `(0, 1]`
///
/// `1 / (1 + d)` over the raw metric value. This is the score existing index
/// consumers read, so no further normalisation is applied.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// A single reference image close to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMatch {
    pub image_id: ImageId,
    pub distance: f32,
    pub similarity: f32,
}

impl SimilarMatch {
    /// Create a match, deriving the similarity from the distance
    pub fn new(image_id: ImageId, distance: f32) -> Self {
        Self {
            image_id,
            distance,
            similarity: similarity_from_distance(distance),
        }
    }
}

/// Matches ordered by ascending distance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimilarityResult {
    matches: Vec<SimilarMatch>,
}

impl SimilarityResult {
    /// Wrap matches that are already in index order
    pub const fn new(matches: Vec<SimilarMatch>) -> Self {
        Self { matches }
    }

    /// The matches, nearest first
    pub fn matches(&self) -> &[SimilarMatch] {
        &self.matches
    }

    /// Number of matches
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_is_full_similarity() {
        assert!((similarity_from_distance(0.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn similarity_decreases_with_distance() {
        assert!(similarity_from_distance(1.0) > similarity_from_distance(2.0));
        assert!((similarity_from_distance(1.0) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn large_distance_stays_positive() {
        let s = similarity_from_distance(1.0e9);
        assert!(s > 0.0 && s < 1.0e-6);
    }

    #[test]
    fn match_derives_similarity() {
        let m = SimilarMatch::new(ImageId::new("b").unwrap(), 3.0);
        assert!((m.similarity - 0.25).abs() < f32::EPSILON);
    }
}
