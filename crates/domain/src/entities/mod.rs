//! Domain entities - mappings and ranked results

mod class_mapping;
mod prediction;
mod similarity;

pub use class_mapping::{ClassMapping, ClassMappingDocument};
pub use prediction::{PredictionResult, RankedPrediction, softmax};
pub use similarity::{SimilarMatch, SimilarityResult, similarity_from_distance};
