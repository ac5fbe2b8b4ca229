//! Port definitions for application layer
//!
//! Ports are interfaces that define how the serving core reaches the model
//! runtime, image decoding, the vector index and the artifact store.
//! Adapters in the infrastructure layer implement these ports.

mod artifact_loader_port;
mod classifier_port;
mod image_preprocessor_port;
mod similarity_index_port;

#[cfg(test)]
pub use artifact_loader_port::MockArtifactLoaderPort;
pub use artifact_loader_port::ArtifactLoaderPort;
#[cfg(test)]
pub use classifier_port::MockClassifierPort;
pub use classifier_port::{ClassifierPort, ModelOutput};
#[cfg(test)]
pub use image_preprocessor_port::MockImagePreprocessorPort;
pub use image_preprocessor_port::ImagePreprocessorPort;
#[cfg(test)]
pub use similarity_index_port::MockSimilarityIndexPort;
pub use similarity_index_port::{IndexHit, SimilarityIndexPort};
