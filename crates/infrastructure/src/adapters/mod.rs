//! Adapters implementing application ports
//!
//! CPU-bound vision work is moved onto tokio's blocking pool so it never
//! stalls the request-handling workers.

mod artifact_loader;
mod classifier_adapter;
mod index_adapter;
mod index_builder;
mod preprocessor_adapter;

use application::ApplicationError;
use ai_vision::VisionError;
use tokio::task::JoinError;

pub use artifact_loader::{ArtifactReport, CheckpointSummary, FsArtifactLoader, IndexSummary};
pub use classifier_adapter::VisionClassifierAdapter;
pub use index_adapter::FlatIndexAdapter;
pub use index_builder::{IndexBuildReport, IndexBuilder};
pub use preprocessor_adapter::ImagePreprocessorAdapter;

/// Map runtime errors raised while serving a request
pub(crate) fn map_vision_error(err: VisionError) -> ApplicationError {
    if err.is_input_error() {
        ApplicationError::InvalidImage(err.to_string())
    } else {
        ApplicationError::InferenceFailure(err.to_string())
    }
}

/// Map a blocking task that panicked or was cancelled
pub(crate) fn map_join_error(err: &JoinError) -> ApplicationError {
    if err.is_panic() {
        ApplicationError::InferenceFailure("inference task panicked".to_string())
    } else {
        ApplicationError::Internal("inference task was cancelled".to_string())
    }
}
