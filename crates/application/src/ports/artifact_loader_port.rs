//! Artifact store port
//!
//! Loading is split in two so the index can be attempted independently of
//! (but only after) a successful model load.

use async_trait::async_trait;
use domain::value_objects::ComputeDevice;
#[cfg(test)]
use mockall::automock;

use crate::{
    error::ApplicationError,
    state::{LoadedIndex, LoadedModel},
};

/// Port for reading trained artifacts from the artifact store
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactLoaderPort: Send + Sync {
    /// Pick the compute device for this process
    fn resolve_device(&self) -> ComputeDevice;

    /// Load checkpoint and class mapping
    ///
    /// `Ok(None)` means no checkpoint exists; that is not an error.
    async fn load_model(
        &self,
        device: &ComputeDevice,
    ) -> Result<Option<LoadedModel>, ApplicationError>;

    /// Load the embedding index and its id list for a loaded model
    ///
    /// `Ok(None)` means the index files are absent.
    async fn load_index(&self, model: &LoadedModel)
    -> Result<Option<LoadedIndex>, ApplicationError>;
}
