//! AI Vision - Model runtime and vector index
//!
//! Everything that touches pixels or weights lives here: decoding and
//! preprocessing, the burn network and its checkpoint manifest, compute
//! device selection and the flat nearest-neighbour index with its on-disk
//! format.
//!
//! All operations are synchronous; async callers are expected to move them
//! onto a blocking thread.

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod device;
pub mod error;
pub mod index;
pub mod model;
pub mod network;
pub mod preprocess;

pub use checkpoint::{Checkpoint, WeightsFile, WeightsFormat};
pub use config::{DevicePreference, InferenceConfig};
pub use device::{detect_accelerator, resolve_device};
pub use error::VisionError;
pub use index::{DistanceMetric, EmbeddingMapping, FlatIndex, Neighbour};
pub use model::{CpuBackend, SpeciesClassifier};
pub use network::{SpeciesNet, SpeciesNetConfig};
pub use preprocess::Preprocessor;
