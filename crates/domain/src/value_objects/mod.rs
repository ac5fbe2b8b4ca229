//! Value Objects - Immutable, identity-less domain primitives

mod compute_device;
mod embedding;
mod image_id;
mod image_tensor;
mod species_label;
mod top_k;

pub use compute_device::ComputeDevice;
pub use embedding::Embedding;
pub use image_id::ImageId;
pub use image_tensor::{CHANNELS, ImageTensor};
pub use species_label::SpeciesLabel;
pub use top_k::TopK;
