//! Fixtures for infrastructure tests
//!
//! The fixture model is a freshly initialised one-block-per-stage network
//! with a 4-channel stem: real convolutions at the serving input size,
//! small enough to run in unit tests.

use std::{io::Cursor, path::Path};

use ai_vision::{Checkpoint, CpuBackend, SpeciesNetConfig};
use domain::entities::ClassMapping;
use image::{ImageFormat, Rgb, RgbImage};

use crate::config::ArtifactConfig;

/// Embedding length of the fixture network
pub const FIXTURE_EMBEDDING: usize = 128;

/// Three classes
pub fn fixture_classes() -> ClassMapping {
    ClassMapping::from_pairs([("Panthera_onca", 0), ("Panthera_leo", 1), ("Felis_catus", 2)])
        .unwrap()
}

/// Fixture network architecture at the 224px serving size
pub fn fixture_architecture() -> SpeciesNetConfig {
    SpeciesNetConfig::new(3, vec![1, 1, 1, 1]).with_base_width(4)
}

/// Encode a solid-colour PNG
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Write manifest, weights and side-car mapping into `dir`
pub fn write_model_artifacts(dir: &Path) -> ArtifactConfig {
    let artifacts = ArtifactConfig::in_dir(dir);
    let architecture = fixture_architecture();
    let network = architecture.init::<CpuBackend>(&Default::default());
    Checkpoint::save_with_network(
        &artifacts.checkpoint_path(),
        &fixture_classes(),
        architecture,
        &network,
    )
    .unwrap();
    std::fs::write(
        artifacts.class_mapping_path(),
        serde_json::to_vec(&fixture_classes().to_document()).unwrap(),
    )
    .unwrap();
    artifacts
}

/// The manifest written by [`write_model_artifacts`]
pub fn fixture_checkpoint(artifacts: &ArtifactConfig) -> Checkpoint {
    Checkpoint::load(&artifacts.checkpoint_path()).unwrap()
}

#[test]
fn fixture_embedding_matches_architecture() {
    assert_eq!(fixture_architecture().embedding_size(), FIXTURE_EMBEDDING);
}
