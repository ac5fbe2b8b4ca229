//! Configuration for the vision runtime

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Which compute device the process should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Accelerator if one is available, else CPU
    #[default]
    Auto,
    /// Always the CPU
    Cpu,
    /// Accelerator; falls back to CPU with a warning when none is available
    Accelerator,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "accelerator" | "gpu" | "cuda" => Ok(Self::Accelerator),
            other => Err(format!("unknown device preference: {other}")),
        }
    }
}

/// Configuration for inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Device preference
    #[serde(default)]
    pub device: DevicePreference,

    /// Maximum forward passes running at once (0 = available parallelism)
    #[serde(default)]
    pub max_concurrent_inferences: usize,

    /// Result count when a request does not send `top_k`
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Target length of the shorter image side before cropping
    #[serde(default = "default_resize")]
    pub resize_shorter_side: u32,

    /// Side length of the square center crop fed to the model
    #[serde(default = "default_crop")]
    pub crop_size: u32,

    /// Largest accepted width or height of a decoded upload
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

const fn default_top_k() -> usize {
    5
}

const fn default_resize() -> u32 {
    256
}

const fn default_crop() -> u32 {
    224
}

const fn default_max_image_dimension() -> u32 {
    16_384
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: DevicePreference::default(),
            max_concurrent_inferences: 0,
            default_top_k: default_top_k(),
            resize_shorter_side: default_resize(),
            crop_size: default_crop(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

impl InferenceConfig {
    /// The admission gate size, resolving 0 to the available parallelism
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrent_inferences > 0 {
            self.max_concurrent_inferences
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }
}
