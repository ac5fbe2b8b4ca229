//! Compute device the model runtime executes on

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device selected once at startup and fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ComputeDevice {
    /// Generic processor with a number of worker threads
    Cpu { threads: usize },
    /// Dedicated accelerator identified by name
    Accelerator { name: String },
}

impl ComputeDevice {
    /// Whether this is an accelerator
    pub const fn is_accelerator(&self) -> bool {
        matches!(self, Self::Accelerator { .. })
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu { threads } => write!(f, "cpu ({threads} threads)"),
            Self::Accelerator { name } => write!(f, "accelerator ({name})"),
        }
    }
}
