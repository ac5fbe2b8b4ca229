//! Requested result count for ranked responses

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// A validated, strictly positive result count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct TopK(usize);

impl TopK {
    /// Default number of results when the client does not ask for a count
    pub const DEFAULT: usize = 5;

    /// Validate a client-supplied count
    ///
    /// The raw value is signed so that `0` and negative counts reach this
    /// check instead of failing earlier as a parse error.
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::InvalidTopK(value));
        }
        usize::try_from(value)
            .map(Self)
            .map_err(|_| DomainError::InvalidTopK(value))
    }

    /// The requested count
    pub const fn get(self) -> usize {
        self.0
    }

    /// The count clamped to `[1, available]`
    ///
    /// Returns 0 only when nothing is available at all.
    pub fn clamp_to(self, available: usize) -> usize {
        self.0.min(available)
    }
}

impl Default for TopK {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<i64> for TopK {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopK> for i64 {
    fn from(top_k: TopK) -> Self {
        i64::try_from(top_k.0).unwrap_or(i64::MAX)
    }
}
