//! Species label value object
//!
//! Labels are stored in their internal form, the directory-safe name used by
//! the training data (`Panthera_onca`). Clients always see the display form
//! with underscores replaced by spaces (`Panthera onca`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// A species label in internal (underscore) form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpeciesLabel(String);

impl SpeciesLabel {
    /// Create a label, rejecting empty or whitespace-only names
    pub fn new(label: impl Into<String>) -> Result<Self, DomainError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(DomainError::InvalidLabel(
                "label cannot be empty".to_string(),
            ));
        }
        Ok(Self(label))
    }

    /// The internal form as stored in the class mapping
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The client-facing form (underscores replaced by spaces)
    pub fn display_name(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl fmt::Display for SpeciesLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SpeciesLabel {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SpeciesLabel> for String {
    fn from(label: SpeciesLabel) -> Self {
        label.0
    }
}
