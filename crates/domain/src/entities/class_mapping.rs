//! Bijective mapping between species labels and dense class indices
//!
//! The mapping is built at training time and read-only afterwards. The
//! inverse direction is materialised once on construction so that ranking a
//! prediction never scans the label table.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{errors::DomainError, value_objects::SpeciesLabel};

/// Label ↔ index mapping over `[0, num_classes)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    index_to_class: Vec<SpeciesLabel>,
    class_to_index: HashMap<SpeciesLabel, usize>,
}

impl ClassMapping {
    /// Build a mapping from `(label, index)` pairs
    ///
    /// The pairs must cover every index in `[0, n)` exactly once and every
    /// label must be unique.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let pairs: Vec<(SpeciesLabel, usize)> = pairs
            .into_iter()
            .map(|(label, idx)| SpeciesLabel::new(label).map(|l| (l, idx)))
            .collect::<Result<_, _>>()?;

        if pairs.is_empty() {
            return Err(DomainError::InvalidClassMapping(
                "mapping has no classes".to_string(),
            ));
        }

        let n = pairs.len();
        let mut slots: Vec<Option<SpeciesLabel>> = vec![None; n];
        let mut class_to_index = HashMap::with_capacity(n);

        for (label, idx) in pairs {
            if idx >= n {
                return Err(DomainError::InvalidClassMapping(format!(
                    "index {idx} for '{label}' is outside [0, {n})"
                )));
            }
            if slots[idx].is_some() {
                return Err(DomainError::InvalidClassMapping(format!(
                    "index {idx} is assigned more than once"
                )));
            }
            if class_to_index.insert(label.clone(), idx).is_some() {
                return Err(DomainError::InvalidClassMapping(format!(
                    "label '{label}' appears more than once"
                )));
            }
            slots[idx] = Some(label);
        }

        // n distinct indices below n fill every slot
        let index_to_class = slots.into_iter().flatten().collect();

        Ok(Self {
            index_to_class,
            class_to_index,
        })
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.index_to_class.len()
    }

    /// Always false for a constructed mapping; present for API symmetry
    pub fn is_empty(&self) -> bool {
        self.index_to_class.is_empty()
    }

    /// Label for a class index
    pub fn label(&self, index: usize) -> Option<&SpeciesLabel> {
        self.index_to_class.get(index)
    }

    /// Class index for a label in internal form
    pub fn index_of(&self, label: &str) -> Option<usize> {
        SpeciesLabel::new(label)
            .ok()
            .and_then(|l| self.class_to_index.get(&l).copied())
    }

    /// Labels in index order
    pub fn labels(&self) -> &[SpeciesLabel] {
        &self.index_to_class
    }

    /// Display-form labels sorted lexicographically
    pub fn display_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .index_to_class
            .iter()
            .map(SpeciesLabel::display_name)
            .collect();
        names.sort();
        names
    }

    /// The forward mapping in a stable order, as written to checkpoints
    pub fn class_to_index(&self) -> BTreeMap<String, usize> {
        self.index_to_class
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.as_str().to_string(), idx))
            .collect()
    }

    /// Side-car document with both directions of the mapping
    pub fn to_document(&self) -> ClassMappingDocument {
        ClassMappingDocument {
            class_to_idx: self.class_to_index(),
            idx_to_class: self
                .index_to_class
                .iter()
                .enumerate()
                .map(|(idx, label)| (idx.to_string(), label.as_str().to_string()))
                .collect(),
        }
    }
}

/// The `class_mapping.json` side-car written next to a checkpoint
///
/// `idx_to_class` keys are stringified indices, matching the JSON object
/// layout produced by the training export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMappingDocument {
    pub class_to_idx: BTreeMap<String, usize>,
    #[serde(default)]
    pub idx_to_class: BTreeMap<String, String>,
}

impl TryFrom<ClassMappingDocument> for ClassMapping {
    type Error = DomainError;

    fn try_from(doc: ClassMappingDocument) -> Result<Self, Self::Error> {
        let mapping = Self::from_pairs(doc.class_to_idx)?;

        for (key, label) in &doc.idx_to_class {
            let idx: usize = key.parse().map_err(|_| {
                DomainError::InvalidClassMapping(format!("idx_to_class key '{key}' is not an index"))
            })?;
            if mapping.label(idx).map(SpeciesLabel::as_str) != Some(label.as_str()) {
                return Err(DomainError::InvalidClassMapping(format!(
                    "idx_to_class[{idx}] = '{label}' disagrees with class_to_idx"
                )));
            }
        }

        Ok(mapping)
    }
}
