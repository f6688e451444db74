//! TypeMetadata - the artifact kept fresh across the fleet
//!
//! Maps each field name to the datatypes that ingest it and, per datatype,
//! the normalizer type classes applied to the field.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Per-table field type metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeMetadata {
    fields: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl TypeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `datatype` ingests `field` with `type_class`
    pub fn add(&mut self, field: &str, datatype: &str, type_class: &str) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .entry(datatype.to_string())
            .or_default()
            .insert(type_class.to_string());
    }

    /// Builder form of [`TypeMetadata::add`]
    pub fn with(mut self, field: &str, datatype: &str, type_class: &str) -> Self {
        self.add(field, datatype, type_class);
        self
    }

    pub fn types_for(&self, field: &str, datatype: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(field).and_then(|by_type| by_type.get(datatype))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Every datatype mentioned by any field
    pub fn datatypes(&self) -> BTreeSet<&str> {
        self.fields
            .values()
            .flat_map(|by_type| by_type.keys().map(String::as_str))
            .collect()
    }

    pub fn merge(&mut self, other: &TypeMetadata) {
        for (field, by_type) in &other.fields {
            for (datatype, classes) in by_type {
                for class in classes {
                    self.add(field, datatype, class);
                }
            }
        }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
