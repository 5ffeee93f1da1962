use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Client-supplied nested projection, untrusted in leaf types. Leaf semantics
/// are enforced by the planner, not by serde.
pub type ProjectionTree = Map<String, Value>;

/// A single entry of a flat field-selection: include/exclude toggles or a
/// rename expression sourcing the output field from a dotted path (`$a.b`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSelector {
    Flag(bool),
    Weight(i64),
    Path(String),
}

impl FieldSelector {
    /// Whether this selector pulls the field into the output.
    pub fn selects(&self) -> bool {
        match self {
            FieldSelector::Flag(flag) => *flag,
            FieldSelector::Weight(weight) => *weight > 0,
            FieldSelector::Path(_) => true,
        }
    }
}

/// Field-selection of dotted paths, used verbatim as a fetch's projection.
/// BTreeMap keeps the selection signature deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatProjection(pub BTreeMap<String, FieldSelector>);

impl FlatProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), FieldSelector::Weight(1));
    }

    pub fn exclude(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), FieldSelector::Weight(0));
    }

    /// Name the output field `output`, sourcing it from `source_path`.
    pub fn rename(&mut self, output: impl Into<String>, source_path: &str) {
        self.0
            .insert(output.into(), FieldSelector::Path(format!("${source_path}")));
    }

    pub fn insert(&mut self, field: impl Into<String>, selector: FieldSelector) {
        self.0.insert(field.into(), selector);
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldSelector> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldSelector> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when at least one entry pulls a field in. An inclusion-style
    /// selection starts from nothing; an exclusion-style one starts from the
    /// whole document.
    pub fn is_inclusion(&self) -> bool {
        self.0.values().any(FieldSelector::selects)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldSelector)> {
        self.0.iter()
    }
}

/// Planner output for one relation-valued field: what to fetch and with which
/// sub-projection. Lives for a single stitching pass, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationSpec {
    Simple {
        target: String,
        projection: ProjectionTree,
    },
    Composite(RelationMap),
}

pub type RelationMap = BTreeMap<String, RelationSpec>;

/// What the planner hands back: the selection for the immediate fetch plus
/// the deferred relation specs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFetch {
    pub projection: FlatProjection,
    pub relations: RelationMap,
}
