use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;

use crate::error::ResolveError;
use crate::logic::loader::{BatchedLoader, LoadHandle};
use crate::logic::planner::ProjectionPlanner;
use crate::model::{Document, FlatProjection, RelationMap, RelationSpec, SchemaRegistry};

/// Recursion bound for relation nesting. Relation schemas may be cyclic
/// (`User.manager -> User`), so the projection tree drives recursion; the
/// bound only trips on runaway nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Replaces relation-valued fields in fetched documents with resolved
/// secondary lookups, breadth-first and depth-guarded.
///
/// Collection elements are stitched concurrently and joined, not
/// short-circuited: every element runs to completion and keeps whatever it
/// resolved, then the first element failure (if any) is reported.
pub struct Stitcher {
    registry: Arc<SchemaRegistry>,
    loader: Arc<BatchedLoader>,
    max_depth: usize,
}

/// A slot of a relation-valued field: either a pending lookup or a value we
/// leave as-is (non-string keys stay untouched).
enum Slot {
    Load(LoadHandle),
    Keep(Value),
}

enum Shape {
    One(LoadHandle),
    Many(Vec<Slot>),
}

struct PendingField {
    field: String,
    next_relations: RelationMap,
    shape: Shape,
}

impl Stitcher {
    pub fn new(registry: Arc<SchemaRegistry>, loader: Arc<BatchedLoader>) -> Self {
        Self {
            registry,
            loader,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Populate every relation named in `relations` on `data`, recursing
    /// into next-level relation sets until none remain.
    pub async fn stitch(
        &self,
        data: &mut Value,
        relations: &RelationMap,
    ) -> Result<(), ResolveError> {
        if relations.is_empty() {
            return Ok(());
        }
        self.stitch_level(data, relations, 0).await
    }

    fn stitch_level<'a>(
        &'a self,
        data: &'a mut Value,
        relations: &'a RelationMap,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), ResolveError>> {
        Box::pin(async move {
            if depth >= self.max_depth {
                return Err(ResolveError::DepthExceeded {
                    limit: self.max_depth,
                });
            }
            match data {
                Value::Array(items) => {
                    // each element is its own failure domain
                    let results = join_all(
                        items
                            .iter_mut()
                            .map(|item| self.stitch_level(item, relations, depth)),
                    )
                    .await;
                    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
                }
                Value::Object(document) => self.stitch_document(document, relations, depth).await,
                _ => Ok(()),
            }
        })
    }

    async fn stitch_document(
        &self,
        document: &mut Document,
        relations: &RelationMap,
        depth: usize,
    ) -> Result<(), ResolveError> {
        // Phase 1: register every lookup for this document before awaiting
        // any, so sibling relation fields share one wave.
        let mut pending: Vec<PendingField> = Vec::new();
        let mut composites: Vec<(String, &RelationMap)> = Vec::new();

        for (field, spec) in relations {
            // a relation is resolved only if the primary fetch returned it
            let Some(value) = document.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match spec {
                RelationSpec::Composite(sub_map) => composites.push((field.clone(), sub_map)),
                RelationSpec::Simple { target, projection } => {
                    let planned =
                        ProjectionPlanner::plan(&self.registry, target, projection.clone())?;
                    let shape = match value {
                        Value::Array(keys) => Shape::Many(
                            keys.iter()
                                .map(|key| self.slot_for(key, target, field, &planned.projection))
                                .collect(),
                        ),
                        key => match self.slot_for(key, target, field, &planned.projection) {
                            Slot::Load(handle) => Shape::One(handle),
                            // not a usable key: leave the field untouched
                            Slot::Keep(_) => continue,
                        },
                    };
                    pending.push(PendingField {
                        field: field.clone(),
                        next_relations: planned.relations,
                        shape,
                    });
                }
            }
        }

        // Phase 2: await, write back, recurse where the re-plan found more.
        for PendingField {
            field,
            next_relations,
            shape,
        } in pending
        {
            match shape {
                Shape::One(handle) => {
                    let resolved = handle.await?.unwrap_or(Value::Null);
                    document.insert(field.clone(), resolved);
                }
                Shape::Many(slots) => {
                    let mut resolved = Vec::with_capacity(slots.len());
                    for slot in slots {
                        resolved.push(match slot {
                            Slot::Load(handle) => handle.await?.unwrap_or(Value::Null),
                            Slot::Keep(value) => value,
                        });
                    }
                    document.insert(field.clone(), Value::Array(resolved));
                }
            }
            if !next_relations.is_empty() {
                if let Some(value) = document.get_mut(&field) {
                    self.stitch_level(value, &next_relations, depth + 1).await?;
                }
            }
        }

        // Composite relations recurse per sub-field instead of loading.
        for (field, sub_map) in composites {
            if let Some(value) = document.get_mut(&field) {
                self.stitch_level(value, sub_map, depth + 1).await?;
            }
        }

        Ok(())
    }

    fn slot_for(
        &self,
        key: &Value,
        target: &str,
        field: &str,
        selection: &FlatProjection,
    ) -> Slot {
        match key.as_str() {
            Some(key) => Slot::Load(self.loader.load(key, target, field, selection.clone())),
            None => {
                log::debug!("relation '{field}' holds a non-string key, leaving it untouched");
                Slot::Keep(key.clone())
            }
        }
    }
}
