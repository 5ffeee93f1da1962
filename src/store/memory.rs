use std::collections::{HashMap, HashSet};

use anyhow::Result;
use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{document_id, Document, FieldSelector, FlatProjection};
use crate::store::traits::Storage;

/// In-memory reference implementation of [`Storage`], with faithful
/// selection semantics: inclusion projections build the output from the
/// requested dotted paths and rename expressions, exclusion projections
/// remove the excluded paths from a copy of the document.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: impl Into<String>, document: Document) {
        self.collections
            .write()
            .entry(collection.into())
            .or_default()
            .push(document);
    }

    /// Convenience for seeding: panics on non-object values, so only used by
    /// setup code and tests.
    pub fn insert_json(&self, collection: impl Into<String>, value: Value) {
        match value {
            Value::Object(document) => self.insert(collection, document),
            other => panic!("documents must be JSON objects, got {other}"),
        }
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStore {
    async fn batch_fetch(
        &self,
        collection: &str,
        keys: &[String],
        selection: &FlatProjection,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        Ok(documents
            .iter()
            .filter(|doc| document_id(doc).is_some_and(|id| wanted.contains(id)))
            .map(|doc| apply_selection(doc, selection))
            .collect())
    }
}

/// Apply a flat field-selection to one document.
pub fn apply_selection(document: &Document, selection: &FlatProjection) -> Document {
    if selection.is_empty() {
        return document.clone();
    }
    if selection.is_inclusion() {
        let mut out = Document::new();
        for (field, selector) in selection.iter() {
            match selector {
                FieldSelector::Path(expr) => {
                    if let Some(value) = expr
                        .strip_prefix('$')
                        .and_then(|path| lookup_path(document, path))
                    {
                        out.insert(field.clone(), value.clone());
                    }
                }
                selector if selector.selects() => {
                    if let Some(value) = lookup_path(document, field) {
                        insert_path(&mut out, field, value.clone());
                    }
                }
                // an exclude inside an inclusion selection selects nothing
                _ => {}
            }
        }
        out
    } else {
        let mut out = document.clone();
        for (field, selector) in selection.iter() {
            if !selector.selects() {
                remove_path(&mut out, field);
            }
        }
        out
    }
}

fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn insert_path(out: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}

fn remove_path(out: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            out.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(nested)) = out.get_mut(head) {
                remove_path(nested, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn inclusion_builds_output_from_dotted_paths() {
        let document = doc(json!({
            "_id": "p1",
            "title": "Hello",
            "address": {"city": "Oslo", "zip": "0150"},
            "secret": "x"
        }));
        let mut selection = FlatProjection::new();
        selection.include("title");
        selection.include("address.city");

        assert_eq!(
            apply_selection(&document, &selection),
            doc(json!({"title": "Hello", "address": {"city": "Oslo"}}))
        );
    }

    #[test]
    fn rename_sources_from_dotted_path() {
        let document = doc(json!({"_id": "p1", "address": {"city": "Oslo"}}));
        let mut selection = FlatProjection::new();
        selection.rename("city", "address.city");

        assert_eq!(
            apply_selection(&document, &selection),
            doc(json!({"city": "Oslo"}))
        );
    }

    #[test]
    fn exclusion_removes_paths_and_keeps_the_rest() {
        let document = doc(json!({
            "_id": "p1",
            "title": "Hello",
            "auth": {"password": "x", "method": "basic"}
        }));
        let mut selection = FlatProjection::new();
        selection.exclude("auth.password");

        assert_eq!(
            apply_selection(&document, &selection),
            doc(json!({"_id": "p1", "title": "Hello", "auth": {"method": "basic"}}))
        );
    }

    #[tokio::test]
    async fn batch_fetch_filters_by_identifier_set() {
        let store = MemoryStore::new();
        store.insert_json("User", json!({"_id": "u1", "name": "Ada"}));
        store.insert_json("User", json!({"_id": "u2", "name": "Grace"}));
        store.insert_json("User", json!({"_id": "u3", "name": "Edsger"}));

        let found = store
            .batch_fetch(
                "User",
                &["u1".to_string(), "u3".to_string(), "ghost".to_string()],
                &FlatProjection::new(),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(document_id(&found[0]), Some("u1"));
        assert_eq!(document_id(&found[1]), Some("u3"));
    }

    #[tokio::test]
    async fn unknown_collection_returns_nothing() {
        let store = MemoryStore::new();
        let found = store
            .batch_fetch("Ghost", &["u1".to_string()], &FlatProjection::new())
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
