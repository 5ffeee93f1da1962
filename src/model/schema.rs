use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub data_type: DataType,
}

/// Where a relation-valued field points: either a single named entity, or a
/// map of sub-fields each pointing at their own target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationTarget {
    Simple(String),
    Composite(BTreeMap<String, RelationTarget>),
}

/// Immutable per-entity schema. The entity name doubles as the name of its
/// storage collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Fields excluded from every response unless the schema says otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden: Vec<String>,
    /// Local field -> related entity, for fields answered by a secondary fetch.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, RelationTarget>,
}

impl EntitySchema {
    pub fn relation(&self, field: &str) -> Option<&RelationTarget> {
        self.relations.get(field)
    }

    pub fn has_relations(&self) -> bool {
        !self.relations.is_empty()
    }
}

/// Lookup by entity name, populated once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new(schemas: impl IntoIterator<Item = EntitySchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.name.clone(), schema))
                .collect(),
        }
    }

    pub fn get(&self, entity: &str) -> Option<&EntitySchema> {
        self.schemas.get(entity)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_target_deserializes_both_shapes() {
        let schema: EntitySchema = serde_json::from_str(
            r#"{
                "name": "Order",
                "fields": [{"name": "total", "data_type": "number"}],
                "relations": {
                    "buyer": "User",
                    "parties": {"seller": "User", "broker": "Agency"}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            schema.relation("buyer"),
            Some(&RelationTarget::Simple("User".to_string()))
        );
        match schema.relation("parties") {
            Some(RelationTarget::Composite(map)) => {
                assert_eq!(map.len(), 2);
                assert_eq!(
                    map.get("broker"),
                    Some(&RelationTarget::Simple("Agency".to_string()))
                );
            }
            other => panic!("expected composite target, got {:?}", other),
        }
    }

    #[test]
    fn registry_lookups_by_name() {
        let registry = SchemaRegistry::new(vec![EntitySchema {
            name: "User".to_string(),
            fields: vec![],
            hidden: vec!["password".to_string()],
            relations: BTreeMap::new(),
        }]);

        assert!(registry.get("User").is_some());
        assert!(registry.get("Ghost").is_none());
        assert!(!registry.get("User").unwrap().has_relations());
    }
}
