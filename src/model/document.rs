use serde_json::{Map, Value};

/// Opaque entity identifier, as handed to us by callers and storage.
pub type Id = String;

/// An in-memory document as exchanged with the storage collaborator.
pub type Document = Map<String, Value>;

/// Field every stored document carries its identifier under.
pub const ID_FIELD: &str = "_id";

/// The identifier of a document, when present and string-valued.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_id_reads_string_identifiers_only() {
        let doc: Document = serde_json::from_value(json!({"_id": "u1", "name": "Ada"})).unwrap();
        assert_eq!(document_id(&doc), Some("u1"));

        let doc: Document = serde_json::from_value(json!({"_id": 42})).unwrap();
        assert_eq!(document_id(&doc), None);

        let doc: Document = serde_json::from_value(json!({"name": "Ada"})).unwrap();
        assert_eq!(document_id(&doc), None);
    }
}
