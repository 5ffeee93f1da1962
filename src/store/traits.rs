use crate::model::{Document, FlatProjection};
use anyhow::Result;

/// The storage collaborator: identifier-set lookups with
/// include/exclude/rename projection, one physical query per call.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Fetch every document whose identifier is in `keys`, restricted to
    /// `selection`. Keys absent from the result are not an error.
    async fn batch_fetch(
        &self,
        collection: &str,
        keys: &[String],
        selection: &FlatProjection,
    ) -> Result<Vec<Document>>;
}
