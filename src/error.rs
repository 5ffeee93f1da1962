use thiserror::Error;

/// Errors produced by planning, loading and stitching.
///
/// `Clone` matters here: a failed batch fetch rejects every waiter in its
/// bucket with the same error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("invalid projection for '{entity}': {detail} (field '{field}')")]
    Planning {
        entity: String,
        field: String,
        detail: String,
    },

    #[error("batch fetch against '{collection}' failed: {message}")]
    Storage { collection: String, message: String },

    #[error("relation nesting exceeded the depth limit of {limit}")]
    DepthExceeded { limit: usize },

    #[error("load against '{collection}' was dropped before its wave flushed")]
    Dropped { collection: String },
}
