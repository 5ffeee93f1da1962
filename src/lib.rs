//! Relation-resolution core for APIs serving a document-oriented datastore.
//!
//! Given a root fetch and a client-supplied nested projection tree, this
//! crate produces one fully populated response while issuing at most one
//! physical batch query per (collection, field-selection) pair per
//! processing wave:
//!
//! - [`ProjectionPlanner`] separates fields answerable from the current
//!   document from fields needing a secondary lookup against the relation
//!   schema.
//! - [`BatchedLoader`] silently coalesces concurrent point-lookups from
//!   unrelated call sites into shared batch fetches.
//! - [`Stitcher`] resolves the deferred relations breadth-first and
//!   re-injects the results into the original shape, tolerating partial
//!   failure per collection element.
//!
//! [`Resolver`] ties the three together behind one entry point; the
//! transport layer, input validation and datastore bootstrap live outside
//! this crate.

pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use config::AppConfig;
pub use error::ResolveError;
pub use logic::{BatchedLoader, LoadHandle, ProjectionPlanner, Resolver, Stitcher};
pub use model::*;
pub use store::{MemoryStore, Storage};
