use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::config::AppConfig;
use crate::error::ResolveError;
use crate::logic::loader::BatchedLoader;
use crate::logic::planner::ProjectionPlanner;
use crate::logic::stitch::{Stitcher, DEFAULT_MAX_DEPTH};
use crate::model::{FlatProjection, ProjectionTree, SchemaRegistry};
use crate::store::Storage;

/// Top-level entry combining planning, one caller-supplied primary fetch and
/// recursive stitching.
///
/// Construct one per logical request: the resolver owns the request's
/// [`BatchedLoader`], so waves never leak across requests. Construction
/// spawns the loader's driver task and therefore needs a tokio runtime.
pub struct Resolver {
    registry: Arc<SchemaRegistry>,
    loader: Arc<BatchedLoader>,
    stitcher: Stitcher,
}

impl Resolver {
    pub fn new(registry: Arc<SchemaRegistry>, storage: Arc<dyn Storage>) -> Self {
        Self::with_max_depth(registry, storage, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(
        registry: Arc<SchemaRegistry>,
        storage: Arc<dyn Storage>,
        max_depth: usize,
    ) -> Self {
        let loader = BatchedLoader::new(storage);
        let stitcher =
            Stitcher::new(registry.clone(), loader.clone()).with_max_depth(max_depth);
        Self {
            registry,
            loader,
            stitcher,
        }
    }

    pub fn from_config(
        registry: Arc<SchemaRegistry>,
        storage: Arc<dyn Storage>,
        config: &AppConfig,
    ) -> Self {
        Self::with_max_depth(registry, storage, config.resolver.max_depth)
    }

    /// The request's loader, for ad hoc point-lookups outside the relation
    /// flow. Lookups made here coalesce with the stitcher's.
    pub fn loader(&self) -> Arc<BatchedLoader> {
        self.loader.clone()
    }

    /// Resolve `entity` under `projection`: plan, run the primary fetch via
    /// `fetch` (handed the planned flat selection, returns one document or an
    /// array), then stitch every relation recursively.
    pub async fn resolve<F, Fut>(
        &self,
        entity: &str,
        projection: ProjectionTree,
        fetch: F,
    ) -> Result<Value, ResolveError>
    where
        F: FnOnce(FlatProjection) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let planned = ProjectionPlanner::plan(&self.registry, entity, projection)?;
        let mut data = fetch(planned.projection)
            .await
            .map_err(|err| ResolveError::Storage {
                collection: entity.to_string(),
                message: err.to_string(),
            })?;
        self.stitcher.stitch(&mut data, &planned.relations).await?;
        Ok(data)
    }
}
