pub mod loader;
pub mod planner;
pub mod resolve;
pub mod stitch;

pub use loader::{BatchedLoader, LoadHandle};
pub use planner::ProjectionPlanner;
pub use resolve::Resolver;
pub use stitch::{Stitcher, DEFAULT_MAX_DEPTH};
