pub mod document;
pub mod projection;
pub mod schema;

pub use document::*;
pub use projection::*;
pub use schema::*;
