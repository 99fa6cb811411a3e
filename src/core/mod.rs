pub mod error;
pub mod types;

pub use error::{FinderError, Result};
pub use types::{FindQuery, Node, RequestContext, SeriesResult, TimeInfo};
