pub mod db;
pub mod graph;
pub mod qdrant;
pub mod relational;
pub mod schema;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
