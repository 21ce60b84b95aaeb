pub mod schema;
pub mod config;
pub mod wire;
pub mod storage;
pub mod model;
pub mod crud;
pub mod env;
pub mod cdc;
pub mod error;

pub use error::{DynaformError, ErrorKind, Result};
pub use schema::IntermediateRepresentation;
pub use config::CompilerConfig;
pub use model::{Model, RecordMeta};
pub use crud::Store;
pub use env::EnvContext;
