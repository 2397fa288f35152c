//! Read-only SQLite access to an agent memory store.

pub mod error;
pub mod projection;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use projection::EmbeddingProjection;
pub use schema::{SchemaCapabilities, probe_schema};
pub use store::{ChangeMarker, Store, TableMarker};
