//! Database module for schema_catalog
//!
//! One connector per supported engine behind the `Connector` capability trait.

pub mod connection;
pub mod pool;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;
#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use connection::{Connector, EngineConnector, TableListing, ValueStream};
