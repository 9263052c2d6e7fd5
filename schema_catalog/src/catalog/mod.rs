//! Catalog entities and their persistence

pub mod store;
pub mod types;
pub mod upsert;

pub use store::{CatalogStore, InMemoryStore};
pub use types::{Column, DataSource, Relationship, Table};
pub use upsert::UpsertOutcome;
