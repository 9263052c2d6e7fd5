//! Catalog persistence
//!
//! `CatalogStore` is the seam to whatever persists the catalog. The
//! in-memory store keeps everything in ordered maps and can be saved to and
//! loaded from a JSON snapshot.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

use crate::catalog::types::{Relationship, Table};
use crate::catalog::upsert::{merge_table, UpsertOutcome};
use crate::error::Result;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or update a table by qualified name
    async fn upsert_table(&self, table: Table) -> Result<UpsertOutcome>;

    /// Tables of one data source ordered by qualified name
    async fn tables(&self, data_source: &str) -> Result<Vec<Table>>;

    async fn table(&self, qualified_name: &str) -> Result<Option<Table>>;

    /// Replace the relationship set of one data source
    async fn replace_relationships(&self, data_source: &str, relationships: Vec<Relationship>) -> Result<()>;

    async fn relationships(&self, data_source: &str) -> Result<Vec<Relationship>>;

    /// Tables completed by an unfinished run
    async fn checkpoint(&self, data_source: &str) -> Result<BTreeSet<String>>;

    async fn mark_checkpoint(&self, data_source: &str, qualified_name: &str) -> Result<()>;

    async fn clear_checkpoint(&self, data_source: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    tables: IndexMap<String, Table>,
    relationships: IndexMap<String, Vec<Relationship>>,
    checkpoints: IndexMap<String, BTreeSet<String>>,
}

/// Catalog store held in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`InMemoryStore::save_snapshot`]
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let state: StoreState = serde_json::from_slice(&bytes)?;
        debug!(path = %path.as_ref().display(), tables = state.tables.len(), "Loaded snapshot");
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Load the snapshot at `path` if present, else start empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await? {
            Self::load_snapshot(path).await
        } else {
            Ok(Self::new())
        }
    }

    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state.read().await;
        let json = serde_json::to_vec_pretty(&*state)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path.as_ref(), json).await?;
        debug!(path = %path.as_ref().display(), tables = state.tables.len(), "Saved snapshot");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn upsert_table(&self, table: Table) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        let key = table.qualified_name.clone();
        let (merged, outcome) = merge_table(state.tables.get(&key), table);
        state.tables.insert(key, merged);
        Ok(outcome)
    }

    async fn tables(&self, data_source: &str) -> Result<Vec<Table>> {
        let state = self.state.read().await;
        let mut tables: Vec<Table> = state
            .tables
            .values()
            .filter(|t| t.data_source == data_source)
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        Ok(tables)
    }

    async fn table(&self, qualified_name: &str) -> Result<Option<Table>> {
        Ok(self.state.read().await.tables.get(qualified_name).cloned())
    }

    async fn replace_relationships(&self, data_source: &str, relationships: Vec<Relationship>) -> Result<()> {
        self.state
            .write()
            .await
            .relationships
            .insert(data_source.to_string(), relationships);
        Ok(())
    }

    async fn relationships(&self, data_source: &str) -> Result<Vec<Relationship>> {
        Ok(self
            .state
            .read()
            .await
            .relationships
            .get(data_source)
            .cloned()
            .unwrap_or_default())
    }

    async fn checkpoint(&self, data_source: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .read()
            .await
            .checkpoints
            .get(data_source)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_checkpoint(&self, data_source: &str, qualified_name: &str) -> Result<()> {
        self.state
            .write()
            .await
            .checkpoints
            .entry(data_source.to_string())
            .or_default()
            .insert(qualified_name.to_string());
        Ok(())
    }

    async fn clear_checkpoint(&self, data_source: &str) -> Result<()> {
        self.state.write().await.checkpoints.shift_remove(data_source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{Column, TableDescriptor};
    use pretty_assertions::assert_eq;

    fn table(name: &str) -> Table {
        let mut t = Table::new(
            "shop",
            "shop",
            &TableDescriptor { schema: "main".into(), name: name.into(), estimated_rows: Some(3) },
        );
        t.add_column(Column::new("id", "integer"));
        t
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates() {
        let store = InMemoryStore::new();
        assert!(store.upsert_table(table("orders")).await.unwrap().created);
        assert!(!store.upsert_table(table("orders")).await.unwrap().created);
        store.upsert_table(table("customers")).await.unwrap();

        let names: Vec<_> = store
            .tables("shop")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.qualified_name)
            .collect();
        assert_eq!(names, vec!["shop.main.customers", "shop.main.orders"]);
        assert!(store.tables("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let store = InMemoryStore::new();
        store.mark_checkpoint("shop", "shop.main.a").await.unwrap();
        store.mark_checkpoint("shop", "shop.main.b").await.unwrap();
        assert_eq!(store.checkpoint("shop").await.unwrap().len(), 2);

        store.clear_checkpoint("shop").await.unwrap();
        assert!(store.checkpoint("shop").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("catalog.json");

        let store = InMemoryStore::new();
        store.upsert_table(table("orders")).await.unwrap();
        store.mark_checkpoint("shop", "shop.main.orders").await.unwrap();
        store.save_snapshot(&path).await.unwrap();

        let restored = InMemoryStore::open(&path).await.unwrap();
        let orders = restored.table("shop.main.orders").await.unwrap().unwrap();
        assert_eq!(orders.columns.len(), 1);
        assert!(restored.checkpoint("shop").await.unwrap().contains("shop.main.orders"));

        let empty = InMemoryStore::open(dir.path().join("missing.json")).await.unwrap();
        assert!(empty.tables("shop").await.unwrap().is_empty());
    }
}
