//! Database connection handling
//!
//! A single capability interface over the closed set of supported engines.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::types::{
    ColumnDescriptor, DataSource, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor,
};
use crate::db::postgres::PostgresConnector;
use crate::db::sqlite::SqliteConnector;
use crate::db::sqlserver::SqlServerConnector;
use crate::discovery::filter::DiscoveryFilter;
use crate::error::{Error, FailedUnit, Result, UnitRef};

/// Lazy sequence of text-cast column values; `None` is SQL NULL
pub type ValueStream = BoxStream<'static, Result<Option<String>>>;

/// Tables that survived filtering, plus schemas that could not be read
#[derive(Debug, Default)]
pub struct TableListing {
    pub tables: Vec<TableDescriptor>,
    pub failures: Vec<FailedUnit>,
}

/// Capabilities every engine provides
#[async_trait]
pub trait Connector: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Database label used as the first part of qualified names
    fn database_name(&self) -> &str;

    async fn list_schemas(&self) -> Result<Vec<String>>;

    /// Tables of one schema, ordered by name
    async fn list_schema_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>>;

    /// Columns ordered by ordinal position
    async fn list_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>>;

    /// Declared foreign keys; a table without constraints yields an empty list
    async fn fetch_foreign_keys(&self, table: &TableDescriptor) -> Result<Vec<ForeignKey>>;

    /// Stream a column's values. `RandomSample` is evaluated by the engine.
    /// Every call starts a fresh query.
    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        limit: Option<u64>,
        strategy: SamplingStrategy,
    ) -> ValueStream;

    /// Enumerate tables under the filter. Unreadable schemas are skipped and
    /// reported; only a failure to list schemas at all is an error.
    async fn list_tables(&self, filter: &DiscoveryFilter) -> Result<TableListing> {
        let mut listing = TableListing::default();

        for schema in self.list_schemas().await? {
            if !filter.allows_schema(&schema) {
                debug!(schema = %schema, "Schema excluded by filter");
                continue;
            }

            match self.list_schema_tables(&schema).await {
                Ok(tables) => listing
                    .tables
                    .extend(tables.into_iter().filter(|t| filter.allows_table(&t.name))),
                Err(error) => {
                    let error = error.in_schema(&schema);
                    warn!(schema = %schema, error = %error, "Skipping schema");
                    listing
                        .failures
                        .push(FailedUnit::new(UnitRef::Schema { schema }, &error));
                }
            }
        }

        Ok(listing)
    }
}

/// Group rows of `(constraint, column, ref_schema, ref_table, ref_column)`
/// into foreign keys. Rows of one constraint must be adjacent.
pub(crate) fn group_foreign_keys(
    rows: impl IntoIterator<Item = (Option<String>, String, String, String, String)>,
) -> Vec<ForeignKey> {
    let mut keys: Vec<ForeignKey> = Vec::new();

    for (name, column, ref_schema, ref_table, ref_column) in rows {
        match keys.last_mut() {
            Some(last)
                if name.is_some()
                    && last.name == name
                    && last.ref_schema == ref_schema
                    && last.ref_table == ref_table =>
            {
                last.columns.push(column);
                last.ref_columns.push(ref_column);
            }
            _ => keys.push(ForeignKey {
                name,
                columns: vec![column],
                ref_schema,
                ref_table,
                ref_columns: vec![ref_column],
            }),
        }
    }

    keys
}

/// Percentage of pages to sample so that roughly `limit` rows come back
pub(crate) fn sample_percent(limit: u64, estimated_rows: Option<u64>) -> f64 {
    match estimated_rows {
        Some(rows) if rows > 0 => ((limit as f64 / rows as f64) * 100.0 * 1.5).clamp(0.01, 100.0),
        _ => 100.0,
    }
}

/// Enumeration of supported database engines
#[derive(Clone)]
pub enum EngineConnector {
    Postgres(PostgresConnector),
    Sqlite(SqliteConnector),
    SqlServer(SqlServerConnector),
}

impl EngineConnector {
    /// Open a pooled handle for the data source. Pools hold one connection
    /// per worker plus one for the orchestrator.
    pub async fn connect(source: &DataSource) -> Result<Self> {
        let timeout = Duration::from_secs(source.connect_timeout_seconds);
        let pool_size = source.concurrency as u32 + 1;

        let connecting = async {
            match source.engine {
                EngineKind::Postgres => {
                    PostgresConnector::connect(source, pool_size, timeout).await.map(EngineConnector::Postgres)
                }
                EngineKind::Sqlite => {
                    SqliteConnector::connect(source, pool_size, timeout).await.map(EngineConnector::Sqlite)
                }
                EngineKind::SqlServer => {
                    SqlServerConnector::connect(source, pool_size, timeout).await.map(EngineConnector::SqlServer)
                }
            }
        };

        let connector = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "Timed out after {}s connecting to {}",
                    source.connect_timeout_seconds, source.name
                ))
            })?
            .map_err(|e| match e {
                Error::Connection(_) | Error::UnsupportedEngine(_) => e,
                other => Error::Connection(other.to_string()),
            })?;

        info!(
            source = %source.name,
            engine = %source.engine,
            database = %connector.database_name(),
            "Connected"
        );
        Ok(connector)
    }

    fn inner(&self) -> &dyn Connector {
        match self {
            EngineConnector::Postgres(c) => c,
            EngineConnector::Sqlite(c) => c,
            EngineConnector::SqlServer(c) => c,
        }
    }
}

#[async_trait]
impl Connector for EngineConnector {
    fn engine(&self) -> EngineKind {
        self.inner().engine()
    }

    fn database_name(&self) -> &str {
        self.inner().database_name()
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        self.inner().list_schemas().await
    }

    async fn list_schema_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        self.inner().list_schema_tables(schema).await
    }

    async fn list_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>> {
        self.inner().list_columns(table).await
    }

    async fn fetch_foreign_keys(&self, table: &TableDescriptor) -> Result<Vec<ForeignKey>> {
        self.inner().fetch_foreign_keys(table).await
    }

    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        limit: Option<u64>,
        strategy: SamplingStrategy,
    ) -> ValueStream {
        self.inner().sample_rows(table, column, limit, strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(name: &str, col: &str, table: &str, ref_col: &str) -> (Option<String>, String, String, String, String) {
        (Some(name.into()), col.into(), "public".into(), table.into(), ref_col.into())
    }

    #[test]
    fn test_group_foreign_keys() {
        let keys = group_foreign_keys(vec![
            row("fk_line_order", "order_id", "orders", "id"),
            row("fk_line_order", "order_rev", "orders", "rev"),
            row("fk_line_product", "product_id", "products", "id"),
        ]);

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].columns, vec!["order_id", "order_rev"]);
        assert_eq!(keys[0].ref_columns, vec!["id", "rev"]);
        assert_eq!(keys[1].ref_table, "products");
    }

    #[test]
    fn test_unnamed_keys_are_not_merged() {
        let keys = group_foreign_keys(vec![
            (None, "a_id".into(), "main".into(), "a".into(), "id".into()),
            (None, "b_id".into(), "main".into(), "a".into(), "id".into()),
        ]);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_sample_percent() {
        assert_eq!(sample_percent(10_000, Some(1_000_000)), 1.5);
        assert_eq!(sample_percent(10_000, Some(10_000)), 100.0);
        assert_eq!(sample_percent(10, None), 100.0);
    }
}
