//! Shared fixtures for the integration tests: throwaway SQLite databases and
//! engine configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use schema_catalog::catalog::types::{
    ColumnDescriptor, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor,
};
use schema_catalog::db::ValueStream;
use schema_catalog::progress::{ProgressEvent, ProgressSink};
use schema_catalog::{CatalogEngine, Config, Connector, Error, InMemoryStore};

/// A SQLite file inside a temporary directory, populated by `statements`
pub struct Fixture {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub async fn new(statements: &[String]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");

        let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for statement in statements {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        pool.close().await;

        Self { _dir: dir, path }
    }

    pub fn url(&self) -> String {
        sqlite_url(&self.path)
    }
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

/// Statements creating `name(id, label)` with `rows` rows
pub fn labelled_table(name: &str, rows: u64) -> Vec<String> {
    vec![
        format!("CREATE TABLE {name} (id INTEGER PRIMARY KEY, label TEXT NOT NULL)"),
        format!(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {rows}) \
             INSERT INTO {name} (id, label) SELECT n, 'label ' || (n % 5) FROM seq"
        ),
    ]
}

pub fn config(url: &str, sample_cap: u64, sample_size: u64, concurrency: usize) -> Config {
    let text = format!(
        r#"
        [data_source]
        name = "shop"
        engine = "sqlite"
        url = "{url}"
        sample_cap = {sample_cap}
        sample_size = {sample_size}
        concurrency = {concurrency}
        "#
    );
    toml::from_str(&text).unwrap()
}

pub fn engine(config: Config, store: Arc<InMemoryStore>) -> CatalogEngine {
    CatalogEngine::new(config, store).unwrap()
}

/// Cancels the run once `after` tables have completed
pub struct CancelAfter {
    remaining: AtomicUsize,
    token: CancellationToken,
}

impl CancelAfter {
    pub fn new(after: usize, token: CancellationToken) -> Self {
        Self {
            remaining: AtomicUsize::new(after),
            token,
        }
    }
}

impl ProgressSink for CancelAfter {
    fn emit(&self, event: ProgressEvent) {
        if let ProgressEvent::TableCompleted { .. } = event {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.token.cancel();
            }
        }
    }
}

/// A connector over database `db` that fails at every level:
///
/// - schema `locked` cannot be read
/// - in schema `main`, `bad` fails to list its columns and `secret` is
///   denied without the driver naming a schema
/// - table `good` has columns `a` (sampling errors), `b` (healthy) and
///   `c` (sampling never finishes)
pub struct FlakyConnector;

fn denied(reason: &str) -> Error {
    Error::SchemaAccess {
        schema: String::new(),
        reason: reason.to_string(),
    }
}

fn text_column(name: &str, ordinal_position: i32) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        ordinal_position,
        data_type: "text".to_string(),
        nullable: true,
        default: None,
        is_primary_key: false,
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn database_name(&self) -> &str {
        "db"
    }

    async fn list_schemas(&self) -> schema_catalog::Result<Vec<String>> {
        Ok(vec!["locked".to_string(), "main".to_string()])
    }

    async fn list_schema_tables(&self, schema: &str) -> schema_catalog::Result<Vec<TableDescriptor>> {
        if schema == "locked" {
            return Err(denied("permission denied for schema"));
        }
        Ok(["bad", "good", "secret"]
            .iter()
            .map(|name| TableDescriptor {
                schema: schema.to_string(),
                name: name.to_string(),
                estimated_rows: Some(3),
            })
            .collect())
    }

    async fn list_columns(&self, table: &TableDescriptor) -> schema_catalog::Result<Vec<ColumnDescriptor>> {
        match table.name.as_str() {
            "bad" => Err(Error::Query("relation \"bad\" vanished".to_string())),
            "secret" => Err(denied("permission denied for table secret")),
            _ => Ok(vec![text_column("a", 1), text_column("b", 2), text_column("c", 3)]),
        }
    }

    async fn fetch_foreign_keys(&self, _table: &TableDescriptor) -> schema_catalog::Result<Vec<ForeignKey>> {
        Ok(Vec::new())
    }

    fn sample_rows(
        &self,
        _table: &TableDescriptor,
        column: &str,
        _limit: Option<u64>,
        _strategy: SamplingStrategy,
    ) -> ValueStream {
        match column {
            "a" => stream::once(async { Err(Error::Query("invalid input syntax".to_string())) }).boxed(),
            "c" => stream::pending::<schema_catalog::Result<Option<String>>>().boxed(),
            _ => stream::iter(["x", "y", "x"].map(|v| Ok(Some(v.to_string())))).boxed(),
        }
    }
}
