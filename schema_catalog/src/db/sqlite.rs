//! SQLite connector
//!
//! Attached databases play the role of schemas; `temp` is never listed.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use std::path::Path;
use std::time::Duration;

use crate::catalog::types::{
    ColumnDescriptor, DataSource, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor,
};
use crate::db::connection::{group_foreign_keys, Connector, ValueStream};
use crate::error::{Error, Result};
use crate::utils::naming::quote_identifier;

#[derive(FromRow)]
struct ColumnRow {
    cid: i64,
    name: String,
    data_type: String,
    not_null: i64,
    dflt_value: Option<String>,
    pk: i64,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    id: i64,
    ref_table: String,
    column_name: String,
    ref_column: Option<String>,
}

/// SQLite connector over a sqlx pool
#[derive(Clone)]
pub struct SqliteConnector {
    pool: SqlitePool,
    database: String,
}

/// Database label derived from the file name of a `sqlite:` URL
fn database_label(url: &str) -> String {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or("");
    if path.is_empty() || path.contains(":memory:") {
        return "memory".to_string();
    }
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string()
}

impl SqliteConnector {
    pub async fn connect(source: &DataSource, pool_size: u32, timeout: Duration) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(timeout)
            .connect(&source.url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let database = source
            .database
            .clone()
            .unwrap_or_else(|| database_label(&source.url));

        Ok(Self { pool, database })
    }

    fn quote(name: &str) -> String {
        quote_identifier(name, EngineKind::Sqlite)
    }

    async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, ColumnRow>(
            r#"SELECT cid, name, type AS data_type, "notnull" AS not_null, dflt_value, pk
               FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk"#,
        )
        .bind(table)
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_schema_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Self::quote(schema)
        );
        let names: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let count_sql = format!("SELECT COUNT(*) FROM {}.{}", Self::quote(schema), Self::quote(&name));
            let count: i64 = sqlx::query_scalar(&count_sql).fetch_one(&self.pool).await?;
            tables.push(TableDescriptor {
                schema: schema.to_string(),
                name,
                estimated_rows: Some(count.max(0) as u64),
            });
        }
        Ok(tables)
    }

    async fn list_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>> {
        let rows = sqlx::query_as::<_, ColumnRow>(
            r#"SELECT cid, name, type AS data_type, "notnull" AS not_null, dflt_value, pk
               FROM pragma_table_info(?1, ?2) ORDER BY cid"#,
        )
        .bind(&table.name)
        .bind(&table.schema)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.name,
                ordinal_position: row.cid as i32 + 1,
                data_type: row.data_type,
                nullable: row.not_null == 0 && row.pk == 0,
                default: row.dflt_value,
                is_primary_key: row.pk > 0,
            })
            .collect())
    }

    async fn fetch_foreign_keys(&self, table: &TableDescriptor) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query_as::<_, ForeignKeyRow>(
            r#"SELECT id, "table" AS ref_table, "from" AS column_name, "to" AS ref_column
               FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq"#,
        )
        .bind(&table.name)
        .bind(&table.schema)
        .fetch_all(&self.pool)
        .await?;

        let mut resolved = Vec::with_capacity(rows.len());
        let mut position = 0usize;
        let mut current_id = None;
        for row in rows {
            if current_id != Some(row.id) {
                current_id = Some(row.id);
                position = 0;
            }
            // A missing target column means the parent's primary key
            let ref_column = match row.ref_column {
                Some(column) => column,
                None => self
                    .primary_key_columns(&table.schema, &row.ref_table)
                    .await?
                    .into_iter()
                    .nth(position)
                    .ok_or_else(|| {
                        Error::Query(format!(
                            "Foreign key on {}.{} references {} without a primary key",
                            table.name, row.column_name, row.ref_table
                        ))
                    })?,
            };
            position += 1;
            resolved.push((
                Some(format!("fk_{}_{}", table.name, row.id)),
                row.column_name,
                table.schema.clone(),
                row.ref_table,
                ref_column,
            ));
        }

        Ok(group_foreign_keys(resolved))
    }

    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        limit: Option<u64>,
        strategy: SamplingStrategy,
    ) -> ValueStream {
        let source = format!("{}.{}", Self::quote(&table.schema), Self::quote(&table.name));
        let mut sql = format!("SELECT CAST({} AS TEXT) FROM {}", Self::quote(column), source);
        // No TABLESAMPLE in SQLite; the engine picks the rows
        if strategy == SamplingStrategy::RandomSample {
            sql.push_str(" ORDER BY RANDOM()");
        }
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        let pool = self.pool.clone();

        Box::pin(async_stream::stream! {
            let mut rows = sqlx::query_scalar::<_, Option<String>>(&sql).fetch(&pool);
            loop {
                match rows.try_next().await {
                    Ok(Some(value)) => yield Ok(value),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::from(e));
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sqlite://data/shop.db", "shop")]
    #[case("sqlite:shop.sqlite?mode=ro", "shop")]
    #[case("sqlite::memory:", "memory")]
    fn test_database_label(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(database_label(url), expected);
    }
}
