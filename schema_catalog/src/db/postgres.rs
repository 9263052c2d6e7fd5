//! PostgreSQL connector

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;

use crate::catalog::types::{
    ColumnDescriptor, DataSource, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor,
};
use crate::db::connection::{group_foreign_keys, sample_percent, Connector, ValueStream};
use crate::error::{Error, Result};
use crate::utils::naming::quote_identifier;

#[derive(FromRow)]
struct TableRow {
    table_name: String,
    reltuples: Option<f64>,
}

#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    ordinal_position: i32,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
    is_primary_key: bool,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    column_name: String,
    ref_schema: String,
    ref_table: String,
    ref_column: String,
}

/// PostgreSQL connector over a sqlx pool
#[derive(Clone)]
pub struct PostgresConnector {
    pool: PgPool,
    database: String,
}

impl PostgresConnector {
    pub async fn connect(source: &DataSource, pool_size: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(timeout)
            .connect(&source.url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let database = match &source.database {
            Some(name) => name.clone(),
            None => sqlx::query_scalar::<_, String>("SELECT current_database()::text")
                .fetch_one(&pool)
                .await?,
        };

        Ok(Self { pool, database })
    }

    fn table_ref(&self, table: &TableDescriptor) -> String {
        format!(
            "{}.{}",
            quote_identifier(&table.schema, EngineKind::Postgres),
            quote_identifier(&table.name, EngineKind::Postgres)
        )
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_identifier(schema, EngineKind::Postgres),
            quote_identifier(table, EngineKind::Postgres)
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
              AND schema_name NOT LIKE 'pg_toast%'
              AND schema_name NOT LIKE 'pg_temp%'
            ORDER BY schema_name
        "#;
        Ok(sqlx::query_scalar(sql).fetch_all(&self.pool).await?)
    }

    async fn list_schema_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let has_usage: bool = sqlx::query_scalar("SELECT has_schema_privilege($1, 'USAGE')")
            .bind(schema)
            .fetch_one(&self.pool)
            .await?;
        if !has_usage {
            return Err(Error::SchemaAccess {
                schema: schema.to_string(),
                reason: "missing USAGE privilege".to_string(),
            });
        }

        let sql = r#"
            SELECT t.table_name::text AS table_name, c.reltuples::float8 AS reltuples
            FROM information_schema.tables t
            LEFT JOIN pg_catalog.pg_namespace n ON n.nspname = t.table_schema
            LEFT JOIN pg_catalog.pg_class c
                ON c.relnamespace = n.oid AND c.relname = t.table_name
            WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;
        let rows = sqlx::query_as::<_, TableRow>(sql)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            // reltuples is -1 (or 0 on older servers) until the table is analysed
            let estimated_rows = match row.reltuples {
                Some(n) if n > 0.0 => Some(n as u64),
                _ => Some(self.count_rows(schema, &row.table_name).await?),
            };
            tables.push(TableDescriptor {
                schema: schema.to_string(),
                name: row.table_name,
                estimated_rows,
            });
        }
        Ok(tables)
    }

    async fn list_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>> {
        let sql = r#"
            SELECT
                c.column_name::text AS column_name,
                c.ordinal_position::int4 AS ordinal_position,
                c.data_type::text AS data_type,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS column_default,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                        AND tc.table_name = kcu.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = c.table_schema
                      AND tc.table_name = c.table_name
                      AND kcu.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#;
        let rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnDescriptor {
                name: row.column_name,
                ordinal_position: row.ordinal_position,
                data_type: row.data_type,
                nullable: row.is_nullable == "YES",
                default: row.column_default,
                is_primary_key: row.is_primary_key,
            })
            .collect())
    }

    async fn fetch_foreign_keys(&self, table: &TableDescriptor) -> Result<Vec<ForeignKey>> {
        // pg_constraint keeps composite key columns paired by position
        let sql = r#"
            SELECT
                con.conname::text AS constraint_name,
                a.attname::text AS column_name,
                rn.nspname::text AS ref_schema,
                rc.relname::text AS ref_table,
                ra.attname::text AS ref_column
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_class rc ON rc.oid = con.confrelid
            JOIN pg_catalog.pg_namespace rn ON rn.oid = rc.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                WITH ORDINALITY AS k(attnum, refnum, ord)
            JOIN pg_catalog.pg_attribute a
                ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            JOIN pg_catalog.pg_attribute ra
                ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
            WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
            ORDER BY con.conname, k.ord
        "#;
        let rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await?;

        Ok(group_foreign_keys(rows.into_iter().map(|r| {
            (Some(r.constraint_name), r.column_name, r.ref_schema, r.ref_table, r.ref_column)
        })))
    }

    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        limit: Option<u64>,
        strategy: SamplingStrategy,
    ) -> ValueStream {
        let column = quote_identifier(column, EngineKind::Postgres);
        let source = self.table_ref(table);
        let sql = match (strategy, limit) {
            (SamplingStrategy::Full, None) => format!("SELECT {}::text FROM {}", column, source),
            (SamplingStrategy::Full, Some(n)) => {
                format!("SELECT {}::text FROM {} LIMIT {}", column, source, n)
            }
            (SamplingStrategy::RandomSample, n) => {
                let n = n.unwrap_or(0);
                format!(
                    "SELECT {}::text FROM {} TABLESAMPLE SYSTEM ({:.4}) LIMIT {}",
                    column,
                    source,
                    sample_percent(n, table.estimated_rows),
                    n
                )
            }
        };
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
