//! SQL Server connector over pooled tiberius clients

use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use tiberius::{Config, Row};

use crate::catalog::types::{
    ColumnDescriptor, DataSource, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor,
};
use crate::db::connection::{group_foreign_keys, sample_percent, Connector, ValueStream};
use crate::db::pool::{self, TdsPool};
use crate::error::{Error, Result};
use crate::utils::naming::quote_identifier;

/// SQL Server connector
#[derive(Clone)]
pub struct SqlServerConnector {
    pool: TdsPool,
    database: String,
}

fn text(row: &Row, idx: usize) -> Result<Option<String>> {
    Ok(row.try_get::<&str, _>(idx)?.map(str::to_string))
}

fn required_text(row: &Row, idx: usize) -> Result<String> {
    text(row, idx)?.ok_or_else(|| Error::Query(format!("Unexpected NULL in column {}", idx)))
}

impl SqlServerConnector {
    pub async fn connect(source: &DataSource, pool_size: u32, timeout: Duration) -> Result<Self> {
        let config = Config::from_ado_string(&source.url)
            .map_err(|e| Error::Connection(format!("Invalid connection string: {}", e)))?;
        let pool = pool::build(config, pool_size, timeout).await?;

        let database = match &source.database {
            Some(name) => name.clone(),
            None => {
                let mut client = pool::checkout(&pool).await?;
                let row = client
                    .simple_query("SELECT DB_NAME()")
                    .await?
                    .into_row()
                    .await?;
                match row {
                    Some(row) => required_text(&row, 0)?,
                    None => return Err(Error::Connection("DB_NAME() returned no row".to_string())),
                }
            }
        };

        Ok(Self { pool, database })
    }

    fn quote(name: &str) -> String {
        quote_identifier(name, EngineKind::SqlServer)
    }
}

#[async_trait]
impl Connector for SqlServerConnector {
    fn engine(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT s.name
            FROM sys.schemas s
            WHERE s.name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest')
              AND s.name NOT LIKE 'db[_]%'
            ORDER BY s.name
        "#;
        let mut client = pool::checkout(&self.pool).await?;
        let rows = client.simple_query(sql).await?.into_first_result().await?;
        rows.iter().map(|row| required_text(row, 0)).collect()
    }

    async fn list_schema_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let mut client = pool::checkout(&self.pool).await?;

        let allowed = match client
            .query("SELECT HAS_PERMS_BY_NAME(@P1, 'SCHEMA', 'SELECT')", &[&schema])
            .await?
            .into_row()
            .await?
        {
            Some(row) => row.try_get::<i32, _>(0)?.unwrap_or(0),
            None => 0,
        };
        if allowed == 0 {
            return Err(Error::SchemaAccess {
                schema: schema.to_string(),
                reason: "missing SELECT permission".to_string(),
            });
        }

        let sql = r#"
            SELECT t.name, CAST(SUM(p.rows) AS BIGINT) AS row_count
            FROM sys.tables t
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            LEFT JOIN sys.partitions p ON p.object_id = t.object_id AND p.index_id IN (0, 1)
            WHERE s.name = @P1
            GROUP BY t.name
            ORDER BY t.name
        "#;
        let rows = client.query(sql, &[&schema]).await?.into_first_result().await?;

        rows.iter()
            .map(|row| {
                Ok(TableDescriptor {
                    schema: schema.to_string(),
                    name: required_text(row, 0)?,
                    estimated_rows: row.try_get::<i64, _>(1)?.map(|n| n.max(0) as u64),
                })
            })
            .collect()
    }

    async fn list_columns(&self, table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>> {
        let sql = r#"
            SELECT
                c.COLUMN_NAME,
                CAST(c.ORDINAL_POSITION AS INT),
                c.DATA_TYPE,
                c.IS_NULLABLE,
                c.COLUMN_DEFAULT,
                CAST(CASE WHEN EXISTS (
                    SELECT 1
                    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                        ON tc.CONSTRAINT_NAME = k.CONSTRAINT_NAME
                        AND tc.TABLE_SCHEMA = k.TABLE_SCHEMA
                    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                      AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA
                      AND tc.TABLE_NAME = c.TABLE_NAME
                      AND k.COLUMN_NAME = c.COLUMN_NAME
                ) THEN 1 ELSE 0 END AS INT)
            FROM INFORMATION_SCHEMA.COLUMNS c
            WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#;
        let mut client = pool::checkout(&self.pool).await?;
        let rows = client
            .query(sql, &[&table.schema.as_str(), &table.name.as_str()])
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDescriptor {
                    name: required_text(row, 0)?,
                    ordinal_position: row.try_get::<i32, _>(1)?.unwrap_or(0),
                    data_type: required_text(row, 2)?,
                    nullable: text(row, 3)?.as_deref() == Some("YES"),
                    default: text(row, 4)?,
                    is_primary_key: row.try_get::<i32, _>(5)?.unwrap_or(0) == 1,
                })
            })
            .collect()
    }

    async fn fetch_foreign_keys(&self, table: &TableDescriptor) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT fk.name, pc.name, rs.name, rt.name, rc.name
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables t ON t.object_id = fk.parent_object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            JOIN sys.columns pc
                ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
            JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
            JOIN sys.columns rc
                ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
            WHERE s.name = @P1 AND t.name = @P2
            ORDER BY fk.name, fkc.constraint_column_id
        "#;
        let mut client = pool::checkout(&self.pool).await?;
        let rows = client
            .query(sql, &[&table.schema.as_str(), &table.name.as_str()])
            .await?
            .into_first_result()
            .await?;

        let grouped = rows
            .iter()
            .map(|row| {
                Ok((
                    text(row, 0)?,
                    required_text(row, 1)?,
                    required_text(row, 2)?,
                    required_text(row, 3)?,
                    required_text(row, 4)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(group_foreign_keys(grouped))
    }

    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        limit: Option<u64>,
        strategy: SamplingStrategy,
    ) -> ValueStream {
        let value = format!("CAST({} AS NVARCHAR(MAX))", Self::quote(column));
        let source = format!("{}.{}", Self::quote(&table.schema), Self::quote(&table.name));
        let sql = match (strategy, limit) {
            (SamplingStrategy::Full, None) => format!("SELECT {} FROM {}", value, source),
            (SamplingStrategy::Full, Some(n)) => format!("SELECT TOP ({}) {} FROM {}", n, value, source),
            (SamplingStrategy::RandomSample, n) => {
                let n = n.unwrap_or(0);
                format!(
                    "SELECT TOP ({}) {} FROM {} TABLESAMPLE ({:.4} PERCENT)",
                    n,
                    value,
                    source,
                    sample_percent(n, table.estimated_rows)
                )
            }
        };
        let clients = self.pool.clone();

        Box::pin(async_stream::stream! {
            let mut client = match pool::checkout(&clients).await {
                Ok(client) => client,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            match client.simple_query(sql).await {
                Ok(results) => {
                    let mut rows = results.into_row_stream();
                    loop {
                        match rows.try_next().await {
                            Ok(Some(row)) => match text(&row, 0) {
                                Ok(value) => yield Ok(value),
                                Err(e) => {
                                    yield Err(e);
                                    break;
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                yield Err(Error::from(e));
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(Error::from(e));
                }
            };
        })
    }
}
