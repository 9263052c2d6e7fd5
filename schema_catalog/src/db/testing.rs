//! In-memory connector for unit tests

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;

use crate::catalog::types::{ColumnDescriptor, EngineKind, ForeignKey, SamplingStrategy, TableDescriptor};
use crate::db::connection::{Connector, ValueStream};
use crate::error::{Error, Result};

/// What `sample_rows` yields for one column
#[derive(Clone)]
pub(crate) enum Values {
    Rows(Vec<Option<String>>),
    Hang,
}

/// Serves fixed column values keyed by `(table name, column)`; unknown
/// columns fail to sample
#[derive(Default)]
pub(crate) struct StaticConnector {
    values: HashMap<(String, String), Values>,
}

impl StaticConnector {
    pub(crate) fn with(mut self, table: &str, column: &str, values: &[&str]) -> Self {
        let rows = values.iter().map(|v| Some(v.to_string())).collect();
        self.values.insert((table.to_string(), column.to_string()), Values::Rows(rows));
        self
    }

    pub(crate) fn hanging(mut self, table: &str, column: &str) -> Self {
        self.values.insert((table.to_string(), column.to_string()), Values::Hang);
        self
    }
}

#[async_trait]
impl Connector for StaticConnector {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn database_name(&self) -> &str {
        "shop"
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn list_schema_tables(&self, _schema: &str) -> Result<Vec<TableDescriptor>> {
        Ok(Vec::new())
    }

    async fn list_columns(&self, _table: &TableDescriptor) -> Result<Vec<ColumnDescriptor>> {
        Ok(Vec::new())
    }

    async fn fetch_foreign_keys(&self, _table: &TableDescriptor) -> Result<Vec<ForeignKey>> {
        Ok(Vec::new())
    }

    fn sample_rows(
        &self,
        table: &TableDescriptor,
        column: &str,
        _limit: Option<u64>,
        _strategy: SamplingStrategy,
    ) -> ValueStream {
        match self.values.get(&(table.name.clone(), column.to_string())) {
            Some(Values::Rows(rows)) => stream::iter(rows.clone().into_iter().map(Ok)).boxed(),
            Some(Values::Hang) => stream::pending::<Result<Option<String>>>().boxed(),
            None => stream::once(async { Err(Error::Query("no such column".into())) }).boxed(),
        }
    }
}
