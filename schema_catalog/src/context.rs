//! Read-only context handed to the description writer for one table

use serde::{Deserialize, Serialize};

use crate::catalog::types::{Column, Relationship, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableContext {
    pub qualified_name: String,
    pub estimated_rows: Option<u64>,
    /// Active columns with their statistics, when profiled
    pub columns: Vec<Column>,
    /// Every relationship with an endpoint on this table
    pub relationships: Vec<Relationship>,
}

impl TableContext {
    pub fn for_table(table: &Table, relationships: &[Relationship]) -> Self {
        Self {
            qualified_name: table.qualified_name.clone(),
            estimated_rows: table.estimated_rows,
            columns: table.active_columns().cloned().collect(),
            relationships: relationships
                .iter()
                .filter(|r| r.touches(&table.qualified_name))
                .cloned()
                .collect(),
        }
    }

    /// Relationships touching one column of the table
    pub fn column_relationships<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.relationships.iter().filter(move |r| {
            (r.left.table == self.qualified_name && r.left.column == column)
                || (r.right.table == self.qualified_name && r.right.column == column)
        })
    }
}

/// Context for every table
pub fn assemble(tables: &[Table], relationships: &[Relationship]) -> Vec<TableContext> {
    tables
        .iter()
        .map(|table| TableContext::for_table(table, relationships))
        .collect()
}
