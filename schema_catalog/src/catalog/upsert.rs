//! Upsert of tables and their column lists

use serde::{Deserialize, Serialize};

use crate::catalog::types::{Column, ColumnStatus, Table};

/// What changed when a table was upserted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub created: bool,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Match fresh columns to stored ones by name. Matches are replaced, new
/// names added, and stored columns missing from the fresh list are kept
/// with status `Removed`.
pub fn merge_columns(existing: &[Column], fresh: Vec<Column>) -> (Vec<Column>, UpsertOutcome) {
    let mut outcome = UpsertOutcome::default();
    let mut merged = Vec::with_capacity(fresh.len());

    for column in fresh {
        match existing.iter().find(|c| c.name == column.name) {
            Some(old) if old.status == ColumnStatus::Active && old.same_definition(&column) => {
                outcome.unchanged += 1
            }
            Some(_) => outcome.changed += 1,
            None => outcome.added += 1,
        }
        merged.push(Column {
            status: ColumnStatus::Active,
            ..column
        });
    }

    for old in existing {
        if merged.iter().any(|c| c.name == old.name) {
            continue;
        }
        if old.status == ColumnStatus::Active {
            outcome.removed += 1;
        }
        merged.push(Column {
            status: ColumnStatus::Removed,
            ..old.clone()
        });
    }

    (merged, outcome)
}

/// Upsert a freshly discovered table over the stored version, if any
pub fn merge_table(existing: Option<&Table>, mut fresh: Table) -> (Table, UpsertOutcome) {
    let Some(existing) = existing else {
        let outcome = UpsertOutcome {
            created: true,
            added: fresh.columns.len(),
            ..UpsertOutcome::default()
        };
        return (fresh, outcome);
    };

    let (columns, outcome) = merge_columns(&existing.columns, std::mem::take(&mut fresh.columns));
    fresh.columns = columns;
    (fresh, outcome)
}
