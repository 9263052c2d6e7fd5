//! Relationships from declared foreign keys

use crate::catalog::types::{
    qualified_name, Endpoint, Evidence, EvidenceDetail, RelationshipKind, Table,
};

use super::thresholds;

/// One signal per declared column pair, always at full confidence
pub fn detect(tables: &[Table]) -> Vec<Evidence> {
    let mut signals = Vec::new();

    for table in tables {
        for fk in &table.foreign_keys {
            let parent_table = qualified_name(&table.database, &fk.ref_schema, &fk.ref_table);
            for (column, ref_column) in fk.pairs() {
                signals.push(Evidence {
                    kind: RelationshipKind::ForeignKey,
                    confidence: thresholds::DECLARED,
                    child: Endpoint::new(&table.qualified_name, column),
                    parent: Endpoint::new(&parent_table, ref_column),
                    detail: EvidenceDetail::Constraint {
                        constraint: fk.name.clone(),
                    },
                });
            }
        }
    }

    signals
}
