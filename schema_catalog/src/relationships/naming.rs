//! Relationships suggested by naming conventions

use crate::catalog::types::{types_compatible, Column, Endpoint, Evidence, EvidenceDetail, RelationshipKind, Table};
use crate::config::DetectionConfig;
use crate::utils::naming::{same_entity, singularize};

use super::{key_column, round_confidence};

const FOREIGN_ID_RULE: &str = "singular_table_id";
const SHARED_ID_RULE: &str = "table_prefix_id";

/// Whether the child's distinct count fits inside the parent's rows.
/// Unknown statistics count as implausible.
fn cardinality_plausible(child: &Column, parent: &Table) -> bool {
    match (child.profile.as_ref(), parent.estimated_rows) {
        (Some(profile), Some(rows)) => profile.distinct.value() <= rows,
        _ => false,
    }
}

fn score(child: &Column, parent_table: &Table, parent: &Column, config: &DetectionConfig) -> (f64, bool, bool) {
    let compatible = types_compatible(&child.data_type, &parent.data_type);
    let plausible = cardinality_plausible(child, parent_table);
    let confidence = if compatible && plausible {
        config.naming_base_confidence + config.naming_bonus
    } else {
        config.naming_base_confidence - config.naming_penalty
    };
    (round_confidence(confidence), compatible, plausible)
}

/// Whether `table` names a sub-entity of `parent`, e.g. `customer_details`
/// of `customers`
fn extends(table: &str, parent: &str) -> bool {
    let table = table.to_lowercase();
    let parent = parent.to_lowercase();
    let singular = singularize(&parent);
    table != parent
        && [parent.as_str(), singular.as_str()]
            .iter()
            .any(|prefix| table.len() > prefix.len() + 1 && table.starts_with(&format!("{}_", prefix)))
}

/// Candidate edges for `<singular>_id` columns and shared `id` columns
pub fn detect(tables: &[Table], config: &DetectionConfig) -> Vec<Evidence> {
    let mut signals = Vec::new();

    for child_table in tables {
        for column in child_table.active_columns() {
            let name = column.name.to_lowercase();

            let (rule, parents): (&str, Vec<&Table>) = if name == "id" {
                (
                    SHARED_ID_RULE,
                    tables
                        .iter()
                        .filter(|p| extends(&child_table.name, &p.name))
                        .collect(),
                )
            } else if let Some(entity) = name.strip_suffix("_id").filter(|e| !e.is_empty()) {
                (
                    FOREIGN_ID_RULE,
                    tables
                        .iter()
                        .filter(|p| p.qualified_name != child_table.qualified_name)
                        .filter(|p| same_entity(&p.name, entity))
                        .collect(),
                )
            } else {
                continue;
            };

            for parent_table in parents {
                let Some(parent) = key_column(parent_table) else {
                    continue;
                };
                let (confidence, type_compatible, cardinality_plausible) =
                    score(column, parent_table, parent, config);
                if confidence < config.min_confidence {
                    continue;
                }
                signals.push(Evidence {
                    kind: RelationshipKind::NamingMatch,
                    confidence,
                    child: Endpoint::new(&child_table.qualified_name, &column.name),
                    parent: Endpoint::new(&parent_table.qualified_name, &parent.name),
                    detail: EvidenceDetail::Naming {
                        rule: rule.to_string(),
                        type_compatible,
                        cardinality_plausible,
                    },
                });
            }
        }
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{
        DistinctCount, ProfileStats, SamplingStrategy, SemanticPattern, TableDescriptor,
    };
    use pretty_assertions::assert_eq;

    fn table(name: &str, rows: u64, columns: Vec<Column>) -> Table {
        let mut t = Table::new(
            "shop",
            "shop",
            &TableDescriptor { schema: "public".into(), name: name.into(), estimated_rows: Some(rows) },
        );
        for c in columns {
            t.add_column(c);
        }
        t
    }

    fn profiled(mut column: Column, distinct: u64) -> Column {
        column.profile = Some(ProfileStats {
            strategy: SamplingStrategy::Full,
            rows_examined: distinct,
            null_count: 0,
            null_ratio: 0.0,
            distinct: DistinctCount::Exact { value: distinct },
            min: None,
            max: None,
            top_values: vec![],
            pattern: SemanticPattern::Unclassified,
            ambiguous_patterns: vec![],
        });
        column
    }

    fn customers() -> Table {
        table(
            "customers",
            50,
            vec![Column::new("id", "integer").primary_key(true), Column::new("name", "text")],
        )
    }

    #[test]
    fn test_singular_id_matches_plural_table() {
        let orders = table(
            "orders",
            200,
            vec![
                Column::new("id", "integer").primary_key(true),
                profiled(Column::new("customer_id", "integer"), 40),
            ],
        );
        let signals = detect(&[customers(), orders], &DetectionConfig::default());

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].child, Endpoint::new("shop.public.orders", "customer_id"));
        assert_eq!(signals[0].parent, Endpoint::new("shop.public.customers", "id"));
        assert_eq!(signals[0].confidence, 0.8);
    }

    #[test]
    fn test_confidence_drops_when_a_check_fails() {
        let config = DetectionConfig::default();
        let good = table("orders", 10, vec![profiled(Column::new("customer_id", "integer"), 40)]);
        let wrong_type = table("orders", 10, vec![profiled(Column::new("customer_id", "text"), 40)]);
        let too_many = table("orders", 10, vec![profiled(Column::new("customer_id", "integer"), 80)]);
        let unprofiled = table("orders", 10, vec![Column::new("customer_id", "integer")]);

        let best = detect(&[customers(), good], &config)[0].confidence;
        for candidate in [wrong_type, too_many, unprofiled] {
            let signals = detect(&[customers(), candidate], &config);
            assert_eq!(signals.len(), 1);
            assert!(signals[0].confidence < best);
            assert_eq!(signals[0].confidence, 0.3);
        }
    }

    #[test]
    fn test_below_minimum_is_discarded() {
        let config = DetectionConfig {
            min_confidence: 0.5,
            ..DetectionConfig::default()
        };
        let orders = table("orders", 10, vec![Column::new("customer_id", "text")]);
        assert!(detect(&[customers(), orders], &config).is_empty());
    }

    #[test]
    fn test_shared_id_on_extension_table() {
        let details = table(
            "customer_details",
            50,
            vec![profiled(Column::new("id", "integer").primary_key(true), 50)],
        );
        let signals = detect(&[customers(), details], &DetectionConfig::default());

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].child, Endpoint::new("shop.public.customer_details", "id"));
        assert_eq!(signals[0].parent, Endpoint::new("shop.public.customers", "id"));
    }

    #[test]
    fn test_unrelated_names_do_not_match() {
        let archive = table("orders_archive", 20, vec![Column::new("cust_ref", "integer")]);
        assert!(detect(&[customers(), archive], &DetectionConfig::default()).is_empty());
    }
}
