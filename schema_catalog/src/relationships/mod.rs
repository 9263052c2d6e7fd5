//! Relationship inference between columns of discovered tables.
//!
//! Three independent detectors report [`Evidence`] into one
//! [`RelationshipSet`]:
//!
//! 1. **Declared constraints** - every foreign key, confidence 1.0
//! 2. **Naming conventions** - `customer_id` pointing at `customers`
//! 3. **Data overlap** - containment of sampled child values in parent values
//!
//! The set holds at most one relationship per canonical endpoint pair.

pub mod constraints;
pub mod naming;
pub mod overlap;

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::types::{
    Cardinality, Column, Endpoint, Evidence, ProfileStats, Relationship, Table,
};
use crate::config::DetectionConfig;
use crate::error::FailedUnit;
use crate::sampling::ColumnSampler;
use crate::utils::naming::singularize;

/// Centralized confidence values.
pub mod thresholds {
    /// Confidence of a declared foreign key.
    pub const DECLARED: f64 = 1.0;
    /// Score of a child-name token that prefixes the parent entity name.
    pub const TOKEN_PREFIX_SIMILARITY: f64 = 0.5;
    /// Shortest token that counts for the prefix match.
    pub const MIN_PREFIX_TOKEN_LEN: usize = 3;
    /// Uniqueness above which a column counts as one value per row.
    pub const UNIQUE_RATIO: f64 = 0.95;
}

/// Round to three decimals so threshold comparisons are exact
pub fn round_confidence(confidence: f64) -> f64 {
    (confidence.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

/// The primary-key-like column of a table: its single primary key column,
/// else `id`, else `<singular table>_id`. Composite keys have none.
pub fn key_column(table: &Table) -> Option<&Column> {
    let mut primary = table.active_columns().filter(|c| c.is_primary_key);
    match (primary.next(), primary.next()) {
        (Some(column), None) => return Some(column),
        (Some(_), Some(_)) => return None,
        _ => {}
    }

    let own_id = format!("{}_id", singularize(&table.name));
    table
        .active_columns()
        .find(|c| c.name.eq_ignore_ascii_case("id"))
        .or_else(|| table.active_columns().find(|c| c.name.eq_ignore_ascii_case(&own_id)))
}

pub fn is_key_column(table: &Table, column: &Column) -> bool {
    key_column(table).map_or(false, |key| key.name == column.name)
}

/// Cardinality from the uniqueness of both sides' statistics. A unique
/// parent makes the child side "many" unless the child is unique too.
pub fn infer_cardinality(child: Option<&ProfileStats>, parent: Option<&ProfileStats>) -> Cardinality {
    let unique = |stats: Option<&ProfileStats>| {
        stats
            .and_then(ProfileStats::uniqueness)
            .map(|ratio| ratio > thresholds::UNIQUE_RATIO)
    };
    match (unique(child), unique(parent)) {
        (Some(true), Some(true)) => Cardinality::OneToOne,
        (Some(_), Some(true)) => Cardinality::ManyToOne,
        (Some(true), Some(false)) => Cardinality::OneToMany,
        _ => Cardinality::Unknown,
    }
}

fn endpoint_profile<'t>(tables: &BTreeMap<&str, &'t Table>, endpoint: &Endpoint) -> Option<&'t ProfileStats> {
    tables
        .get(endpoint.table.as_str())
        .copied()
        .and_then(|table| table.column(&endpoint.column))
        .and_then(|column| column.profile.as_ref())
}

/// Canonical order of two endpoints
pub fn canonical_pair(a: &Endpoint, b: &Endpoint) -> (Endpoint, Endpoint) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Relationships keyed by canonical endpoint pair
#[derive(Debug, Clone, Default)]
pub struct RelationshipSet {
    entries: BTreeMap<(Endpoint, Endpoint), Relationship>,
}

impl RelationshipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a signal. Confidence is the maximum across signals and is never
    /// lowered by a weaker one; the kind follows the strongest signal, with
    /// `foreign_key > naming_match > data_overlap` on ties. Every signal's
    /// evidence is kept.
    pub fn add(&mut self, mut evidence: Evidence) {
        evidence.confidence = round_confidence(evidence.confidence);
        let key = canonical_pair(&evidence.child, &evidence.parent);

        match self.entries.get_mut(&key) {
            Some(existing) => {
                let stronger = evidence.confidence > existing.confidence
                    || (evidence.confidence == existing.confidence
                        && evidence.kind.precedence() > existing.kind.precedence());
                if stronger {
                    existing.kind = evidence.kind;
                    existing.confidence = evidence.confidence;
                    existing.child = evidence.child.clone();
                    existing.parent = evidence.parent.clone();
                }
                existing.evidence.push(evidence);
            }
            None => {
                let relationship = Relationship {
                    left: key.0.clone(),
                    right: key.1.clone(),
                    kind: evidence.kind,
                    confidence: evidence.confidence,
                    child: evidence.child.clone(),
                    parent: evidence.parent.clone(),
                    cardinality: Cardinality::Unknown,
                    evidence: vec![evidence],
                };
                self.entries.insert(key, relationship);
            }
        }
    }

    /// Type every relationship from the profiles of its winning endpoints
    pub fn classify(&mut self, tables: &[Table]) {
        let by_name: BTreeMap<&str, &Table> = tables.iter().map(|t| (t.qualified_name.as_str(), t)).collect();
        for relationship in self.entries.values_mut() {
            relationship.cardinality = infer_cardinality(
                endpoint_profile(&by_name, &relationship.child),
                endpoint_profile(&by_name, &relationship.parent),
            );
        }
    }

    pub fn extend(&mut self, evidence: impl IntoIterator<Item = Evidence>) {
        for e in evidence {
            self.add(e);
        }
    }

    pub fn get(&self, a: &Endpoint, b: &Endpoint) -> Option<&Relationship> {
        self.entries.get(&canonical_pair(a, b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.entries.values()
    }

    /// Relationships in canonical order
    pub fn into_vec(self) -> Vec<Relationship> {
        self.entries.into_values().collect()
    }
}

impl FromIterator<Relationship> for RelationshipSet {
    fn from_iter<I: IntoIterator<Item = Relationship>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|r| ((r.left.clone(), r.right.clone()), r))
            .collect();
        Self { entries }
    }
}

/// Result of running every detector
#[derive(Debug, Default)]
pub struct Detection {
    pub relationships: RelationshipSet,
    pub failures: Vec<FailedUnit>,
}

/// Runs the three detectors over one data source's tables
pub struct RelationshipDetector<'a> {
    config: &'a DetectionConfig,
    sampler: &'a ColumnSampler<'a>,
    sample_timeout: Duration,
}

impl<'a> RelationshipDetector<'a> {
    /// `sample_timeout` bounds each overlap candidate's sampling
    pub fn new(config: &'a DetectionConfig, sampler: &'a ColumnSampler<'a>, sample_timeout: Duration) -> Self {
        Self {
            config,
            sampler,
            sample_timeout,
        }
    }

    pub async fn detect(&self, tables: &[Table]) -> Detection {
        let mut relationships = RelationshipSet::new();

        let declared = constraints::detect(tables);
        debug!(signals = declared.len(), "Constraint detector finished");
        relationships.extend(declared);

        let named = naming::detect(tables, self.config);
        debug!(signals = named.len(), "Naming detector finished");
        relationships.extend(named);

        let (overlapping, failures) = overlap::detect(tables, self.config, self.sampler, self.sample_timeout).await;
        debug!(signals = overlapping.len(), "Overlap detector finished");
        relationships.extend(overlapping);
        relationships.classify(tables);

        info!(
            tables = tables.len(),
            relationships = relationships.len(),
            "Relationship detection complete"
        );
        Detection {
            relationships,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{
        DistinctCount, EvidenceDetail, RelationshipKind, SamplingStrategy, SemanticPattern, TableDescriptor,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn stats(rows: u64, nulls: u64, distinct: u64) -> ProfileStats {
        ProfileStats {
            strategy: SamplingStrategy::Full,
            rows_examined: rows,
            null_count: nulls,
            null_ratio: nulls as f64 / rows as f64,
            distinct: DistinctCount::Exact { value: distinct },
            min: None,
            max: None,
            top_values: Vec::new(),
            pattern: SemanticPattern::Unclassified,
            ambiguous_patterns: Vec::new(),
        }
    }

    fn evidence(kind: RelationshipKind, confidence: f64, child: Endpoint, parent: Endpoint) -> Evidence {
        let detail = match kind {
            RelationshipKind::ForeignKey => EvidenceDetail::Constraint { constraint: None },
            RelationshipKind::NamingMatch => EvidenceDetail::Naming {
                rule: "singular_id".into(),
                type_compatible: true,
                cardinality_plausible: false,
            },
            RelationshipKind::DataOverlap => EvidenceDetail::Overlap {
                containment: confidence,
                child_sample: 10,
                parent_sample: 10,
                name_similarity: 0.5,
            },
        };
        Evidence {
            kind,
            confidence,
            child,
            parent,
            detail,
        }
    }

    #[test]
    fn test_merge_keeps_max_and_all_evidence() {
        let customers_id = Endpoint::new("shop.public.customers", "id");
        let orders_customer = Endpoint::new("shop.public.orders", "customer_id");

        let mut set = RelationshipSet::new();
        set.add(evidence(RelationshipKind::NamingMatch, 0.6, customers_id.clone(), orders_customer.clone()));
        set.add(evidence(RelationshipKind::DataOverlap, 0.8, orders_customer.clone(), customers_id.clone()));

        assert_eq!(set.len(), 1);
        let rel = set.get(&customers_id, &orders_customer).unwrap();
        assert_eq!(rel.confidence, 0.8);
        assert_eq!(rel.kind, RelationshipKind::DataOverlap);
        assert_eq!(rel.evidence.len(), 2);
        assert!(rel.has_evidence_of(RelationshipKind::NamingMatch));
        assert!(rel.has_evidence_of(RelationshipKind::DataOverlap));
    }

    #[test]
    fn test_weaker_signal_never_lowers_confidence() {
        let parent = Endpoint::new("db.s.customers", "id");
        let child = Endpoint::new("db.s.orders", "customer_id");

        let mut set = RelationshipSet::new();
        set.add(evidence(RelationshipKind::ForeignKey, 1.0, child.clone(), parent.clone()));
        set.add(evidence(RelationshipKind::DataOverlap, 0.31, child.clone(), parent.clone()));
        set.add(evidence(RelationshipKind::NamingMatch, 1.0, child.clone(), parent.clone()));

        let rel = set.get(&parent, &child).unwrap();
        assert_eq!(rel.kind, RelationshipKind::ForeignKey);
        assert_eq!(rel.confidence, 1.0);
        assert_eq!(rel.evidence.len(), 3);
        assert_eq!(rel.child, child);
    }

    #[test]
    fn test_canonical_pair_is_order_independent() {
        let a = Endpoint::new("db.s.a", "x");
        let b = Endpoint::new("db.s.b", "y");
        assert_eq!(canonical_pair(&a, &b), canonical_pair(&b, &a));
        assert_eq!(canonical_pair(&b, &a).0, a);
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.6 - 0.3), 0.3);
        assert_eq!(round_confidence(1.7), 1.0);
        assert_eq!(round_confidence(0.94999), 0.95);
    }

    #[test]
    fn test_key_column() {
        let mut customers = Table::new("shop", "shop", &crate::catalog::types::TableDescriptor {
            schema: "public".into(),
            name: "customers".into(),
            estimated_rows: Some(3),
        });
        customers.add_column(Column::new("name", "text"));
        customers.add_column(Column::new("customer_id", "integer"));
        assert_eq!(key_column(&customers).map(|c| c.name.as_str()), Some("customer_id"));

        customers.add_column(Column::new("id", "integer"));
        assert_eq!(key_column(&customers).map(|c| c.name.as_str()), Some("id"));

        customers.add_column(Column::new("code", "text").primary_key(true));
        assert_eq!(key_column(&customers).map(|c| c.name.as_str()), Some("code"));
    }

    #[rstest]
    #[case(Some(stats(100, 0, 40)), Some(stats(40, 0, 40)), Cardinality::ManyToOne)]
    #[case(Some(stats(40, 0, 40)), Some(stats(40, 0, 40)), Cardinality::OneToOne)]
    // Nulls do not count against a unique child
    #[case(Some(stats(100, 60, 40)), Some(stats(40, 0, 40)), Cardinality::OneToOne)]
    #[case(Some(stats(40, 0, 40)), Some(stats(100, 0, 10)), Cardinality::OneToMany)]
    #[case(Some(stats(100, 0, 10)), Some(stats(100, 0, 10)), Cardinality::Unknown)]
    #[case(None, Some(stats(40, 0, 40)), Cardinality::Unknown)]
    #[case(Some(stats(10, 10, 0)), Some(stats(40, 0, 40)), Cardinality::Unknown)]
    fn test_infer_cardinality(
        #[case] child: Option<ProfileStats>,
        #[case] parent: Option<ProfileStats>,
        #[case] expected: Cardinality,
    ) {
        assert_eq!(infer_cardinality(child.as_ref(), parent.as_ref()), expected);
    }

    #[test]
    fn test_classify_follows_winning_orientation() {
        let descriptor = |name: &str| TableDescriptor {
            schema: "public".into(),
            name: name.into(),
            estimated_rows: Some(100),
        };
        let mut customers = Table::new("shop", "shop", &descriptor("customers"));
        let mut id = Column::new("id", "integer").primary_key(true);
        id.profile = Some(stats(40, 0, 40));
        customers.add_column(id);
        let mut orders = Table::new("shop", "shop", &descriptor("orders"));
        let mut customer_id = Column::new("customer_id", "integer");
        customer_id.profile = Some(stats(100, 0, 35));
        orders.add_column(customer_id);

        let parent = Endpoint::new("shop.public.customers", "id");
        let child = Endpoint::new("shop.public.orders", "customer_id");
        let mut set = RelationshipSet::new();
        set.add(evidence(RelationshipKind::ForeignKey, 1.0, child.clone(), parent.clone()));
        assert_eq!(set.get(&parent, &child).unwrap().cardinality, Cardinality::Unknown);

        set.classify(&[customers, orders]);
        assert_eq!(set.get(&parent, &child).unwrap().cardinality, Cardinality::ManyToOne);
    }
}
