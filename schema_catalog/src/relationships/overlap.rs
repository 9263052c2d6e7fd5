//! Relationships backed by overlapping sampled values
//!
//! Only pairs that pass a cheap prefilter are sampled: the child is not a key
//! column, the parent is its table's key column, the declared types are
//! compatible and the child's name resembles the parent entity.
//!
//! Profiling keeps only the samples [`OverlapScope`] says this pass can read.
//! Parent key samples stay cached across candidates; a child's sample is
//! released once all of its candidates are scored.

use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::types::{
    types_compatible, Column, Endpoint, Evidence, EvidenceDetail, RelationshipKind, Table, TypeFamily,
};
use crate::config::DetectionConfig;
use crate::error::{Error, FailedUnit, Result, UnitRef};
use crate::sampling::{ColumnSample, ColumnSampler};
use crate::utils::naming::{name_similarity, singularize, split_into_words};

use super::{is_key_column, key_column, round_confidence, thresholds};

/// How closely a child column name points at a parent table's key
pub fn candidate_similarity(child_column: &str, parent_table: &str, parent_column: &str) -> f64 {
    let entity = singularize(parent_table).to_lowercase();
    let child = child_column.to_lowercase();

    let full = name_similarity(&child, &format!("{}_{}", entity, parent_column.to_lowercase()));
    let bare = name_similarity(&child, &entity);
    let prefix = if split_into_words(&child)
        .iter()
        .any(|token| token.len() >= thresholds::MIN_PREFIX_TOKEN_LEN && entity.starts_with(token.as_str()))
    {
        thresholds::TOKEN_PREFIX_SIMILARITY
    } else {
        0.0
    };

    full.max(bare).max(prefix)
}

/// |child ∩ parent| / |child| over distinct non-null sampled values, in [0, 1].
/// `None` when the child sample has no values.
pub fn containment(child: &ColumnSample, parent: &ColumnSample) -> Option<f64> {
    let child_values = child.distinct_non_null();
    if child_values.is_empty() {
        return None;
    }
    let parent_values = parent.distinct_non_null();
    let shared = child_values.iter().filter(|v| parent_values.contains(*v)).count();
    Some(shared as f64 / child_values.len() as f64)
}

fn comparable(column: &Column) -> bool {
    !matches!(
        column.family(),
        TypeFamily::Boolean | TypeFamily::Binary | TypeFamily::Other
    )
}

/// Every table the overlap pass will see, known before any is profiled
pub struct OverlapScope {
    /// `(qualified name, table name)`
    tables: Vec<(String, String)>,
    threshold: f64,
}

impl OverlapScope {
    pub fn new(tables: impl IntoIterator<Item = (String, String)>, config: &DetectionConfig) -> Self {
        Self {
            tables: tables.into_iter().collect(),
            threshold: config.name_similarity_threshold,
        }
    }

    /// Whether the overlap pass may read this column's sample: its table's
    /// key, or a comparable non-key column whose name resembles another
    /// table's `id` or `<singular>_id` key
    pub fn retains(&self, table: &Table, column: &Column) -> bool {
        if is_key_column(table, column) {
            return true;
        }
        if !comparable(column) {
            return false;
        }
        self.tables
            .iter()
            .filter(|(qualified, _)| *qualified != table.qualified_name)
            .any(|(_, name)| {
                let own_id = format!("{}_id", singularize(name));
                ["id", own_id.as_str()]
                    .iter()
                    .any(|key| candidate_similarity(&column.name, name, key) >= self.threshold)
            })
    }
}

struct Candidate<'t> {
    child_table: &'t Table,
    child: &'t Column,
    parent_table: &'t Table,
    parent: &'t Column,
    similarity: f64,
}

fn candidates<'t>(tables: &'t [Table], config: &DetectionConfig) -> Vec<Candidate<'t>> {
    let mut found = Vec::new();

    for child_table in tables {
        for child in child_table.active_columns() {
            if !comparable(child) || is_key_column(child_table, child) {
                continue;
            }
            for parent_table in tables {
                if parent_table.qualified_name == child_table.qualified_name {
                    continue;
                }
                let Some(parent) = key_column(parent_table) else {
                    continue;
                };
                if !types_compatible(&child.data_type, &parent.data_type) {
                    continue;
                }
                let similarity = candidate_similarity(&child.name, &parent_table.name, &parent.name);
                if similarity < config.name_similarity_threshold {
                    continue;
                }
                found.push(Candidate {
                    child_table,
                    child,
                    parent_table,
                    parent,
                    similarity,
                });
            }
        }
    }

    found
}

impl Candidate<'_> {
    fn same_child(&self, other: &Candidate<'_>) -> bool {
        self.child_table.qualified_name == other.child_table.qualified_name && self.child.name == other.child.name
    }
}

async fn evaluate(candidate: &Candidate<'_>, sampler: &ColumnSampler<'_>) -> Result<Option<(f64, u64, u64)>> {
    let child = sampler.sample(candidate.child_table, &candidate.child.name).await?;
    let parent = sampler.sample(candidate.parent_table, &candidate.parent.name).await?;
    Ok(containment(&child, &parent).map(|c| (c, child.rows(), parent.rows())))
}

/// Score every prefiltered pair by containment; pairs below the minimum are
/// dropped. Sampling for one pair is bounded by `timeout`.
pub async fn detect(
    tables: &[Table],
    config: &DetectionConfig,
    sampler: &ColumnSampler<'_>,
    timeout: Duration,
) -> (Vec<Evidence>, Vec<FailedUnit>) {
    let mut signals = Vec::new();
    let mut failures = Vec::new();

    let found = candidates(tables, config);
    for (idx, candidate) in found.iter().enumerate() {
        let child_endpoint = Endpoint::new(&candidate.child_table.qualified_name, &candidate.child.name);
        let parent_endpoint = Endpoint::new(&candidate.parent_table.qualified_name, &candidate.parent.name);

        let measured = tokio::time::timeout(timeout, evaluate(candidate, sampler))
            .await
            .unwrap_or_else(|_| {
                Err(Error::ProfilingTimeout {
                    column: child_endpoint.to_string(),
                    seconds: timeout.as_secs(),
                })
            });
        // Candidates of one child are adjacent
        if found.get(idx + 1).map_or(true, |next| !candidate.same_child(next)) {
            sampler.release(candidate.child_table, &candidate.child.name);
        }

        match measured {
            Ok(Some((ratio, child_sample, parent_sample))) => {
                let confidence = round_confidence(ratio);
                debug!(child = %child_endpoint, parent = %parent_endpoint, containment = ratio, "Overlap measured");
                if confidence < config.overlap_min_containment {
                    continue;
                }
                signals.push(Evidence {
                    kind: RelationshipKind::DataOverlap,
                    confidence,
                    child: child_endpoint,
                    parent: parent_endpoint,
                    detail: EvidenceDetail::Overlap {
                        containment: ratio,
                        child_sample,
                        parent_sample,
                        name_similarity: round_confidence(candidate.similarity),
                    },
                });
            }
            Ok(None) => {}
            Err(error) => {
                warn!(child = %child_endpoint, parent = %parent_endpoint, error = %error, "Overlap sampling failed");
                let unit = UnitRef::Column {
                    table: candidate.child_table.qualified_name.clone(),
                    column: candidate.child.name.clone(),
                };
                if !failures.iter().any(|f: &FailedUnit| f.unit == unit) {
                    failures.push(FailedUnit::new(unit, &error));
                }
            }
        }
    }

    (signals, failures)
}
