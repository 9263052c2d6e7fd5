//! Column profiling
//!
//! Statistics are computed from a `ColumnSample`: the whole column under a
//! full scan, an engine-side random sample otherwise.

pub mod patterns;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::types::{
    Column, ColumnStatus, DistinctCount, EstimateBasis, ProfileStats, SamplingStrategy, Table,
    TypeFamily, ValueFrequency,
};
use crate::config::ProfilingConfig;
use crate::error::{Error, FailedUnit, Result, UnitRef};
use crate::relationships::overlap::OverlapScope;
use crate::sampling::{ColumnSample, ColumnSampler};

use patterns::{classify, PatternInput};

/// Guaranteed-error-bound estimator of the number of distinct values:
/// `sqrt(N/n) * f1 + sum(f_j, j >= 2)`
fn gee_estimate(frequencies: &BTreeMap<&str, u64>, sample_rows: u64, population_rows: u64) -> u64 {
    let singletons = frequencies.values().filter(|&&n| n == 1).count() as f64;
    let repeated = frequencies.values().filter(|&&n| n > 1).count() as f64;
    let scale = if sample_rows == 0 {
        1.0
    } else {
        (population_rows as f64 / sample_rows as f64).max(1.0).sqrt()
    };
    let estimate = (scale * singletons + repeated).round() as u64;
    estimate.clamp(frequencies.len() as u64, population_rows.max(frequencies.len() as u64))
}

fn compare_values(a: &str, b: &str, numeric: bool) -> Ordering {
    if numeric {
        if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            if let Some(order) = x.partial_cmp(&y) {
                return order.then_with(|| a.cmp(b));
            }
        }
    }
    a.cmp(b)
}

fn min_max(values: &[&str], family: TypeFamily) -> (Option<String>, Option<String>) {
    if !family.is_orderable() {
        return (None, None);
    }
    // Mixed content falls back to text order
    let numeric = family.is_numeric() && values.iter().all(|v| v.trim().parse::<f64>().is_ok());
    let min = values.iter().min_by(|a, b| compare_values(a, b, numeric));
    let max = values.iter().max_by(|a, b| compare_values(a, b, numeric));
    (min.map(|v| v.to_string()), max.map(|v| v.to_string()))
}

/// Compute statistics for one column from its sample
pub fn compute_stats(sample: &ColumnSample, column: &Column, config: &ProfilingConfig) -> ProfileStats {
    let rows = sample.rows();
    let non_null: Vec<&str> = sample.values.iter().flatten().map(String::as_str).collect();
    let null_count = rows - non_null.len() as u64;
    let null_ratio = if rows == 0 { 0.0 } else { null_count as f64 / rows as f64 };

    let mut frequencies: BTreeMap<&str, u64> = BTreeMap::new();
    for &value in &non_null {
        *frequencies.entry(value).or_insert(0) += 1;
    }
    let observed = frequencies.len() as u64;

    let distinct = match sample.plan.strategy {
        SamplingStrategy::Full => DistinctCount::Exact { value: observed },
        SamplingStrategy::RandomSample => {
            let population = sample.population_rows.unwrap_or(rows);
            DistinctCount::Estimated {
                value: gee_estimate(&frequencies, rows, population),
                basis: EstimateBasis {
                    sample_rows: rows,
                    population_rows: sample.population_rows,
                    method: "gee".to_string(),
                },
            }
        }
    };

    let family = column.family();
    let (min, max) = min_max(&non_null, family);

    let mut top_values: Vec<ValueFrequency> = frequencies
        .iter()
        .map(|(value, count)| ValueFrequency {
            value: value.to_string(),
            count: *count,
        })
        .collect();
    // BTreeMap order already breaks count ties by value
    top_values.sort_by(|a, b| b.count.cmp(&a.count));
    top_values.truncate(config.top_k);

    let classification = classify(&PatternInput {
        values: &non_null,
        distinct: observed,
        family,
        is_primary_key: column.is_primary_key,
        enumeration_max_distinct: config.enumeration_max_distinct,
    });
    if !classification.ambiguous.is_empty() {
        debug!(
            column = %column.name,
            pattern = ?classification.pattern,
            also_matched = ?classification.ambiguous,
            "Ambiguous pattern match"
        );
    }

    ProfileStats {
        strategy: sample.plan.strategy,
        rows_examined: rows,
        null_count,
        null_ratio,
        distinct,
        min,
        max,
        top_values,
        pattern: classification.pattern,
        ambiguous_patterns: classification.ambiguous,
    }
}

/// Profiles the columns of one table through the shared sample cache
pub struct DataProfiler<'a> {
    sampler: &'a ColumnSampler<'a>,
    config: &'a ProfilingConfig,
}

impl<'a> DataProfiler<'a> {
    pub fn new(sampler: &'a ColumnSampler<'a>, config: &'a ProfilingConfig) -> Self {
        Self { sampler, config }
    }

    async fn profile_column(&self, table: &Table, column: &Column) -> Result<ProfileStats> {
        let seconds = self.config.column_timeout_seconds;
        let sample = tokio::time::timeout(
            Duration::from_secs(seconds),
            self.sampler.sample(table, &column.name),
        )
        .await
        .map_err(|_| Error::ProfilingTimeout {
            column: format!("{}.{}", table.qualified_name, column.name),
            seconds,
        })??;
        Ok(compute_stats(&sample, column, self.config))
    }

    /// Profile every active column. A failing column keeps its metadata,
    /// loses its statistics and is reported; its siblings carry on.
    ///
    /// Samples outside `scope` are released once their statistics are in.
    pub async fn profile_table(&self, table: &mut Table, scope: &OverlapScope) -> Vec<FailedUnit> {
        let mut failures = Vec::new();

        for idx in 0..table.columns.len() {
            if table.columns[idx].status != ColumnStatus::Active {
                continue;
            }
            let result = self.profile_column(table, &table.columns[idx]).await;
            if !scope.retains(table, &table.columns[idx]) {
                self.sampler.release(table, &table.columns[idx].name);
            }
            let column = &mut table.columns[idx];
            match result {
                Ok(stats) => column.profile = Some(stats),
                Err(error) => {
                    warn!(
                        table = %table.qualified_name,
                        column = %column.name,
                        error = %error,
                        "Profiling failed, keeping metadata only"
                    );
                    column.profile = None;
                    failures.push(FailedUnit::new(
                        UnitRef::Column {
                            table: table.qualified_name.clone(),
                            column: column.name.clone(),
                        },
                        &error,
                    ));
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::SemanticPattern;
    use crate::sampling::SamplingPlan;
    use pretty_assertions::assert_eq;

    fn sample(strategy: SamplingStrategy, population: Option<u64>, values: &[Option<&str>]) -> ColumnSample {
        ColumnSample {
            plan: SamplingPlan {
                strategy,
                limit: None,
            },
            population_rows: population,
            values: values.iter().map(|v| v.map(str::to_string)).collect(),
        }
    }

    #[test]
    fn test_full_scan_stats() {
        let column = Column::new("status", "varchar(10)");
        let s = sample(
            SamplingStrategy::Full,
            Some(6),
            &[Some("open"), Some("closed"), Some("open"), None, Some("open"), Some("closed")],
        );
        let stats = compute_stats(&s, &column, &ProfilingConfig::default());

        assert_eq!(stats.rows_examined, 6);
        assert_eq!(stats.null_count, 1);
        assert!((stats.null_ratio - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(stats.distinct, DistinctCount::Exact { value: 2 });
        assert_eq!(stats.min.as_deref(), Some("closed"));
        assert_eq!(stats.max.as_deref(), Some("open"));
        assert_eq!(
            stats.top_values,
            vec![
                ValueFrequency { value: "open".into(), count: 3 },
                ValueFrequency { value: "closed".into(), count: 2 },
            ]
        );
        assert_eq!(stats.pattern, SemanticPattern::Enumeration);
    }

    #[test]
    fn test_numeric_min_max() {
        let column = Column::new("amount", "integer");
        let s = sample(SamplingStrategy::Full, Some(3), &[Some("9"), Some("10"), Some("-2")]);
        let stats = compute_stats(&s, &column, &ProfilingConfig::default());
        assert_eq!(stats.min.as_deref(), Some("-2"));
        assert_eq!(stats.max.as_deref(), Some("10"));
    }

    #[test]
    fn test_unorderable_has_no_min_max() {
        let column = Column::new("active", "boolean");
        let s = sample(SamplingStrategy::Full, Some(2), &[Some("true"), Some("false")]);
        let stats = compute_stats(&s, &column, &ProfilingConfig::default());
        assert_eq!(stats.min, None);
        assert_eq!(stats.max, None);
    }

    #[test]
    fn test_top_k_ties_break_by_value() {
        let column = Column::new("code", "text");
        let config = ProfilingConfig {
            top_k: 2,
            ..ProfilingConfig::default()
        };
        let s = sample(SamplingStrategy::Full, Some(3), &[Some("c"), Some("b"), Some("a")]);
        let stats = compute_stats(&s, &column, &config);
        let values: Vec<_> = stats.top_values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_sampled_distinct_is_estimated() {
        let column = Column::new("email", "text");
        let s = sample(
            SamplingStrategy::RandomSample,
            Some(400),
            &[Some("a@x.io"), Some("b@x.io"), Some("c@x.io"), Some("c@x.io")],
        );
        let stats = compute_stats(&s, &column, &ProfilingConfig::default());

        // sqrt(400 / 4) * 2 singletons + 1 repeated value
        match stats.distinct {
            DistinctCount::Estimated { value, basis } => {
                assert_eq!(value, 21);
                assert_eq!(basis.sample_rows, 4);
                assert_eq!(basis.population_rows, Some(400));
                assert_eq!(basis.method, "gee");
            }
            other => panic!("expected an estimate, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_sample() {
        let column = Column::new("notes", "text");
        let s = sample(SamplingStrategy::Full, Some(0), &[]);
        let stats = compute_stats(&s, &column, &ProfilingConfig::default());
        assert_eq!(stats.null_ratio, 0.0);
        assert_eq!(stats.distinct.value(), 0);
        assert_eq!(stats.pattern, SemanticPattern::Unclassified);
    }

    #[tokio::test]
    async fn test_samples_outside_overlap_scope_are_released() {
        use crate::catalog::types::TableDescriptor;
        use crate::config::DetectionConfig;
        use crate::db::testing::StaticConnector;
        use crate::sampling::SampleCache;

        let connector = StaticConnector::default()
            .with("customers", "id", &["1", "2", "3"])
            .with("customers", "name", &["Ada", "Grace", "Edsger"]);
        let cache = SampleCache::new();
        let sampler = ColumnSampler::new(&connector, &cache, 100_000, 10_000);
        let config = ProfilingConfig::default();
        let profiler = DataProfiler::new(&sampler, &config);

        let mut customers = Table::new(
            "shop",
            "shop",
            &TableDescriptor { schema: "main".into(), name: "customers".into(), estimated_rows: Some(3) },
        );
        customers.add_column(Column::new("id", "integer").primary_key(true));
        customers.add_column(Column::new("name", "text"));
        customers.add_column(Column::new("missing", "text"));

        let scope = OverlapScope::new(
            [("shop.main.customers".to_string(), "customers".to_string())],
            &DetectionConfig::default(),
        );
        let failures = profiler.profile_table(&mut customers, &scope).await;
        assert_eq!(failures.len(), 1);
        assert!(customers.column("name").unwrap().profile.is_some());
        assert!(customers.column("missing").unwrap().profile.is_none());

        assert!(cache.cached("shop.main.customers", "id").is_some());
        assert!(cache.cached("shop.main.customers", "name").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.fetch_count(), 3);
    }
}
