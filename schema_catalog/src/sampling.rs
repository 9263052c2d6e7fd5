//! Sampling plans and the run-scoped, single-flight sample cache

use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::catalog::types::{SamplingStrategy, Table, TableDescriptor};
use crate::db::Connector;
use crate::error::{Error, Result};

/// How one column of a table is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    pub strategy: SamplingStrategy,
    /// Row bound; `None` under a full scan
    pub limit: Option<u64>,
}

impl SamplingPlan {
    /// Full scan below the cap, engine-side random sample at or above it.
    /// An unknown row count is treated as at or above the cap.
    pub fn choose(estimated_rows: Option<u64>, sample_cap: u64, sample_size: u64) -> Self {
        match estimated_rows {
            Some(rows) if rows < sample_cap => Self {
                strategy: SamplingStrategy::Full,
                limit: None,
            },
            rows => {
                let size = sample_size.min(sample_cap);
                Self {
                    strategy: SamplingStrategy::RandomSample,
                    limit: Some(rows.map_or(size, |r| size.min(r))),
                }
            }
        }
    }
}

/// Values read for one column
#[derive(Debug, Clone)]
pub struct ColumnSample {
    pub plan: SamplingPlan,
    pub population_rows: Option<u64>,
    pub values: Vec<Option<String>>,
}

impl ColumnSample {
    pub fn rows(&self) -> u64 {
        self.values.len() as u64
    }

    pub fn distinct_non_null(&self) -> HashSet<&str> {
        self.values.iter().flatten().map(String::as_str).collect()
    }
}

type CacheKey = (String, String);

/// Per-(table, column) samples shared by every worker of one run.
/// Concurrent requests for the same key wait on a single fetch.
#[derive(Default)]
pub struct SampleCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<ColumnSample>>>>>,
    fetches: AtomicUsize,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, table: &str, column: &str) -> Arc<OnceCell<Arc<ColumnSample>>> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            entries
                .entry((table.to_string(), column.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// Return the cached sample or run `fetch` once for the key. A failed
    /// fetch leaves the key empty so a later caller may retry.
    pub async fn get_or_fetch<F, Fut>(&self, table: &str, column: &str, fetch: F) -> Result<Arc<ColumnSample>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ColumnSample>>,
    {
        let cell = self.cell(table, column);
        let sample = cell
            .get_or_try_init(|| async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                fetch().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(sample))
    }

    /// Sample a column through the connector unless a sample is cached
    pub async fn sample(
        &self,
        connector: &dyn Connector,
        qualified_table: &str,
        table: &TableDescriptor,
        column: &str,
        plan: SamplingPlan,
    ) -> Result<Arc<ColumnSample>> {
        self.get_or_fetch(qualified_table, column, || async {
            debug!(table = %qualified_table, column = %column, strategy = ?plan.strategy, "Fetching sample");
            let values: Vec<Option<String>> = connector
                .sample_rows(table, column, plan.limit, plan.strategy)
                .try_collect()
                .await
                .map_err(|e| Error::Sampling {
                    column: format!("{}.{}", qualified_table, column),
                    reason: e.in_schema(&table.schema).to_string(),
                })?;
            Ok(ColumnSample {
                plan,
                population_rows: table.estimated_rows,
                values,
            })
        })
        .await
    }

    /// An already fetched sample, without triggering a fetch
    pub fn cached(&self, table: &str, column: &str) -> Option<Arc<ColumnSample>> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(&(table.to_string(), column.to_string()))
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop a key so its sample can be freed once current holders let go.
    /// A later request fetches again.
    pub fn evict(&self, table: &str, column: &str) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&(table.to_string(), column.to_string())).is_some()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches actually issued
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// Reads column samples for tables of one data source through the cache
pub struct ColumnSampler<'a> {
    connector: &'a dyn Connector,
    cache: &'a SampleCache,
    sample_cap: u64,
    sample_size: u64,
}

impl<'a> ColumnSampler<'a> {
    pub fn new(connector: &'a dyn Connector, cache: &'a SampleCache, sample_cap: u64, sample_size: u64) -> Self {
        Self {
            connector,
            cache,
            sample_cap,
            sample_size,
        }
    }

    pub fn plan_for(&self, table: &Table) -> SamplingPlan {
        SamplingPlan::choose(table.estimated_rows, self.sample_cap, self.sample_size)
    }

    pub async fn sample(&self, table: &Table, column: &str) -> Result<Arc<ColumnSample>> {
        let descriptor = table.descriptor();
        self.cache
            .sample(self.connector, &table.qualified_name, &descriptor, column, self.plan_for(table))
            .await
    }

    /// Stop caching a column's sample
    pub fn release(&self, table: &Table, column: &str) {
        if self.cache.evict(&table.qualified_name, column) {
            debug!(table = %table.qualified_name, column = %column, "Sample released");
        }
    }
}
