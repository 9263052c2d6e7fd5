//! Schema discovery
//!
//! One run per data source: list the filtered tables, then process each one
//! end-to-end (columns, foreign keys, profile, upsert) on a bounded pool of
//! workers. Cancellation is checked before a worker picks up a table, so
//! in-flight tables always finish and are persisted.

pub mod filter;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::store::CatalogStore;
use crate::catalog::types::{Column, DataSource, Table, TableDescriptor};
use crate::config::DetectionConfig;
use crate::db::{Connector, TableListing};
use crate::error::{FailedUnit, Result, UnitRef};
use crate::profiling::DataProfiler;
use crate::progress::{ProgressCounts, ProgressEvent, ProgressSink, ProgressTracker};
use crate::relationships::overlap::OverlapScope;

pub use filter::DiscoveryFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Outcome of a run: what was processed, what was skipped and every unit
/// that failed along the way
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub data_source: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Tables processed by this run, in completion order
    pub tables_processed: Vec<String>,
    /// Tables skipped because an earlier, unfinished run completed them
    pub tables_skipped: Vec<String>,
    pub failures: Vec<FailedUnit>,
    /// Size of the relationship set, zero when the run was cancelled
    pub relationships: usize,
    pub counts: ProgressCounts,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Cancelled || !self.failures.is_empty()
    }
}

enum TableOutcome {
    Completed { table: String, failures: Vec<FailedUnit> },
    Failed(FailedUnit),
    NotStarted,
}

/// Drives the table phase of a discovery run
pub struct SchemaDiscoverer<'a> {
    source: &'a DataSource,
    connector: &'a dyn Connector,
    store: &'a dyn CatalogStore,
    profiler: &'a DataProfiler<'a>,
    detection: &'a DetectionConfig,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

impl<'a> SchemaDiscoverer<'a> {
    pub fn new(
        source: &'a DataSource,
        connector: &'a dyn Connector,
        store: &'a dyn CatalogStore,
        profiler: &'a DataProfiler<'a>,
        detection: &'a DetectionConfig,
        sink: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            source,
            connector,
            store,
            profiler,
            detection,
            sink,
            cancel,
        }
    }

    /// Discover every table that passes the filter. With `resume`, tables
    /// checkpointed by an unfinished run are skipped; otherwise the
    /// checkpoint is discarded first.
    ///
    /// Connector failures are recorded against their unit; only the store
    /// can fail the call. The returned report has no relationship count yet.
    pub async fn discover(&self, resume: bool) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let checkpoint = if resume {
            self.store.checkpoint(&self.source.name).await?
        } else {
            self.store.clear_checkpoint(&self.source.name).await?;
            BTreeSet::new()
        };

        let listing = match self.connector.list_tables(&self.source.filter).await {
            Ok(listing) => listing,
            Err(error) => {
                warn!(source = %self.source.name, error = %error, "Could not enumerate schemas");
                let unit = UnitRef::Schema {
                    schema: self.connector.database_name().to_string(),
                };
                TableListing {
                    tables: Vec::new(),
                    failures: vec![FailedUnit::new(unit, &error)],
                }
            }
        };
        let mut failures = listing.failures;

        // Relationship detection later reads every stored table, listed or not
        let mut known: Vec<(String, String)> = self
            .store
            .tables(&self.source.name)
            .await?
            .into_iter()
            .map(|t| (t.qualified_name, t.name))
            .collect();
        known.extend(listing.tables.iter().map(|d| (self.qualified_name(d), d.name.clone())));
        known.sort();
        known.dedup();
        let scope = OverlapScope::new(known, self.detection);

        let (skipped, pending): (Vec<TableDescriptor>, Vec<TableDescriptor>) =
            listing.tables.into_iter().partition(|descriptor| {
                checkpoint.contains(&self.qualified_name(descriptor))
            });
        let tables_skipped: Vec<String> = skipped.iter().map(|d| self.qualified_name(d)).collect();

        info!(
            run = %run_id,
            source = %self.source.name,
            tables = pending.len(),
            skipped = tables_skipped.len(),
            concurrency = self.source.concurrency,
            "Starting discovery"
        );

        let tracker = ProgressTracker::new(pending.len() + tables_skipped.len(), tables_skipped.len());
        let outcomes: Vec<TableOutcome> = stream::iter(pending.iter())
            .map(|descriptor| self.process(descriptor, &tracker, &scope))
            .buffer_unordered(self.source.concurrency)
            .collect()
            .await;

        let mut tables_processed = Vec::new();
        for outcome in outcomes {
            match outcome {
                TableOutcome::Completed { table, failures: column_failures } => {
                    tables_processed.push(table);
                    failures.extend(column_failures);
                }
                TableOutcome::Failed(failure) => failures.push(failure),
                TableOutcome::NotStarted => {}
            }
        }

        let status = if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        Ok(RunReport {
            run_id,
            data_source: self.source.name.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            tables_processed,
            tables_skipped,
            failures,
            relationships: 0,
            counts: tracker.counts(),
        })
    }

    fn qualified_name(&self, descriptor: &TableDescriptor) -> String {
        crate::catalog::types::qualified_name(
            self.connector.database_name(),
            &descriptor.schema,
            &descriptor.name,
        )
    }

    async fn process(&self, descriptor: &TableDescriptor, tracker: &ProgressTracker, scope: &OverlapScope) -> TableOutcome {
        if self.cancel.is_cancelled() {
            return TableOutcome::NotStarted;
        }

        let name = self.qualified_name(descriptor);
        self.sink.emit(ProgressEvent::TableStarted {
            table: name.clone(),
            counts: tracker.counts(),
        });

        match self.discover_table(descriptor, scope).await {
            Ok(column_failures) => {
                debug!(table = %name, degraded_columns = column_failures.len(), "Table discovered");
                self.sink.emit(ProgressEvent::TableCompleted {
                    table: name.clone(),
                    counts: tracker.record_completed(),
                });
                TableOutcome::Completed {
                    table: name,
                    failures: column_failures,
                }
            }
            Err(error) => {
                let error = error.in_schema(&descriptor.schema);
                warn!(table = %name, error = %error, "Table failed");
                self.sink.emit(ProgressEvent::TableFailed {
                    table: name.clone(),
                    reason: error.to_string(),
                    counts: tracker.record_failed(),
                });
                TableOutcome::Failed(FailedUnit::new(UnitRef::Table { table: name }, &error))
            }
        }
    }

    /// Columns, constraints and profile of one table, persisted and then
    /// checkpointed. Column profiling failures degrade the column only.
    async fn discover_table(&self, descriptor: &TableDescriptor, scope: &OverlapScope) -> Result<Vec<FailedUnit>> {
        let mut table = Table::new(&self.source.name, self.connector.database_name(), descriptor);

        for column in self.connector.list_columns(descriptor).await? {
            table.add_column(Column::from(column));
        }
        table.foreign_keys = self.connector.fetch_foreign_keys(descriptor).await?;

        let failures = self.profiler.profile_table(&mut table, scope).await;

        let qualified = table.qualified_name.clone();
        let outcome = self.store.upsert_table(table).await?;
        debug!(
            table = %qualified,
            created = outcome.created,
            added = outcome.added,
            changed = outcome.changed,
            removed = outcome.removed,
            "Table upserted"
        );
        self.store.mark_checkpoint(&self.source.name, &qualified).await?;

        Ok(failures)
    }
}
