//! schema_catalog: discovery, profiling and relationship inference for database catalogs
//!
//! A run connects to one data source, discovers its tables and columns,
//! profiles every column from full scans or engine-side samples, and infers
//! a scored relationship graph from declared constraints, naming conventions
//! and overlapping data. The result feeds an ERD layout and the read-only
//! context handed to a description writer.

pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod diagram;
pub mod discovery;
pub mod error;
pub mod profiling;
pub mod progress;
pub mod relationships;
pub mod sampling;
pub mod utils;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

// Re-export main types for easier access
pub use catalog::{CatalogStore, DataSource, InMemoryStore, Relationship, Table};
pub use config::Config;
pub use context::TableContext;
pub use db::{Connector, EngineConnector};
pub use diagram::Diagram;
pub use discovery::{RunReport, RunStatus, SchemaDiscoverer};
pub use error::{Error, FailedUnit, Result};
pub use progress::{ProgressEvent, ProgressSink};

use profiling::DataProfiler;
use progress::NoProgress;
use relationships::RelationshipDetector;
use sampling::{ColumnSampler, SampleCache};

/// Initialize an engine with an in-memory store from the specified configuration file
pub fn init(config_path: &str) -> Result<CatalogEngine> {
    let config = config::load_from_file(config_path)?;
    CatalogEngine::new(config, Arc::new(InMemoryStore::new()))
}

/// Runs discovery for one data source and serves the derived views
pub struct CatalogEngine {
    config: Config,
    source: DataSource,
    store: Arc<dyn CatalogStore>,
    sink: Arc<dyn ProgressSink>,
}

impl CatalogEngine {
    /// Validate the data source section and build an engine over `store`
    pub fn new(config: Config, store: Arc<dyn CatalogStore>) -> Result<Self> {
        let source = DataSource::from_config(&config.data_source)?;
        Ok(Self {
            config,
            source,
            store,
            sink: Arc::new(NoProgress),
        })
    }

    /// Send progress events to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_source(&self) -> &DataSource {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Connect and run discovery. A failed connect is the only error that
    /// aborts a run before any work is done.
    pub async fn run(&self, resume: bool, cancel: &CancellationToken) -> Result<RunReport> {
        let connector = EngineConnector::connect(&self.source).await?;
        self.run_with(&connector, resume, cancel).await
    }

    /// Run discovery over an already connected engine.
    ///
    /// The sample cache lives for this call only. Relationships are detected
    /// over every stored table of the source once all tables are done, and
    /// the resume checkpoint is cleared. A cancelled run stops after the
    /// table phase and keeps its checkpoint.
    pub async fn run_with(
        &self,
        connector: &dyn Connector,
        resume: bool,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let cache = SampleCache::new();
        let sampler = ColumnSampler::new(connector, &cache, self.source.sample_cap, self.source.sample_size);
        let profiler = DataProfiler::new(&sampler, &self.config.profiling);

        let discoverer = SchemaDiscoverer::new(
            &self.source,
            connector,
            self.store.as_ref(),
            &profiler,
            &self.config.detection,
            self.sink.as_ref(),
            cancel,
        );
        let mut report = discoverer.discover(resume).await?;

        if report.status == RunStatus::Cancelled {
            info!(
                run = %report.run_id,
                source = %self.source.name,
                completed = report.tables_processed.len(),
                failures = report.failures.len(),
                "Discovery cancelled"
            );
            self.sink.emit(ProgressEvent::RunCancelled { counts: report.counts });
            return Ok(report);
        }

        let tables = self.store.tables(&self.source.name).await?;
        let sample_timeout = Duration::from_secs(self.config.profiling.column_timeout_seconds);
        let detection = RelationshipDetector::new(&self.config.detection, &sampler, sample_timeout)
            .detect(&tables)
            .await;
        report.failures.extend(detection.failures);
        report.relationships = detection.relationships.len();
        self.store
            .replace_relationships(&self.source.name, detection.relationships.into_vec())
            .await?;
        self.store.clear_checkpoint(&self.source.name).await?;
        report.finished_at = Utc::now();

        info!(
            run = %report.run_id,
            source = %self.source.name,
            processed = report.tables_processed.len(),
            skipped = report.tables_skipped.len(),
            relationships = report.relationships,
            failures = report.failures.len(),
            samples_fetched = cache.fetch_count(),
            "Discovery complete"
        );
        self.sink.emit(ProgressEvent::RunCompleted { counts: report.counts });
        Ok(report)
    }

    /// Diagram descriptor rebuilt from the current stored state
    pub async fn diagram(&self) -> Result<Diagram> {
        let tables = self.store.tables(&self.source.name).await?;
        let relationships = self.store.relationships(&self.source.name).await?;
        Ok(diagram::build(&tables, &relationships, &self.config.diagram))
    }

    /// Description-writer context for every stored table
    pub async fn context(&self) -> Result<Vec<TableContext>> {
        let tables = self.store.tables(&self.source.name).await?;
        let relationships = self.store.relationships(&self.source.name).await?;
        Ok(context::assemble(&tables, &relationships))
    }
}
