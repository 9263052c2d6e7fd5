//! Include/exclude filtering of schemas and tables

use glob::Pattern;
use regex::Regex;

use crate::error::{Error, Result};

/// Compiled schema globs and table-name regexes. Exclusion always wins.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    include_schemas: Vec<Pattern>,
    exclude_schemas: Vec<Pattern>,
    include_tables: Vec<Regex>,
    exclude_tables: Vec<Regex>,
}

impl DiscoveryFilter {
    pub fn new(
        include_schemas: &[String],
        exclude_schemas: &[String],
        include_tables: &[String],
        exclude_tables: &[String],
    ) -> Result<Self> {
        Ok(Self {
            include_schemas: compile_globs(include_schemas)?,
            exclude_schemas: compile_globs(exclude_schemas)?,
            include_tables: compile_regexes(include_tables)?,
            exclude_tables: compile_regexes(exclude_tables)?,
        })
    }

    /// Whether a schema survives the include/exclude globs
    pub fn allows_schema(&self, schema: &str) -> bool {
        if self.exclude_schemas.iter().any(|p| p.matches(schema)) {
            return false;
        }
        self.include_schemas.is_empty() || self.include_schemas.iter().any(|p| p.matches(schema))
    }

    /// Whether a bare table name survives the include/exclude regexes
    pub fn allows_table(&self, table: &str) -> bool {
        if self.exclude_tables.iter().any(|r| r.is_match(table)) {
            return false;
        }
        self.include_tables.is_empty() || self.include_tables.iter().any(|r| r.is_match(table))
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::Config(format!("Invalid schema pattern '{}': {}", p, e)))
        })
        .collect()
}

fn compile_regexes(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| Error::Config(format!("Invalid table pattern '{}': {}", p, e))))
        .collect()
}
