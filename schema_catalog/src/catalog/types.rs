//! Type definitions for catalog entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::DataSourceConfig;
use crate::discovery::filter::DiscoveryFilter;
use crate::error::{Error, Result};

/// The closed set of database engines a data source can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Postgres,
    Sqlite,
    SqlServer,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Sqlite => "sqlite",
            EngineKind::SqlServer => "sqlserver",
        }
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "sqlite" => Ok(EngineKind::Sqlite),
            "sqlserver" | "mssql" => Ok(EngineKind::SqlServer),
            other => Err(Error::UnsupportedEngine(other.to_string())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, frozen data source descriptor. Built once per run.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub engine: EngineKind,
    pub url: String,
    pub database: Option<String>,
    pub filter: DiscoveryFilter,
    pub sample_cap: u64,
    pub sample_size: u64,
    pub concurrency: usize,
    pub connect_timeout_seconds: u64,
}

impl DataSource {
    /// Validate a configuration section into a data source
    pub fn from_config(config: &DataSourceConfig) -> Result<Self> {
        let engine: EngineKind = config.engine.parse()?;

        if config.sample_size == 0 || config.sample_size > config.sample_cap {
            return Err(Error::Config(format!(
                "sample_size ({}) must be between 1 and sample_cap ({})",
                config.sample_size, config.sample_cap
            )));
        }
        if config.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        let filter = DiscoveryFilter::new(
            &config.include_schemas,
            &config.exclude_schemas,
            &config.include_tables,
            &config.exclude_tables,
        )?;

        Ok(Self {
            name: config.name.clone(),
            engine,
            url: config.url.clone(),
            database: config.database.clone(),
            filter,
            sample_cap: config.sample_cap,
            sample_size: config.sample_size,
            concurrency: config.concurrency,
            connect_timeout_seconds: config.connect_timeout_seconds,
        })
    }
}

/// Build a `database.schema.table` name
pub fn qualified_name(database: &str, schema: &str, table: &str) -> String {
    format!("{}.{}.{}", database, schema, table)
}

/// A table as listed by a connector, before its columns are enumerated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub estimated_rows: Option<u64>,
}

/// A column as listed by a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ordinal_position: i32,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_primary_key: bool,
}

/// A discovered table, upserted by qualified name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub qualified_name: String,
    pub data_source: String,
    pub database: String,
    pub schema: String,
    pub name: String,
    pub estimated_rows: Option<u64>,
    pub discovered_at: DateTime<Utc>,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Create a table from its descriptor
    pub fn new(data_source: &str, database: &str, descriptor: &TableDescriptor) -> Self {
        Self {
            qualified_name: qualified_name(database, &descriptor.schema, &descriptor.name),
            data_source: data_source.to_string(),
            database: database.to_string(),
            schema: descriptor.schema.clone(),
            name: descriptor.name.clone(),
            estimated_rows: descriptor.estimated_rows,
            discovered_at: Utc::now(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a column to the table
    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns still present in the source
    pub fn active_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.status == ColumnStatus::Active)
    }

    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor {
            schema: self.schema.clone(),
            name: self.name.clone(),
            estimated_rows: self.estimated_rows,
        }
    }
}

/// Whether a column still exists in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnStatus {
    Active,
    /// Missing from the latest pass; kept so earlier descriptions stay attached
    Removed,
}

/// A discovered column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ordinal_position: i32,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_primary_key: bool,
    pub status: ColumnStatus,
    /// Absent when profiling failed and the column degraded to metadata only
    pub profile: Option<ProfileStats>,
}

impl Column {
    /// Create a new column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            ordinal_position: 0,
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            is_primary_key: false,
            status: ColumnStatus::Active,
            profile: None,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn primary_key(mut self, is_primary_key: bool) -> Self {
        self.is_primary_key = is_primary_key;
        self
    }

    pub fn family(&self) -> TypeFamily {
        TypeFamily::from_declared(&self.data_type)
    }

    /// Same metadata, ignoring profile and status
    pub fn same_definition(&self, other: &Column) -> bool {
        self.ordinal_position == other.ordinal_position
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.default == other.default
            && self.is_primary_key == other.is_primary_key
    }
}

impl From<ColumnDescriptor> for Column {
    fn from(descriptor: ColumnDescriptor) -> Self {
        Self {
            name: descriptor.name,
            ordinal_position: descriptor.ordinal_position,
            data_type: descriptor.data_type,
            nullable: descriptor.nullable,
            default: descriptor.default,
            is_primary_key: descriptor.is_primary_key,
            status: ColumnStatus::Active,
            profile: None,
        }
    }
}

/// Represents a declared foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

impl ForeignKey {
    /// Column pairs `(local, referenced)` in constraint order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(self.ref_columns.iter())
            .map(|(c, r)| (c.as_str(), r.as_str()))
    }
}

/// Broad classes of declared column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Integer,
    Decimal,
    Text,
    Boolean,
    Temporal,
    Uuid,
    Binary,
    Other,
}

/// Integer type names, matched per whitespace-separated token
const INTEGER_TYPES: &[&str] = &[
    "int", "int2", "int4", "int8", "integer", "bigint", "smallint", "tinyint", "mediumint",
    "serial", "serial2", "serial4", "serial8", "smallserial", "bigserial",
];

const SPATIAL_TYPES: &[&str] = &[
    "point", "line", "lseg", "box", "path", "polygon", "circle", "geometry", "geography",
];

impl TypeFamily {
    /// Classify a declared type such as `character varying(40)` or `INT`
    pub fn from_declared(data_type: &str) -> Self {
        let t = data_type.to_lowercase();
        let base = t.split('(').next().unwrap_or("").trim();

        if base == "uuid" || base == "uniqueidentifier" {
            return TypeFamily::Uuid;
        }
        if base.contains("bool") || base == "bit" {
            return TypeFamily::Boolean;
        }
        if base.contains("date") || base.contains("time") || base == "interval" {
            return TypeFamily::Temporal;
        }
        if SPATIAL_TYPES.contains(&base) {
            return TypeFamily::Other;
        }
        if base.split_whitespace().any(|token| INTEGER_TYPES.contains(&token)) {
            return TypeFamily::Integer;
        }
        if ["numeric", "decimal", "real", "float", "double", "money"]
            .iter()
            .any(|n| base.contains(n))
        {
            return TypeFamily::Decimal;
        }
        if ["char", "text", "clob", "string", "citext", "xml", "json"]
            .iter()
            .any(|n| base.contains(n))
        {
            return TypeFamily::Text;
        }
        if base.contains("blob") || base.contains("binary") || base == "bytea" || base == "image" {
            return TypeFamily::Binary;
        }
        TypeFamily::Other
    }

    /// Whether min/max are meaningful for this family
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            TypeFamily::Integer
                | TypeFamily::Decimal
                | TypeFamily::Text
                | TypeFamily::Temporal
                | TypeFamily::Uuid
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeFamily::Integer | TypeFamily::Decimal)
    }
}

/// Whether two declared types can plausibly hold the same key values
pub fn types_compatible(left: &str, right: &str) -> bool {
    let (a, b) = (TypeFamily::from_declared(left), TypeFamily::from_declared(right));
    match (a, b) {
        (TypeFamily::Other, _) | (_, TypeFamily::Other) => {
            left.trim().eq_ignore_ascii_case(right.trim())
        }
        (x, y) if x == y => true,
        (x, y) if x.is_numeric() && y.is_numeric() => true,
        (TypeFamily::Uuid, TypeFamily::Text) | (TypeFamily::Text, TypeFamily::Uuid) => true,
        _ => false,
    }
}

/// How a column's values were read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    Full,
    RandomSample,
}

/// Basis of an estimated distinct count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateBasis {
    pub sample_rows: u64,
    pub population_rows: Option<u64>,
    pub method: String,
}

/// Distinct-value count, exact under a full scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DistinctCount {
    Exact { value: u64 },
    Estimated { value: u64, basis: EstimateBasis },
}

impl DistinctCount {
    pub fn value(&self) -> u64 {
        match self {
            DistinctCount::Exact { value } | DistinctCount::Estimated { value, .. } => *value,
        }
    }
}

/// A frequent value and how often it was seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFrequency {
    pub value: String,
    pub count: u64,
}

/// Semantic classification of a column's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticPattern {
    Email,
    Identifier,
    Date,
    Enumeration,
    FreeText,
    Unclassified,
}

/// Column statistics from one profiling pass; replaced wholesale on re-profiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub strategy: SamplingStrategy,
    pub rows_examined: u64,
    pub null_count: u64,
    pub null_ratio: f64,
    pub distinct: DistinctCount,
    pub min: Option<String>,
    pub max: Option<String>,
    pub top_values: Vec<ValueFrequency>,
    pub pattern: SemanticPattern,
    /// Other patterns whose rules also matched
    pub ambiguous_patterns: Vec<SemanticPattern>,
}

impl ProfileStats {
    /// Distinct non-null values over non-null rows, scaled to the table
    /// when the column was sampled. `None` without non-null rows.
    pub fn uniqueness(&self) -> Option<f64> {
        let rows = match &self.distinct {
            DistinctCount::Exact { .. } => self.rows_examined as f64,
            DistinctCount::Estimated { basis, .. } => {
                basis.population_rows.unwrap_or(self.rows_examined) as f64
            }
        };
        let non_null = rows * (1.0 - self.null_ratio);
        if non_null < 1.0 {
            return None;
        }
        Some((self.distinct.value() as f64 / non_null).min(1.0))
    }
}

/// One side of a relationship
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub table: String,
    pub column: String,
}

impl Endpoint {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Detector that produced a relationship signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ForeignKey,
    NamingMatch,
    DataOverlap,
}

impl RelationshipKind {
    /// Tie-break rank on equal confidence; higher wins
    pub fn precedence(&self) -> u8 {
        match self {
            RelationshipKind::ForeignKey => 3,
            RelationshipKind::NamingMatch => 2,
            RelationshipKind::DataOverlap => 1,
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipKind::ForeignKey => "foreign_key",
            RelationshipKind::NamingMatch => "naming_match",
            RelationshipKind::DataOverlap => "data_overlap",
        };
        f.write_str(s)
    }
}

/// Detector-specific details of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum EvidenceDetail {
    Constraint {
        constraint: Option<String>,
    },
    Naming {
        rule: String,
        type_compatible: bool,
        cardinality_plausible: bool,
    },
    Overlap {
        containment: f64,
        child_sample: u64,
        parent_sample: u64,
        name_similarity: f64,
    },
}

/// A single signal that fired for a relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: RelationshipKind,
    pub confidence: f64,
    /// The referencing side
    pub child: Endpoint,
    /// The referenced side
    pub parent: Endpoint,
    pub detail: EvidenceDetail,
}

/// How many child rows share one parent row, read child to parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    /// Neither side is unique, or a side has no statistics
    #[default]
    Unknown,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cardinality::OneToOne => "one_to_one",
            Cardinality::ManyToOne => "many_to_one",
            Cardinality::OneToMany => "one_to_many",
            Cardinality::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A relationship between two columns, stored under its canonical endpoint order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// The lesser endpoint in canonical order
    pub left: Endpoint,
    pub right: Endpoint,
    pub kind: RelationshipKind,
    pub confidence: f64,
    /// Referencing side according to the winning signal
    pub child: Endpoint,
    pub parent: Endpoint,
    #[serde(default)]
    pub cardinality: Cardinality,
    pub evidence: Vec<Evidence>,
}

impl Relationship {
    pub fn touches(&self, table: &str) -> bool {
        self.left.table == table || self.right.table == table
    }

    pub fn has_evidence_of(&self, kind: RelationshipKind) -> bool {
        self.evidence.iter().any(|e| e.kind == kind)
    }
}
