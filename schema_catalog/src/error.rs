//! Error types for schema_catalog

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for catalog operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),

    #[error("Cannot access schema {schema}: {reason}")]
    SchemaAccess { schema: String, reason: String },

    #[error("Profiling of {column} timed out after {seconds}s")]
    ProfilingTimeout { column: String, seconds: u64 },

    #[error("Sampling of {column} failed: {reason}")]
    Sampling { column: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    /// The failure class used when this error is recorded against a unit.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Connection(_) => FailureKind::Connection,
            Error::UnsupportedEngine(_) => FailureKind::UnsupportedEngine,
            Error::SchemaAccess { .. } => FailureKind::SchemaAccess,
            Error::ProfilingTimeout { .. } => FailureKind::ProfilingTimeout,
            Error::Sampling { .. } => FailureKind::Sampling,
            Error::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Query,
        }
    }

    /// Name the schema of a privilege error raised without one. Drivers
    /// report the denial but not the schema it was raised under.
    pub fn in_schema(self, schema: &str) -> Self {
        match self {
            Error::SchemaAccess { schema: current, reason } if current.is_empty() => {
                Error::SchemaAccess {
                    schema: schema.to_string(),
                    reason,
                }
            }
            other => other,
        }
    }
}

/// Insufficient privilege, per the SQL standard SQLSTATE class 42.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Error::Connection(error.to_string()),
            sqlx::Error::Database(db)
                if db.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE) =>
            {
                Error::SchemaAccess {
                    schema: String::new(),
                    reason: db.message().to_string(),
                }
            }
            _ => Error::Query(error.to_string()),
        }
    }
}

impl From<tiberius::error::Error> for Error {
    fn from(error: tiberius::error::Error) -> Self {
        match &error {
            tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Routing { .. } => Error::Connection(error.to_string()),
            // 229: permission denied on object, 916: principal cannot access database
            tiberius::error::Error::Server(token) if matches!(token.code(), 229 | 916) => {
                Error::SchemaAccess {
                    schema: String::new(),
                    reason: token.message().to_string(),
                }
            }
            _ => Error::Query(error.to_string()),
        }
    }
}

/// Convert Serde JSON errors to catalog errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

/// Convert TOML deserialization errors to catalog errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Config(error.to_string())
    }
}

/// Failure classes reported to the progress collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    UnsupportedEngine,
    SchemaAccess,
    ProfilingTimeout,
    Sampling,
    Query,
    Cancelled,
}

/// The smallest unit a failure was scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum UnitRef {
    Schema { schema: String },
    Table { table: String },
    Column { table: String, column: String },
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitRef::Schema { schema } => write!(f, "schema {schema}"),
            UnitRef::Table { table } => write!(f, "table {table}"),
            UnitRef::Column { table, column } => write!(f, "column {table}.{column}"),
        }
    }
}

/// A unit that failed during a run, with the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnit {
    #[serde(flatten)]
    pub unit: UnitRef,
    pub kind: FailureKind,
    pub reason: String,
}

impl FailedUnit {
    pub fn new(unit: UnitRef, error: &Error) -> Self {
        Self {
            unit,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Connection("refused".into()).kind(), FailureKind::Connection);
        assert_eq!(
            Error::ProfilingTimeout { column: "t.c".into(), seconds: 5 }.kind(),
            FailureKind::ProfilingTimeout
        );
        assert_eq!(Error::Config("bad".into()).kind(), FailureKind::Query);
    }

    #[test]
    fn test_privilege_error_names_its_schema() {
        let denied = Error::SchemaAccess { schema: String::new(), reason: "permission denied".into() };
        assert_eq!(
            denied.in_schema("sales").to_string(),
            "Cannot access schema sales: permission denied"
        );

        // A schema already named is kept, other errors pass through
        let named = Error::SchemaAccess { schema: "hr".into(), reason: "denied".into() };
        assert_eq!(named.in_schema("sales").to_string(), "Cannot access schema hr: denied");
        assert!(matches!(Error::Query("x".into()).in_schema("sales"), Error::Query(_)));
    }

    #[test]
    fn test_failed_unit_display() {
        let unit = UnitRef::Column { table: "db.public.orders".into(), column: "total".into() };
        assert_eq!(unit.to_string(), "column db.public.orders.total");

        let failed = FailedUnit::new(
            unit,
            &Error::Sampling { column: "total".into(), reason: "bad cast".into() },
        );
        assert_eq!(failed.kind, FailureKind::Sampling);
        assert!(failed.reason.contains("bad cast"));
    }
}
