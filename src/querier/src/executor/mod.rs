//! Execution of expanded SQL.
//!
//! The pipeline only sees the [`QueryExecutor`] trait: it hands over SQL text
//! plus the request's cancellation token and gets back a forward-only
//! [`ResultSet`] describing its columns. [`engine::DataFusionExecutor`] is the
//! embedded implementation used by the service.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;
use tokio_util::sync::CancellationToken;

pub mod engine;

pub use engine::DataFusionExecutor;

/// Query used to verify that the data source answers at all.
pub const HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Scalar kind a result column declares before any row is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    Timestamp,
    Boolean,
    /// A type outside the supported set, kept by name for error reporting.
    Unsupported(String),
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Boolean => write!(f, "boolean"),
            Self::Unsupported(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One untyped cell as delivered by a result cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScanValue {
    #[default]
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
}

impl ScanValue {
    /// Name of the underlying representation, used in coercion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Int(_) => "int64",
            Self::Float(_) => "float64",
            Self::Timestamp(_) => "timestamp",
            Self::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for ScanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::String(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Query failed: {0}")]
    QueryFailed(#[from] DataFusionError),
    #[error("Failed to normalize result column: {0}")]
    Normalize(#[from] ArrowError),
    #[error("Query was cancelled")]
    Cancelled,
    #[error("Failed to scan row: {0}")]
    Scan(String),
    #[error("{0}")]
    Other(String),
}

/// Forward-only cursor over the rows of one executed query.
pub trait ResultSet: Send {
    fn columns(&self) -> &[ColumnDescriptor];

    /// Scans the next row into `slots` (one slot per column).
    ///
    /// Returns `Ok(false)` once the cursor is exhausted.
    fn next_row(&mut self, slots: &mut [ScanValue]) -> Result<bool, ExecutionError>;
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ResultSet>, ExecutionError>;
}

/// Runs [`HEALTH_CHECK_QUERY`] and checks that it yields exactly `1`.
pub async fn select_one(
    executor: &dyn QueryExecutor,
    cancel: &CancellationToken,
) -> Result<(), ExecutionError> {
    let mut rows = executor.execute(HEALTH_CHECK_QUERY, cancel).await?;
    let mut slots = vec![ScanValue::Null; rows.columns().len()];

    let mut value = None;
    while rows.next_row(&mut slots)? {
        value = slots.first().cloned();
    }

    match value {
        Some(ScanValue::Int(1)) => Ok(()),
        Some(other) => Err(ExecutionError::Other(format!(
            "failed to get 1: got [{other}]"
        ))),
        None => Err(ExecutionError::Other(
            "failed to get 1: no rows returned".to_string(),
        )),
    }
}
