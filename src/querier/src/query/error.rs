use serde::Serialize;

use super::macros::MacroError;
use crate::executor::ExecutionError;
use crate::frame::FrameError;
use crate::table::TableError;

/// Returned to the user when a time series could not be built because the
/// rows were not ordered by time.
pub const SORT_BY_TIME_HINT: &str = "If \"Data Format\" is timeseries, please set the order by a time-type column. Otherwise, change \"Data Format\" to table.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MacroSyntaxError,
    DuplicateBucketMacro,
    QueryExecutionError,
    UnsupportedColumnType,
    TypeCoercionFailure,
    RowsNotSortedByTime,
    ConversionError,
    InternalFault,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query build: {0}")]
    Macro(#[from] MacroError),

    #[error("query execution: failed to query [{sql}]: {source}")]
    Execution {
        sql: String,
        #[source]
        source: ExecutionError,
    },

    #[error("query execution: {0}")]
    Table(#[from] TableError),

    #[error("query execution: {0}")]
    Frame(#[from] FrameError),

    #[error("panic: {message}")]
    InternalFault { message: String, location: String },
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Macro(MacroError::DuplicateBucket) => ErrorKind::DuplicateBucketMacro,
            Self::Macro(_) => ErrorKind::MacroSyntaxError,
            Self::Execution { .. } | Self::Table(TableError::Scan(_)) => {
                ErrorKind::QueryExecutionError
            }
            Self::Table(TableError::UnsupportedColumnType { .. }) => {
                ErrorKind::UnsupportedColumnType
            }
            Self::Table(TableError::TypeCoercion { .. }) => ErrorKind::TypeCoercionFailure,
            Self::Frame(FrameError::NotSortedByTime) => ErrorKind::RowsNotSortedByTime,
            Self::Frame(_) => ErrorKind::ConversionError,
            Self::InternalFault { .. } => ErrorKind::InternalFault,
        }
    }

    /// Message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::RowsNotSortedByTime => SORT_BY_TIME_HINT.to_string(),
            _ => self.to_string(),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Self::InternalFault { location, .. } => Some(location),
            _ => None,
        }
    }
}
