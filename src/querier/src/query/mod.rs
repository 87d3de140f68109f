//! One query, end to end: expand macros, execute, build the table, assemble
//! the frame.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionError, QueryExecutor};
use crate::frame::{self, Frame, FrameMeta, FrameType, RESPONSE_FRAME_NAME};
use crate::table::{self, Table, TableError};

pub mod dialect;
pub mod error;
pub mod macros;

use dialect::Dialect;
use error::QueryError;
use macros::{MacroContext, MacroExpander};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    #[serde(alias = "")]
    Timeseries,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }
}

/// A query as submitted by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    pub ref_id: String,
    pub query_text: String,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub interval_ms: u64,
}

/// A batch of queries sharing one time range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataRequest {
    pub range: TimeRange,
    pub queries: Vec<DataQuery>,
}

impl QueryDataRequest {
    pub fn into_requests(self) -> Vec<QueryRequest> {
        let range = self.range;
        self.queries
            .into_iter()
            .map(|query| QueryRequest {
                ref_id: query.ref_id,
                raw: query.query_text,
                range,
                interval: Duration::from_millis(query.interval_ms),
                format: query.data_format,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub ref_id: String,
    pub raw: String,
    pub range: TimeRange,
    pub interval: Duration,
    pub format: DataFormat,
}

/// An expanded query ready to run.
#[derive(Debug, Clone)]
pub struct QueryModel {
    sql: String,
    format: DataFormat,
    context: MacroContext,
}

impl QueryModel {
    pub fn build(
        request: &QueryRequest,
        dialect: &'static dyn Dialect,
    ) -> Result<Self, QueryError> {
        let context = MacroContext::new(request.range, request.interval);
        let (sql, context) = MacroExpander::new(dialect).expand(&request.raw, context)?;

        Ok(Self {
            sql,
            format: request.format,
            context,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn context(&self) -> &MacroContext {
        &self.context
    }

    pub async fn execute(
        &self,
        executor: &dyn QueryExecutor,
        cancel: &CancellationToken,
    ) -> Result<Table, QueryError> {
        let mut rows = executor
            .execute(&self.sql, cancel)
            .await
            .map_err(|source| self.execution_error(source))?;

        table::build(rows.as_mut()).map_err(|err| match err {
            TableError::Scan(source) => self.execution_error(source),
            err => QueryError::Table(err),
        })
    }

    fn execution_error(&self, source: ExecutionError) -> QueryError {
        QueryError::Execution {
            sql: self.sql.clone(),
            source,
        }
    }

    pub fn convert_to_frame(&self, table: Table) -> Result<Frame, QueryError> {
        Ok(frame::assemble(table, self.format, &self.context)?)
    }
}

/// Frame and error for one query; the frame is empty on failure.
#[derive(Debug)]
pub struct QueryOutput {
    pub frame: Frame,
    pub error: Option<QueryError>,
}

/// Run one query. Failures, panics included, end up in the output rather
/// than escaping.
pub async fn run(
    request: &QueryRequest,
    executor: &dyn QueryExecutor,
    dialect: &'static dyn Dialect,
    cancel: &CancellationToken,
) -> QueryOutput {
    tracing::debug!(ref_id = %request.ref_id, "Running query");

    let mut executed = String::new();
    let result = AssertUnwindSafe(pipeline(request, executor, dialect, cancel, &mut executed))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(internal_fault(payload)));

    let (frame, error) = match result {
        Ok(frame) => (frame, None),
        Err(err) => {
            match &err {
                QueryError::InternalFault { message, location } => {
                    tracing::error!(
                        ref_id = %request.ref_id,
                        "Query panicked: {message}\n{location}"
                    );
                }
                err => tracing::warn!(ref_id = %request.ref_id, "Query failed: {err}"),
            }
            (Frame::new(RESPONSE_FRAME_NAME), Some(err))
        }
    };

    let meta = FrameMeta {
        frame_type: FrameType::for_frame(request.format, &frame),
        executed_query_string: executed,
    };
    QueryOutput {
        frame: frame.with_meta(meta),
        error,
    }
}

async fn pipeline(
    request: &QueryRequest,
    executor: &dyn QueryExecutor,
    dialect: &'static dyn Dialect,
    cancel: &CancellationToken,
    executed: &mut String,
) -> Result<Frame, QueryError> {
    let model = QueryModel::build(request, dialect)?;
    executed.push_str(model.sql());
    tracing::debug!(ref_id = %request.ref_id, sql = %model.sql(), "Expanded query");

    let table = model.execute(executor, cancel).await?;
    model.convert_to_frame(table)
}

fn internal_fault(payload: Box<dyn Any + Send>) -> QueryError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    QueryError::InternalFault {
        message,
        location: Backtrace::force_capture().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ColumnDescriptor, ColumnKind, ScanValue};
    use crate::frame::{FillPolicy, Values};
    use crate::query::dialect::DataFusion;
    use crate::query::error::{ErrorKind, SORT_BY_TIME_HINT};
    use crate::testing::{MemoryResultSet, StaticExecutor};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
    }

    fn request(raw: &str, format: DataFormat) -> QueryRequest {
        QueryRequest {
            ref_id: "A".to_string(),
            raw: raw.to_string(),
            range: TimeRange::new(at(0), at(180)),
            interval: Duration::from_secs(60),
            format,
        }
    }

    fn series_rows(times: &[i64]) -> MemoryResultSet {
        MemoryResultSet::new(
            vec![
                ColumnDescriptor::new("time", ColumnKind::Timestamp),
                ColumnDescriptor::new("value", ColumnKind::Float),
            ],
            times
                .iter()
                .map(|t| vec![ScanValue::Timestamp(at(*t)), ScanValue::Float(*t as f64)])
                .collect(),
        )
    }

    #[test]
    fn test_data_query_defaults() {
        let query: DataQuery =
            serde_json::from_value(serde_json::json!({ "refId": "A", "queryText": "SELECT 1" }))
                .unwrap();
        assert_eq!(query.data_format, DataFormat::Timeseries);
        assert_eq!(query.interval_ms, 0);

        let query: DataQuery = serde_json::from_value(serde_json::json!({
            "refId": "B",
            "queryText": "SELECT 1",
            "dataFormat": "",
            "intervalMs": 1000
        }))
        .unwrap();
        assert_eq!(query.data_format, DataFormat::Timeseries);
        assert_eq!(query.interval_ms, 1000);
    }

    #[test]
    fn test_query_model_build() {
        let model = QueryModel::build(
            &request("SELECT $__timeGroup(ts, 1m, 0) FROM t", DataFormat::Timeseries),
            &DataFusion,
        )
        .unwrap();

        assert!(model.sql().starts_with("SELECT date_bin("));
        assert_eq!(model.context().fill, Some(FillPolicy::Value(0.0)));
    }

    #[tokio::test]
    async fn test_run_fills_missing_buckets() {
        let executor = StaticExecutor::new().with_rows("FROM cpu", series_rows(&[0, 120]));
        let output = run(
            &request("SELECT $__timeGroup(ts, 1m, null), value FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        assert!(output.error.is_none());
        assert_eq!(output.frame.row_len(), 4);
        assert_eq!(
            output.frame.fields[1].values,
            Values::Float(vec![Some(0.0), None, Some(120.0), None])
        );
        let meta = output.frame.meta.unwrap();
        assert_eq!(meta.frame_type, FrameType::TimeseriesWide);
        assert_eq!(meta.executed_query_string, executor.executed()[0]);
    }

    #[tokio::test]
    async fn test_run_table_format() {
        let executor = StaticExecutor::new().with_rows("FROM cpu", series_rows(&[0, 120]));
        let output = run(
            &request("SELECT * FROM cpu", DataFormat::Table),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(output.frame.row_len(), 2);
        assert_eq!(output.frame.meta.unwrap().frame_type, FrameType::Table);
    }

    #[tokio::test]
    async fn test_macro_error_skips_execution() {
        let executor = StaticExecutor::new();
        let output = run(
            &request("SELECT $__bogus(ts) FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        let err = output.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::MacroSyntaxError);
        assert!(executor.executed().is_empty());
        assert_eq!(output.frame.meta.unwrap().executed_query_string, "");
    }

    #[tokio::test]
    async fn test_execution_error_keeps_sql() {
        let executor = StaticExecutor::new().with_failure("FROM cpu", "connection refused");
        let output = run(
            &request("SELECT $__time(ts) FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        let err = output.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::QueryExecutionError);
        assert!(err.to_string().contains("CAST(ts AS TIMESTAMP) AS time"));
        assert_eq!(output.frame.row_len(), 0);
        assert_eq!(
            output.frame.meta.unwrap().executed_query_string,
            "SELECT CAST(ts AS TIMESTAMP) AS time FROM cpu"
        );
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_sql() {
        let rows = series_rows(&[0, 60, 120]).failing_after(1);
        let executor = StaticExecutor::new().with_rows("FROM cpu", rows);
        let output = run(
            &request("SELECT $__time(ts), value FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        let err = output.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::QueryExecutionError);
        assert!(matches!(
            err,
            QueryError::Execution {
                source: ExecutionError::Scan(_),
                ..
            }
        ));
        let message = err.to_string();
        assert!(message.contains("SELECT CAST(ts AS TIMESTAMP) AS time, value FROM cpu"));
        assert!(message.contains("connection reset by peer"));
    }

    #[tokio::test]
    async fn test_unsorted_long_rows_report_hint() {
        let rows = MemoryResultSet::new(
            vec![
                ColumnDescriptor::new("time", ColumnKind::Timestamp),
                ColumnDescriptor::new("host", ColumnKind::String),
                ColumnDescriptor::new("value", ColumnKind::Float),
            ],
            vec![
                vec![
                    ScanValue::Timestamp(at(60)),
                    ScanValue::String("a".into()),
                    ScanValue::Float(1.0),
                ],
                vec![
                    ScanValue::Timestamp(at(0)),
                    ScanValue::String("b".into()),
                    ScanValue::Float(2.0),
                ],
            ],
        );
        let executor = StaticExecutor::new().with_rows("FROM cpu", rows);
        let output = run(
            &request("SELECT * FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        let err = output.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::RowsNotSortedByTime);
        assert_eq!(err.user_message(), SORT_BY_TIME_HINT);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_fault() {
        let executor = StaticExecutor::new().with_panic("FROM cpu", "driver exploded");
        let output = run(
            &request("SELECT * FROM cpu", DataFormat::Timeseries),
            &executor,
            &DataFusion,
            &CancellationToken::new(),
        )
        .await;

        let err = output.error.unwrap();
        assert_eq!(err.kind(), ErrorKind::InternalFault);
        assert_eq!(err.user_message(), "panic: driver exploded");
        assert!(err.location().is_some());
    }
}
