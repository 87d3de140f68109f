//! Concurrent execution of the queries bundled in one request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::QueryExecutor;
use crate::frame::Frame;
use crate::query::dialect::Dialect;
use crate::query::error::{ErrorKind, QueryError};
use crate::query::{self, QueryOutput, QueryRequest};

/// Every per-query failure is reported as a bad request.
const ERROR_STATUS: u16 = 400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseError {
    pub status: u16,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl From<&QueryError> for ResponseError {
    fn from(err: &QueryError) -> Self {
        Self {
            status: ERROR_STATUS,
            kind: err.kind(),
            message: err.user_message(),
            location: err.location().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl From<QueryOutput> for DataResponse {
    fn from(output: QueryOutput) -> Self {
        Self {
            frames: vec![output.frame],
            error: output.error.as_ref().map(ResponseError::from),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    pub results: BTreeMap<String, DataResponse>,
}

/// Runs every query of a request on its own task and gathers the results.
#[derive(Clone)]
pub struct Coordinator {
    executor: Arc<dyn QueryExecutor>,
    dialect: &'static dyn Dialect,
    timeout: Duration,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        dialect: &'static dyn Dialect,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            dialect,
            timeout,
        }
    }

    /// Run `queries` concurrently.
    ///
    /// Returns once every query has reported, `cancel` fires or the timeout
    /// elapses. Queries that have not reported by then are absent from the
    /// response.
    pub async fn run(
        &self,
        queries: Vec<QueryRequest>,
        cancel: &CancellationToken,
    ) -> QueryDataResponse {
        let mut response = QueryDataResponse::default();
        let expected = queries.len();
        if expected == 0 {
            return response;
        }

        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel::<(String, DataResponse)>(expected);

        for request in queries {
            let tx = tx.clone();
            let token = token.clone();
            let executor = self.executor.clone();
            let dialect = self.dialect;

            tokio::spawn(async move {
                let output = query::run(&request, executor.as_ref(), dialect, &token).await;
                let result = (request.ref_id, DataResponse::from(output));

                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tx.send(result) => {}
                }
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut received = 0;
        while received < expected {
            tokio::select! {
                message = rx.recv() => match message {
                    Some((ref_id, result)) => {
                        response.results.insert(ref_id, result);
                        received += 1;
                    }
                    None => break,
                },
                _ = token.cancelled() => {
                    tracing::warn!(
                        "Request cancelled with {} of {} queries answered",
                        received,
                        expected
                    );
                    break;
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        "Request timed out after {:?} with {} of {} queries answered",
                        self.timeout,
                        received,
                        expected
                    );
                    token.cancel();
                    break;
                }
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ColumnDescriptor, ColumnKind, ScanValue};
    use crate::query::dialect::DataFusion;
    use crate::query::{DataFormat, TimeRange};
    use crate::testing::{MemoryResultSet, StaticExecutor};
    use chrono::{TimeZone, Utc};

    fn request(ref_id: &str, raw: &str) -> QueryRequest {
        QueryRequest {
            ref_id: ref_id.to_string(),
            raw: raw.to_string(),
            range: TimeRange::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            ),
            interval: Duration::from_secs(60),
            format: DataFormat::Table,
        }
    }

    fn one_row() -> MemoryResultSet {
        MemoryResultSet::new(
            vec![ColumnDescriptor::new("value", ColumnKind::Integer)],
            vec![vec![ScanValue::Int(1)]],
        )
    }

    fn coordinator(executor: StaticExecutor, timeout: Duration) -> Coordinator {
        Coordinator::new(Arc::new(executor), &DataFusion, timeout)
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let executor = StaticExecutor::new()
            .with_failure("FROM broken", "relation does not exist")
            .with_rows("FROM", one_row());
        let queries = vec![
            request("A", "SELECT value FROM a"),
            request("B", "SELECT value FROM broken"),
            request("C", "SELECT value FROM c"),
            request("D", "SELECT value FROM d"),
        ];

        let response = coordinator(executor, Duration::from_secs(5))
            .run(queries, &CancellationToken::new())
            .await;

        assert_eq!(response.results.len(), 4);
        for ref_id in ["A", "C", "D"] {
            let slot = &response.results[ref_id];
            assert!(slot.error.is_none(), "{ref_id} should succeed");
            assert_eq!(slot.frames[0].row_len(), 1);
        }

        let failed = &response.results["B"];
        let error = failed.error.as_ref().unwrap();
        assert_eq!(error.status, 400);
        assert_eq!(error.kind, ErrorKind::QueryExecutionError);
        assert!(error.message.contains("relation does not exist"));
        assert_eq!(failed.frames[0].row_len(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor = StaticExecutor::new()
            .with_panic("FROM boom", "index out of bounds")
            .with_rows("FROM", one_row());
        let queries = vec![
            request("A", "SELECT value FROM boom"),
            request("B", "SELECT value FROM ok"),
        ];

        let response = coordinator(executor, Duration::from_secs(5))
            .run(queries, &CancellationToken::new())
            .await;

        let error = response.results["A"].error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::InternalFault);
        assert_eq!(error.message, "panic: index out of bounds");
        assert!(error.location.is_some());
        assert!(response.results["B"].error.is_none());
    }

    #[tokio::test]
    async fn test_timeout_leaves_slow_slot_absent() {
        let executor = StaticExecutor::new()
            .with_hang("FROM slow")
            .with_rows("FROM", one_row());
        let queries = vec![
            request("A", "SELECT value FROM slow"),
            request("B", "SELECT value FROM fast"),
        ];

        let response = coordinator(executor, Duration::from_millis(200))
            .run(queries, &CancellationToken::new())
            .await;

        assert!(!response.results.contains_key("A"));
        assert!(response.results["B"].error.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_early() {
        let executor = StaticExecutor::new().with_hang("FROM slow");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = coordinator(executor, Duration::from_secs(30))
            .run(vec![request("A", "SELECT value FROM slow")], &cancel)
            .await;

        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_no_queries() {
        let response = coordinator(StaticExecutor::new(), Duration::from_secs(1))
            .run(Vec::new(), &CancellationToken::new())
            .await;
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_response_serialization() {
        let response = QueryDataResponse {
            results: BTreeMap::from([(
                "A".to_string(),
                DataResponse {
                    frames: vec![Frame::new("response")],
                    error: Some(ResponseError {
                        status: 400,
                        kind: ErrorKind::MacroSyntaxError,
                        message: "query build: unsupported macro [$__x]".to_string(),
                        location: None,
                    }),
                },
            )]),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "results": {
                    "A": {
                        "frames": [{ "name": "response", "fields": [] }],
                        "error": {
                            "status": 400,
                            "kind": "macro-syntax-error",
                            "message": "query build: unsupported macro [$__x]"
                        }
                    }
                }
            })
        );
    }
}
