//! In-memory execution doubles for exercising the pipeline without an engine.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::executor::{ColumnDescriptor, ExecutionError, QueryExecutor, ResultSet, ScanValue};

/// Result set backed by rows held in memory.
#[derive(Debug, Clone)]
pub struct MemoryResultSet {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<ScanValue>>,
    position: usize,
    fail_after: Option<usize>,
}

impl MemoryResultSet {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<ScanValue>>) -> Self {
        Self {
            columns,
            rows,
            position: 0,
            fail_after: None,
        }
    }

    /// Report a source error once `rows` rows have been delivered.
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }
}

impl ResultSet for MemoryResultSet {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn next_row(&mut self, slots: &mut [ScanValue]) -> Result<bool, ExecutionError> {
        if self.fail_after == Some(self.position) {
            return Err(ExecutionError::Scan("connection reset by peer".to_string()));
        }

        let Some(row) = self.rows.get(self.position) else {
            return Ok(false);
        };

        for (slot, value) in slots.iter_mut().zip(row) {
            *slot = value.clone();
        }
        self.position += 1;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
enum StaticResponse {
    Rows(MemoryResultSet),
    Failure(String),
    Panic(String),
    Hang,
}

/// Executor answering from canned responses.
///
/// The first registered response whose key is contained in the SQL wins.
/// Every executed statement is recorded.
#[derive(Debug, Clone, Default)]
pub struct StaticExecutor {
    responses: Vec<(String, StaticResponse)>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl StaticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, key: impl Into<String>, rows: MemoryResultSet) -> Self {
        self.responses.push((key.into(), StaticResponse::Rows(rows)));
        self
    }

    pub fn with_failure(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .push((key.into(), StaticResponse::Failure(message.into())));
        self
    }

    /// Panic while executing matching SQL.
    pub fn with_panic(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .push((key.into(), StaticResponse::Panic(message.into())));
        self
    }

    /// Never answer matching SQL until the request is cancelled.
    pub fn with_hang(mut self, key: impl Into<String>) -> Self {
        self.responses.push((key.into(), StaticResponse::Hang));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryExecutor for StaticExecutor {
    async fn execute(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ResultSet>, ExecutionError> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }

        let response = self
            .responses
            .iter()
            .find(|(key, _)| sql.contains(key.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            Some(StaticResponse::Rows(rows)) => Ok(Box::new(rows)),
            Some(StaticResponse::Failure(message)) => Err(ExecutionError::Other(message)),
            Some(StaticResponse::Panic(message)) => panic!("{message}"),
            Some(StaticResponse::Hang) => {
                cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            }
            None => Err(ExecutionError::Other(format!("no canned response for [{sql}]"))),
        }
    }
}
