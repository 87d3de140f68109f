//! Embedded DataFusion execution engine.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use common::config::{TableFormat, TableSourceConfig};
use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampNanosecondArray,
};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Schema, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use tokio_util::sync::CancellationToken;

use super::{ColumnDescriptor, ColumnKind, ExecutionError, QueryExecutor, ResultSet, ScanValue};

/// Executes SQL against a shared DataFusion session.
///
/// Cloning is cheap; clones share the session and its registered tables.
#[derive(Clone, Default)]
pub struct DataFusionExecutor {
    session_context: Arc<SessionContext>,
}

impl Debug for DataFusionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionExecutor")
            .field("session_context", &"set")
            .finish()
    }
}

impl DataFusionExecutor {
    pub fn new(session_context: Arc<SessionContext>) -> Self {
        Self { session_context }
    }

    /// Create an executor with every configured table registered.
    pub async fn with_tables(tables: &[TableSourceConfig]) -> Result<Self, ExecutionError> {
        let executor = Self::default();
        for table in tables {
            executor.register_table(table).await?;
        }
        Ok(executor)
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.session_context
    }

    pub async fn register_table(&self, table: &TableSourceConfig) -> Result<(), ExecutionError> {
        tracing::info!(
            "Registering {:?} table {} from {}",
            table.format,
            table.name,
            table.path
        );

        match table.format {
            TableFormat::Csv => {
                self.session_context
                    .register_csv(table.name.as_str(), &table.path, CsvReadOptions::new())
                    .await?
            }
            TableFormat::Parquet => {
                self.session_context
                    .register_parquet(
                        table.name.as_str(),
                        &table.path,
                        ParquetReadOptions::default(),
                    )
                    .await?
            }
        }

        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for DataFusionExecutor {
    async fn execute(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ResultSet>, ExecutionError> {
        let run = async {
            let df = self.session_context.sql(sql).await?;
            let schema = df.schema().inner().clone();
            let batches = df.collect().await?;
            Ok::<_, ExecutionError>((schema, batches))
        };

        let (schema, batches) = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            result = run => result?,
        };

        tracing::debug!("Query returned {} record batches", batches.len());

        Ok(Box::new(BatchCursor::new(&schema, &batches)?))
    }
}

/// Forward-only cursor over collected record batches.
///
/// Columns are cast once per batch to a single Arrow type per declared kind,
/// so scanning a cell is a plain downcast.
struct BatchCursor {
    columns: Vec<ColumnDescriptor>,
    batches: Vec<Vec<ArrayRef>>,
    batch: usize,
    row: usize,
}

impl BatchCursor {
    fn new(schema: &Schema, batches: &[RecordBatch]) -> Result<Self, ExecutionError> {
        let columns: Vec<ColumnDescriptor> = schema
            .fields()
            .iter()
            .map(|field| {
                ColumnDescriptor::new(field.name().clone(), column_kind(field.data_type()))
            })
            .collect();

        let batches = batches
            .iter()
            .map(|batch| {
                batch
                    .columns()
                    .iter()
                    .zip(&columns)
                    .map(|(array, column)| normalize(array, &column.kind))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns,
            batches,
            batch: 0,
            row: 0,
        })
    }
}

impl ResultSet for BatchCursor {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn next_row(&mut self, slots: &mut [ScanValue]) -> Result<bool, ExecutionError> {
        while let Some(arrays) = self.batches.get(self.batch) {
            let len = arrays.first().map_or(0, |array| array.len());
            if self.row >= len {
                self.batch += 1;
                self.row = 0;
                continue;
            }

            for ((slot, array), column) in slots.iter_mut().zip(arrays).zip(&self.columns) {
                *slot = scan_value(array.as_ref(), &column.kind, self.row)?;
            }
            self.row += 1;
            return Ok(true);
        }

        Ok(false)
    }
}

/// Map an Arrow type onto the declared column kinds the table builder knows.
fn column_kind(data_type: &DataType) -> ColumnKind {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ColumnKind::String,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnKind::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => ColumnKind::Float,
        DataType::Timestamp(_, _) => ColumnKind::Timestamp,
        DataType::Boolean => ColumnKind::Boolean,
        other => ColumnKind::Unsupported(other.to_string()),
    }
}

fn normalize(array: &ArrayRef, kind: &ColumnKind) -> Result<ArrayRef, ExecutionError> {
    let target = match (kind, array.data_type()) {
        (ColumnKind::String, _) => DataType::Utf8,
        (ColumnKind::Integer, _) => DataType::Int64,
        (ColumnKind::Float, _) => DataType::Float64,
        (ColumnKind::Timestamp, DataType::Timestamp(_, tz)) => {
            DataType::Timestamp(TimeUnit::Nanosecond, tz.clone())
        }
        _ => return Ok(array.clone()),
    };

    if array.data_type() == &target {
        Ok(array.clone())
    } else {
        Ok(cast(array, &target)?)
    }
}

fn scan_value(
    array: &dyn Array,
    kind: &ColumnKind,
    row: usize,
) -> Result<ScanValue, ExecutionError> {
    if array.is_null(row) {
        return Ok(ScanValue::Null);
    }

    let value = match kind {
        ColumnKind::String => {
            ScanValue::String(downcast::<StringArray>(array)?.value(row).to_string())
        }
        ColumnKind::Integer => ScanValue::Int(downcast::<Int64Array>(array)?.value(row)),
        ColumnKind::Float => ScanValue::Float(downcast::<Float64Array>(array)?.value(row)),
        ColumnKind::Timestamp => {
            let nanos = downcast::<TimestampNanosecondArray>(array)?.value(row);
            ScanValue::Timestamp(DateTime::from_timestamp_nanos(nanos))
        }
        ColumnKind::Boolean => ScanValue::Bool(downcast::<BooleanArray>(array)?.value(row)),
        ColumnKind::Unsupported(type_name) => {
            return Err(ExecutionError::Scan(format!(
                "cannot scan a value of type {type_name}"
            )));
        }
    };

    Ok(value)
}

fn downcast<T: Array + 'static>(array: &dyn Array) -> Result<&T, ExecutionError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ExecutionError::Scan(format!("unexpected array type {}", array.data_type()))
    })
}
