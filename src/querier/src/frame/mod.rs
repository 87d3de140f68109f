//! Output frames and the assembly of typed tables into time series.
//!
//! A [`Frame`] is what a query hands back to its caller: an ordered set of
//! row-aligned [`Field`]s plus diagnostics metadata. [`assemble`] turns a
//! built table into a frame and, for time-series queries, reshapes long
//! results into wide ones and fills missing buckets.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::query::DataFormat;
use crate::query::macros::MacroContext;
use crate::table::Table;

pub mod field;
pub mod fill;
pub mod pivot;
pub mod schema;

pub use field::{Field, FieldKind, Values};
pub use fill::FillPolicy;
pub use schema::{TimeSeriesSchema, TimeSeriesType};

/// Name given to every frame produced by a query.
pub const RESPONSE_FRAME_NAME: &str = "response";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("long series must be sorted ascending by time to be converted")]
    NotSortedByTime,

    #[error("frame is not a long time series")]
    NotLongSeries,

    #[error("time value at row {row} is null")]
    NullTime { row: usize },

    #[error("field type mismatch: expected {expected}, found {found}")]
    FieldTypeMismatch { expected: FieldKind, found: FieldKind },

    #[error("row {row} out of bounds for field of length {len}")]
    RowOutOfBounds { row: usize, len: usize },

    #[error("field {0} is not a time field")]
    NotATimeField(usize),

    #[error("fill interval must be at least one second")]
    InvalidInterval,

    #[error("time bucket {0} is out of range")]
    TimeOutOfRange(i64),

    #[error("gap fill would produce {buckets} buckets, more than the maximum of {max}")]
    TooManyBuckets { buckets: u64, max: u64 },
}

/// Structural type tag attached to a frame for the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameType {
    Table,
    TimeseriesWide,
}

impl FrameType {
    /// Tag for a frame produced for `format`.
    ///
    /// Table queries and time-series queries whose rows could not be read as a
    /// series are tagged as tables; everything else left the assembler in wide
    /// form.
    pub fn for_frame(format: DataFormat, frame: &Frame) -> Self {
        match format {
            DataFormat::Table => Self::Table,
            DataFormat::Timeseries
                if frame.row_len() > 0
                    && frame.time_series_schema().series_type == TimeSeriesType::Not =>
            {
                Self::Table
            }
            DataFormat::Timeseries => Self::TimeseriesWide,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub executed_query_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Map every table column to a field of the same name, keeping order.
    pub fn from_table(name: impl Into<String>, table: Table) -> Self {
        let fields = table
            .into_columns()
            .into_iter()
            .map(|column| Field::new(column.name, column.values))
            .collect();
        Self::new(name).with_fields(fields)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn row_len(&self) -> usize {
        self.fields.first().map_or(0, Field::len)
    }

    /// Same name, fields and metadata, without rows.
    pub fn empty_copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            fields: self.fields.iter().map(Field::empty_copy).collect(),
            meta: self.meta.clone(),
        }
    }

    /// Append row `row` of `src`, which must share this frame's layout.
    pub fn push_row_from(&mut self, src: &Frame, row: usize) -> Result<(), FrameError> {
        for (dst, src) in self.fields.iter_mut().zip(&src.fields) {
            dst.values.push_from(&src.values, row)?;
        }
        Ok(())
    }

    /// Timestamps of the field at `index`, rejecting nulls.
    pub(crate) fn times(&self, index: usize) -> Result<Vec<DateTime<Utc>>, FrameError> {
        let field = self
            .fields
            .get(index)
            .filter(|field| field.kind() == FieldKind::Timestamp)
            .ok_or(FrameError::NotATimeField(index))?;

        (0..field.len())
            .map(|row| {
                field
                    .values
                    .timestamp(row)
                    .ok_or(FrameError::NullTime { row })
            })
            .collect()
    }
}

/// Convert a built table into the frame returned for a query.
pub fn assemble(table: Table, format: DataFormat, ctx: &MacroContext) -> Result<Frame, FrameError> {
    let frame = Frame::from_table(RESPONSE_FRAME_NAME, table);

    if frame.row_len() == 0 || format != DataFormat::Timeseries {
        return Ok(frame);
    }

    let schema = frame.time_series_schema();
    let frame = match schema.series_type {
        TimeSeriesType::Not => return Ok(frame),
        TimeSeriesType::Long => {
            let policy = ctx.fill.clone().unwrap_or_default();
            pivot::long_to_wide(&frame, &schema, &policy)?
        }
        TimeSeriesType::Wide => frame,
    };

    match &ctx.fill {
        Some(policy) => {
            let time_index = frame.time_series_schema().time_index;
            fill::fill_missing_points(&frame, time_index, &ctx.range, ctx.interval, policy)
        }
        None => Ok(frame),
    }
}
