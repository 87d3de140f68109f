//! Typed, nullable columns shared by tables and frames.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Timestamp,
    Boolean,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Homogeneous column of nullable values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum Values {
    String(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
    Boolean(Vec<Option<bool>>),
}

macro_rules! each_variant {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::String($v) => $body,
            Values::Integer($v) => $body,
            Values::Float($v) => $body,
            Values::Timestamp($v) => $body,
            Values::Boolean($v) => $body,
        }
    };
}

macro_rules! same_variant {
    ($dst:expr, $src:expr, ($d:ident, $s:ident) => $body:expr) => {
        match ($dst, $src) {
            (Values::String($d), Values::String($s)) => $body,
            (Values::Integer($d), Values::Integer($s)) => $body,
            (Values::Float($d), Values::Float($s)) => $body,
            (Values::Timestamp($d), Values::Timestamp($s)) => $body,
            (Values::Boolean($d), Values::Boolean($s)) => $body,
            (dst, src) => Err(FrameError::FieldTypeMismatch {
                expected: dst.kind(),
                found: src.kind(),
            }),
        }
    };
}

fn cell<T: Clone>(values: &[Option<T>], row: usize) -> Result<Option<T>, FrameError> {
    values.get(row).cloned().ok_or(FrameError::RowOutOfBounds {
        row,
        len: values.len(),
    })
}

fn cell_mut<T>(values: &mut [Option<T>], row: usize) -> Result<&mut Option<T>, FrameError> {
    let len = values.len();
    values
        .get_mut(row)
        .ok_or(FrameError::RowOutOfBounds { row, len })
}

impl Values {
    pub fn empty(kind: FieldKind) -> Self {
        Self::nulls(kind, 0)
    }

    pub fn nulls(kind: FieldKind, len: usize) -> Self {
        match kind {
            FieldKind::String => Self::String(vec![None; len]),
            FieldKind::Integer => Self::Integer(vec![None; len]),
            FieldKind::Float => Self::Float(vec![None; len]),
            FieldKind::Timestamp => Self::Timestamp(vec![None; len]),
            FieldKind::Boolean => Self::Boolean(vec![None; len]),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Integer(_) => FieldKind::Integer,
            Self::Float(_) => FieldKind::Float,
            Self::Timestamp(_) => FieldKind::Timestamp,
            Self::Boolean(_) => FieldKind::Boolean,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_null(&mut self) {
        each_variant!(self, v => v.push(None))
    }

    /// Append a copy of `src[row]`; `src` must be of the same kind.
    pub fn push_from(&mut self, src: &Values, row: usize) -> Result<(), FrameError> {
        same_variant!(self, src, (d, s) => {
            d.push(cell(s, row)?);
            Ok(())
        })
    }

    /// Overwrite `self[row]` with a copy of `src[src_row]`.
    pub fn set_from(&mut self, row: usize, src: &Values, src_row: usize) -> Result<(), FrameError> {
        same_variant!(self, src, (d, s) => {
            let value = cell(s, src_row)?;
            *cell_mut(d, row)? = value;
            Ok(())
        })
    }

    /// Overwrite `self[to]` with a copy of `self[from]`.
    pub fn copy_within(&mut self, from: usize, to: usize) -> Result<(), FrameError> {
        each_variant!(self, v => {
            let value = cell(v, from)?;
            *cell_mut(v, to)? = value;
            Ok(())
        })
    }

    /// Append a copy of the last value, or null when empty.
    pub fn push_repeat_last(&mut self) {
        each_variant!(self, v => {
            let last = v.last().cloned().flatten();
            v.push(last)
        })
    }

    /// Append a fill constant. Integer fields take the value truncated toward
    /// zero; non-numeric fields take null.
    pub fn push_fixed(&mut self, value: f64) {
        match self {
            Self::Integer(v) => v.push(Some(value as i64)),
            Self::Float(v) => v.push(Some(value)),
            other => other.push_null(),
        }
    }

    pub fn set_fixed(&mut self, row: usize, value: f64) -> Result<(), FrameError> {
        match self {
            Self::Integer(v) => *cell_mut(v, row)? = Some(value as i64),
            Self::Float(v) => *cell_mut(v, row)? = Some(value),
            _ => {}
        }
        Ok(())
    }

    pub fn timestamp(&self, row: usize) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => v.get(row).copied().flatten(),
            _ => None,
        }
    }

    pub fn push_timestamp(&mut self, time: DateTime<Utc>) -> Result<(), FrameError> {
        match self {
            Self::Timestamp(v) => {
                v.push(Some(time));
                Ok(())
            }
            other => Err(FrameError::FieldTypeMismatch {
                expected: FieldKind::Timestamp,
                found: other.kind(),
            }),
        }
    }

    /// Render `self[row]` as a label value; null renders as an empty string.
    pub fn label_text(&self, row: usize) -> String {
        let text = match self {
            Self::String(v) => v.get(row).cloned().flatten(),
            Self::Integer(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            Self::Float(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            Self::Timestamp(v) => v.get(row).copied().flatten().map(|x| x.to_rfc3339()),
            Self::Boolean(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
        };
        text.unwrap_or_default()
    }
}

/// Named column of a frame, optionally carrying the label set of the series it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub values: Values,
}

impl Field {
    pub fn new(name: impl Into<String>, values: Values) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            values,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn kind(&self) -> FieldKind {
        self.values.kind()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `name {k=v, ..}`, or just the name for an unlabelled field.
    pub fn display_name(&self) -> String {
        if self.labels.is_empty() {
            self.name.clone()
        } else {
            format!("{} {{{}}}", self.name, labels_key(&self.labels))
        }
    }

    /// Same name, labels and kind, without values.
    pub fn empty_copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            labels: self.labels.clone(),
            values: Values::empty(self.kind()),
        }
    }
}

/// `k=v, k2=v2` rendering of a label set, for display only; distinct label
/// sets can render alike.
pub fn labels_key(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
