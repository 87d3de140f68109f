//! Typed tables built from untyped result cursors.
//!
//! Every declared column kind is resolved to one coercion function before the
//! first row is scanned. Every scanned row appends to every column, so the
//! columns of a [`Table`] always have the same length.

use crate::executor::{ColumnDescriptor, ColumnKind, ExecutionError, ResultSet, ScanValue};
use crate::frame::{FieldKind, Values};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("column [{column}] has unsupported type [{type_name}]")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("column [{column}]: cannot convert {found} value [{value}] to {expected}")]
    TypeCoercion {
        column: String,
        value: String,
        found: &'static str,
        expected: FieldKind,
    },

    #[error("failed to read rows: {0}")]
    Scan(#[from] ExecutionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Values,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Values) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    #[cfg(test)]
    pub(crate) fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn row_len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }
}

/// Appends a non-null scanned value, handing it back when it does not fit.
type Coercion = fn(&mut Values, ScanValue) -> Result<(), ScanValue>;

fn coercion_for(kind: &ColumnKind) -> Option<(FieldKind, Coercion)> {
    match kind {
        ColumnKind::String => Some((FieldKind::String, coerce_string)),
        ColumnKind::Integer => Some((FieldKind::Integer, coerce_integer)),
        ColumnKind::Float => Some((FieldKind::Float, coerce_float)),
        ColumnKind::Timestamp => Some((FieldKind::Timestamp, coerce_timestamp)),
        ColumnKind::Boolean => Some((FieldKind::Boolean, coerce_boolean)),
        ColumnKind::Unsupported(_) => None,
    }
}

fn coerce_string(values: &mut Values, value: ScanValue) -> Result<(), ScanValue> {
    match (values, value) {
        (Values::String(v), ScanValue::String(s)) => v.push(Some(s)),
        (_, other) => return Err(other),
    }
    Ok(())
}

fn coerce_integer(values: &mut Values, value: ScanValue) -> Result<(), ScanValue> {
    let Values::Integer(v) = values else {
        return Err(value);
    };
    let parsed = match value {
        ScanValue::Int(n) => n,
        ScanValue::String(ref s) => s.trim().parse().map_err(|_| value.clone())?,
        other => return Err(other),
    };
    v.push(Some(parsed));
    Ok(())
}

fn coerce_float(values: &mut Values, value: ScanValue) -> Result<(), ScanValue> {
    let Values::Float(v) = values else {
        return Err(value);
    };
    let parsed = match value {
        ScanValue::Float(x) => x,
        ScanValue::Int(n) => n as f64,
        ScanValue::String(ref s) => s.trim().parse().map_err(|_| value.clone())?,
        other => return Err(other),
    };
    v.push(Some(parsed));
    Ok(())
}

fn coerce_timestamp(values: &mut Values, value: ScanValue) -> Result<(), ScanValue> {
    match (values, value) {
        (Values::Timestamp(v), ScanValue::Timestamp(t)) => v.push(Some(t)),
        (_, other) => return Err(other),
    }
    Ok(())
}

fn coerce_boolean(values: &mut Values, value: ScanValue) -> Result<(), ScanValue> {
    match (values, value) {
        (Values::Boolean(v), ScanValue::Bool(b)) => v.push(Some(b)),
        (_, other) => return Err(other),
    }
    Ok(())
}

struct ColumnBuilder {
    name: String,
    kind: FieldKind,
    coerce: Coercion,
    values: Values,
}

impl ColumnBuilder {
    fn new(descriptor: &ColumnDescriptor) -> Result<Self, TableError> {
        let (kind, coerce) =
            coercion_for(&descriptor.kind).ok_or_else(|| TableError::UnsupportedColumnType {
                column: descriptor.name.clone(),
                type_name: descriptor.kind.to_string(),
            })?;

        Ok(Self {
            name: descriptor.name.clone(),
            kind,
            coerce,
            values: Values::empty(kind),
        })
    }

    fn append(&mut self, value: ScanValue) -> Result<(), TableError> {
        if value == ScanValue::Null {
            self.values.push_null();
            return Ok(());
        }

        (self.coerce)(&mut self.values, value).map_err(|rejected| TableError::TypeCoercion {
            column: self.name.clone(),
            value: rejected.to_string(),
            found: rejected.type_name(),
            expected: self.kind,
        })
    }
}

/// Drain `rows` into a typed table.
///
/// Fails on the first unsupported column type (before any row is read), the
/// first value that cannot be coerced, or the first cursor error.
pub fn build(rows: &mut dyn ResultSet) -> Result<Table, TableError> {
    let mut builders = rows
        .columns()
        .iter()
        .map(ColumnBuilder::new)
        .collect::<Result<Vec<_>, _>>()?;

    let mut slots = vec![ScanValue::Null; builders.len()];
    while rows.next_row(&mut slots)? {
        for (builder, slot) in builders.iter_mut().zip(slots.iter_mut()) {
            builder.append(std::mem::take(slot))?;
        }
    }

    Ok(Table {
        columns: builders
            .into_iter()
            .map(|builder| Column::new(builder.name, builder.values))
            .collect(),
    })
}
