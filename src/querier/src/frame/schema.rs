use super::{FieldKind, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSeriesType {
    Not,
    Long,
    Wide,
}

/// Structural classification of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesSchema {
    pub series_type: TimeSeriesType,
    /// First timestamp field.
    pub time_index: usize,
    /// Non-time fields that are not labels.
    pub value_indices: Vec<usize>,
    /// String and boolean fields identifying a series in long form.
    pub factor_indices: Vec<usize>,
}

impl Frame {
    /// Classify the frame the way Grafana data frames do.
    ///
    /// Without a timestamp field or a numeric value field the frame is not a
    /// time series. String and boolean fields make it long; otherwise it is
    /// wide.
    pub fn time_series_schema(&self) -> TimeSeriesSchema {
        let mut schema = TimeSeriesSchema {
            series_type: TimeSeriesType::Not,
            time_index: 0,
            value_indices: Vec::new(),
            factor_indices: Vec::new(),
        };

        let Some(time_index) = self
            .fields
            .iter()
            .position(|field| field.kind() == FieldKind::Timestamp)
        else {
            return schema;
        };
        schema.time_index = time_index;

        let mut has_numeric = false;
        for (index, field) in self.fields.iter().enumerate() {
            if index == time_index {
                continue;
            }
            match field.kind() {
                FieldKind::String | FieldKind::Boolean => schema.factor_indices.push(index),
                kind => {
                    has_numeric |= kind.is_numeric();
                    schema.value_indices.push(index);
                }
            }
        }

        schema.series_type = match (has_numeric, schema.factor_indices.is_empty()) {
            (false, _) => TimeSeriesType::Not,
            (true, true) => TimeSeriesType::Wide,
            (true, false) => TimeSeriesType::Long,
        };
        schema
    }
}
