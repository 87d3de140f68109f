use std::collections::BTreeMap;

use super::{Field, FillPolicy, Frame, FrameError, TimeSeriesSchema, TimeSeriesType, Values};

struct SeriesField {
    field: Field,
    filled: Vec<bool>,
}

/// Pivot a long series into one value field per (value column, label set).
///
/// The output has one row per distinct time. Cells without a source row are
/// filled with `policy`. Rows must be non-decreasing by time.
pub fn long_to_wide(
    frame: &Frame,
    schema: &TimeSeriesSchema,
    policy: &FillPolicy,
) -> Result<Frame, FrameError> {
    if schema.series_type != TimeSeriesType::Long {
        return Err(FrameError::NotLongSeries);
    }

    let times = frame.times(schema.time_index)?;
    if times.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(FrameError::NotSortedByTime);
    }

    let mut distinct = times.clone();
    distinct.dedup();
    let rows = distinct.len();

    // Keyed on the label set itself; its rendered text is not unique.
    let mut series: BTreeMap<(String, BTreeMap<String, String>), SeriesField> = BTreeMap::new();
    let mut out_row = 0;

    for (row, time) in times.iter().enumerate() {
        while distinct[out_row] != *time {
            out_row += 1;
        }

        let labels: BTreeMap<String, String> = schema
            .factor_indices
            .iter()
            .map(|&index| {
                let factor = &frame.fields[index];
                (factor.name.clone(), factor.values.label_text(row))
            })
            .collect();

        for &index in &schema.value_indices {
            let source = &frame.fields[index];
            let entry = series
                .entry((source.name.clone(), labels.clone()))
                .or_insert_with(|| SeriesField {
                    field: Field::new(source.name.clone(), Values::nulls(source.kind(), rows))
                        .with_labels(labels.clone()),
                    filled: vec![false; rows],
                });

            entry.field.values.set_from(out_row, &source.values, row)?;
            entry.filled[out_row] = true;
        }
    }

    let time_name = frame.fields[schema.time_index].name.clone();
    let mut fields = vec![Field::new(
        time_name,
        Values::Timestamp(distinct.into_iter().map(Some).collect()),
    )];

    for (_, mut series) in series {
        fill_unset(&mut series, policy)?;
        tracing::trace!(series = %series.field.display_name(), "Pivoted series");
        fields.push(series.field);
    }

    Ok(Frame {
        name: frame.name.clone(),
        fields,
        meta: frame.meta.clone(),
    })
}

fn fill_unset(series: &mut SeriesField, policy: &FillPolicy) -> Result<(), FrameError> {
    for row in 0..series.filled.len() {
        if series.filled[row] {
            continue;
        }
        match policy {
            FillPolicy::Null => {}
            FillPolicy::Previous if row > 0 => series.field.values.copy_within(row - 1, row)?,
            FillPolicy::Previous => {}
            FillPolicy::Value(value) => series.field.values.set_fixed(row, *value)?,
        }
    }
    Ok(())
}
