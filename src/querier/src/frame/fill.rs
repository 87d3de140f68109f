use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Frame, FrameError};
use crate::query::TimeRange;

/// How values are synthesized for a time bucket without a real row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FillPolicy {
    #[default]
    Null,
    /// Repeat the most recently emitted row.
    Previous,
    /// A constant for numeric fields; null elsewhere.
    Value(f64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid fill mode [{0}]: expected null, previous or a number")]
pub struct InvalidFillMode(pub String);

impl FromStr for FillPolicy {
    type Err = InvalidFillMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(Self::Null),
            "previous" => Ok(Self::Previous),
            _ => s
                .parse::<f64>()
                .map(Self::Value)
                .map_err(|_| InvalidFillMode(s.to_string())),
        }
    }
}

/// Upper bound on the buckets a single gap fill may walk.
pub const MAX_FILL_BUCKETS: u64 = 1_000_000;

/// Epoch-aligned start of the bucket holding `secs`.
fn bucket_floor(secs: i64, interval: i64) -> i64 {
    secs.div_euclid(interval) * interval
}

/// Walk every bucket of `range` and emit one row per bucket.
///
/// A bucket matching the current real row emits that row; any other bucket
/// gets a synthesized row with the bucket as its time. Real rows off the
/// bucket grid are dropped. The last real row is kept as the match candidate
/// once reached.
pub fn fill_missing_points(
    frame: &Frame,
    time_index: usize,
    range: &TimeRange,
    interval: Duration,
    policy: &FillPolicy,
) -> Result<Frame, FrameError> {
    let step = i64::try_from(interval.as_secs())
        .ok()
        .filter(|step| *step > 0)
        .ok_or(FrameError::InvalidInterval)?;

    let end = range.to.timestamp();
    let start = bucket_floor(range.from.timestamp(), step);
    let buckets = if end < start {
        0
    } else {
        (end - start).unsigned_abs() / step.unsigned_abs() + 1
    };
    if buckets > MAX_FILL_BUCKETS {
        return Err(FrameError::TooManyBuckets {
            buckets,
            max: MAX_FILL_BUCKETS,
        });
    }

    let times = frame.times(time_index)?;
    if times.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(FrameError::NotSortedByTime);
    }

    let mut out = frame.empty_copy();
    if times.is_empty() {
        return Ok(out);
    }

    let last = times.len() - 1;
    let mut cursor = 0;
    let mut curr = start;

    while curr <= end {
        let bucket =
            DateTime::<Utc>::from_timestamp(curr, 0).ok_or(FrameError::TimeOutOfRange(curr))?;

        while cursor < last && times[cursor] < bucket {
            cursor += 1;
        }

        if times[cursor] == bucket {
            out.push_row_from(frame, cursor)?;
            if cursor < last {
                cursor += 1;
            }
        } else {
            push_missing(&mut out, time_index, bucket, policy)?;
        }

        curr += step;
    }

    Ok(out)
}

fn push_missing(
    out: &mut Frame,
    time_index: usize,
    bucket: DateTime<Utc>,
    policy: &FillPolicy,
) -> Result<(), FrameError> {
    for (index, field) in out.fields.iter_mut().enumerate() {
        if index == time_index {
            field.values.push_timestamp(bucket)?;
            continue;
        }
        match policy {
            FillPolicy::Null => field.values.push_null(),
            FillPolicy::Previous => field.values.push_repeat_last(),
            FillPolicy::Value(value) => field.values.push_fixed(*value),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Field, Values};
    use chrono::TimeZone;

    const T0: i64 = 1_704_067_200;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(T0 + secs, 0).unwrap()
    }

    fn sparse_frame() -> Frame {
        Frame::new("response").with_fields(vec![
            Field::new("time", Values::Timestamp(vec![Some(at(0)), Some(at(3))])),
            Field::new("value", Values::Integer(vec![Some(5), Some(9)])),
        ])
    }

    fn fill(frame: &Frame, from: i64, to: i64, policy: FillPolicy) -> Result<Frame, FrameError> {
        fill_missing_points(
            frame,
            0,
            &TimeRange::new(at(from), at(to)),
            Duration::from_secs(1),
            &policy,
        )
    }

    #[test]
    fn test_null_fill_synthesizes_empty_buckets() {
        let filled = fill(&sparse_frame(), 0, 3, FillPolicy::Null).unwrap();

        assert_eq!(filled.row_len(), 4);
        assert_eq!(
            filled.fields[0].values,
            Values::Timestamp((0..4).map(|s| Some(at(s))).collect())
        );
        assert_eq!(
            filled.fields[1].values,
            Values::Integer(vec![Some(5), None, None, Some(9)])
        );
    }

    #[test]
    fn test_previous_fill_repeats_last_emitted_row() {
        let filled = fill(&sparse_frame(), 0, 3, FillPolicy::Previous).unwrap();

        assert_eq!(
            filled.fields[1].values,
            Values::Integer(vec![Some(5), Some(5), Some(5), Some(9)])
        );
    }

    #[test]
    fn test_previous_fill_without_prior_row_is_null() {
        let filled = fill(&sparse_frame(), -1, 1, FillPolicy::Previous).unwrap();

        assert_eq!(
            filled.fields[1].values,
            Values::Integer(vec![None, Some(5), Some(5)])
        );
    }

    #[test]
    fn test_value_fill_uses_constant() {
        let frame = Frame::new("response").with_fields(vec![
            Field::new("time", Values::Timestamp(vec![Some(at(0))])),
            Field::new("value", Values::Float(vec![Some(1.0)])),
            Field::new("note", Values::String(vec![Some("x".into())])),
        ]);

        let filled = fill(&frame, 0, 1, FillPolicy::Value(0.5)).unwrap();

        assert_eq!(filled.fields[1].values, Values::Float(vec![Some(1.0), Some(0.5)]));
        assert_eq!(
            filled.fields[2].values,
            Values::String(vec![Some("x".into()), None])
        );
    }

    #[test]
    fn test_last_row_is_kept_after_range_end_of_data() {
        let filled = fill(&sparse_frame(), 0, 5, FillPolicy::Previous).unwrap();

        assert_eq!(filled.row_len(), 6);
        assert_eq!(
            filled.fields[1].values,
            Values::Integer(vec![Some(5), Some(5), Some(5), Some(9), Some(9), Some(9)])
        );
    }

    #[test]
    fn test_range_start_is_floored_to_bucket() {
        let frame = Frame::new("response").with_fields(vec![
            Field::new("time", Values::Timestamp(vec![Some(at(60))])),
            Field::new("value", Values::Integer(vec![Some(1)])),
        ]);

        let filled = fill_missing_points(
            &frame,
            0,
            &TimeRange::new(at(90), at(150)),
            Duration::from_secs(60),
            &FillPolicy::Null,
        )
        .unwrap();

        assert_eq!(
            filled.fields[0].values,
            Values::Timestamp(vec![Some(at(60)), Some(at(120))])
        );
        assert_eq!(filled.fields[1].values, Values::Integer(vec![Some(1), None]));
    }

    #[test]
    fn test_off_grid_rows_are_dropped() {
        let frame = Frame::new("response").with_fields(vec![
            Field::new(
                "time",
                Values::Timestamp(vec![Some(at(0)), Some(at(30)), Some(at(60))]),
            ),
            Field::new("value", Values::Integer(vec![Some(1), Some(2), Some(3)])),
        ]);

        let filled = fill_missing_points(
            &frame,
            0,
            &TimeRange::new(at(0), at(60)),
            Duration::from_secs(60),
            &FillPolicy::Null,
        )
        .unwrap();

        assert_eq!(filled.fields[1].values, Values::Integer(vec![Some(1), Some(3)]));
    }

    #[test]
    fn test_unsorted_rows_are_rejected() {
        let frame = Frame::new("response").with_fields(vec![
            Field::new("time", Values::Timestamp(vec![Some(at(3)), Some(at(0))])),
            Field::new("value", Values::Integer(vec![Some(1), Some(2)])),
        ]);

        assert_eq!(
            fill(&frame, 0, 3, FillPolicy::Null),
            Err(FrameError::NotSortedByTime)
        );
    }

    #[test]
    fn test_sub_second_interval_is_rejected() {
        let result = fill_missing_points(
            &sparse_frame(),
            0,
            &TimeRange::new(at(0), at(3)),
            Duration::from_millis(500),
            &FillPolicy::Null,
        );

        assert_eq!(result, Err(FrameError::InvalidInterval));
    }

    #[test]
    fn test_bucket_count_is_bounded() {
        let result = fill(&sparse_frame(), 0, 2_000_000, FillPolicy::Null);

        assert_eq!(
            result,
            Err(FrameError::TooManyBuckets {
                buckets: 2_000_001,
                max: MAX_FILL_BUCKETS
            })
        );
    }

    #[test]
    fn test_fill_policy_from_str() {
        assert_eq!("NULL".parse::<FillPolicy>(), Ok(FillPolicy::Null));
        assert_eq!("Previous".parse::<FillPolicy>(), Ok(FillPolicy::Previous));
        assert_eq!("-1.5".parse::<FillPolicy>(), Ok(FillPolicy::Value(-1.5)));
        assert!("zero".parse::<FillPolicy>().is_err());
    }
}
