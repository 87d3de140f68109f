//! SQL fragments generated by the time macros, per target engine.

use chrono::{DateTime, SecondsFormat, Utc};
use common::config::SqlDialect;

pub trait Dialect: Send + Sync {
    /// Cast `column` to a timestamp aliased as `time`.
    fn time_column(&self, column: &str) -> String;

    fn timestamp_literal(&self, time: &DateTime<Utc>) -> String;

    /// Epoch-aligned bucket of `column` of `seconds` width.
    fn time_bucket(&self, column: &str, seconds: u64) -> String;

    /// Inclusive range filter over `column`.
    fn time_filter(&self, column: &str, from: &DateTime<Utc>, to: &DateTime<Utc>) -> String {
        format!(
            "{column} BETWEEN {} AND {}",
            self.timestamp_literal(from),
            self.timestamp_literal(to)
        )
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Snowflake;

impl Dialect for Snowflake {
    fn time_column(&self, column: &str) -> String {
        format!("TO_TIMESTAMP_NTZ({column}) AS time")
    }

    fn timestamp_literal(&self, time: &DateTime<Utc>) -> String {
        format!("'{}'", rfc3339(time))
    }

    fn time_bucket(&self, column: &str, seconds: u64) -> String {
        format!("TIME_SLICE(TO_TIMESTAMP_NTZ({column}), {seconds}, 'SECOND', 'START')")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataFusion;

impl Dialect for DataFusion {
    fn time_column(&self, column: &str) -> String {
        format!("CAST({column} AS TIMESTAMP) AS time")
    }

    fn timestamp_literal(&self, time: &DateTime<Utc>) -> String {
        format!("TIMESTAMP '{}'", rfc3339(time))
    }

    fn time_bucket(&self, column: &str, seconds: u64) -> String {
        format!(
            "date_bin(INTERVAL '{seconds} seconds', CAST({column} AS TIMESTAMP), TIMESTAMP '1970-01-01T00:00:00Z')"
        )
    }
}

pub fn dialect_for(dialect: SqlDialect) -> &'static dyn Dialect {
    match dialect {
        SqlDialect::Snowflake => &Snowflake,
        SqlDialect::DataFusion => &DataFusion,
    }
}
