//! Expansion of `$name(args)` time macros into SQL.
//!
//! Recognized macros:
//!
//! | macro | arguments |
//! |---|---|
//! | `$__time(col)` | time column |
//! | `$__timeFrom()` | none |
//! | `$__timeTo()` | none |
//! | `$__timeFilter(col)` | time column |
//! | `$__timeGroup(col, interval[, fill])` | time column, bucket width, fill mode |
//!
//! Arguments are split on commas and trimmed; there is no quoting, so an
//! argument can contain neither a comma nor a closing parenthesis.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::TimeRange;
use super::dialect::Dialect;
use crate::frame::FillPolicy;
use crate::frame::fill::InvalidFillMode;

static MACRO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$([_a-zA-Z0-9]+)\(([^)]*)\)").expect("Failed to compile macro pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacroKind {
    TimeCast,
    RangeStart,
    RangeEnd,
    RangeFilter,
    TimeBucket,
}

struct MacroSpec {
    name: &'static str,
    kind: MacroKind,
    required: &'static [&'static str],
    optional: usize,
}

impl MacroSpec {
    fn max_args(&self) -> usize {
        self.required.len() + self.optional
    }

    fn arity(&self) -> String {
        match self.optional {
            0 => self.required.len().to_string(),
            n => format!("{} to {}", self.required.len(), self.required.len() + n),
        }
    }
}

static MACROS: [MacroSpec; 5] = [
    MacroSpec {
        name: "__time",
        kind: MacroKind::TimeCast,
        required: &["time column"],
        optional: 0,
    },
    MacroSpec {
        name: "__timeFrom",
        kind: MacroKind::RangeStart,
        required: &[],
        optional: 0,
    },
    MacroSpec {
        name: "__timeTo",
        kind: MacroKind::RangeEnd,
        required: &[],
        optional: 0,
    },
    MacroSpec {
        name: "__timeFilter",
        kind: MacroKind::RangeFilter,
        required: &["time column"],
        optional: 0,
    },
    MacroSpec {
        name: "__timeGroup",
        kind: MacroKind::TimeBucket,
        required: &["time column", "interval"],
        optional: 1,
    },
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MacroError {
    #[error("unsupported macro [${0}]")]
    UnknownMacro(String),

    #[error("macro [${name}] takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("macro [${name}] is missing its {argument} argument")]
    MissingArgument { name: String, argument: &'static str },

    #[error("invalid interval [{literal}]: {reason}")]
    InvalidInterval { literal: String, reason: String },

    #[error(transparent)]
    InvalidFill(#[from] InvalidFillMode),

    #[error("macro [$__timeGroup] can only be used once per query")]
    DuplicateBucket,
}

/// State threaded through one expansion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroContext {
    pub range: TimeRange,
    /// Effective bucket width; starts as the requested interval.
    pub interval: Duration,
    /// Set when the bucketing macro was given a fill mode.
    pub fill: Option<FillPolicy>,
    pub bucket_used: bool,
}

impl MacroContext {
    pub fn new(range: TimeRange, interval: Duration) -> Self {
        Self {
            range,
            interval,
            fill: None,
            bucket_used: false,
        }
    }
}

/// Split a raw argument list on commas, trimming each argument.
///
/// An empty list yields no arguments.
pub fn split_args(raw: &str) -> Vec<&str> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::trim).collect()
}

/// Parse a bucket width such as `5m`, `'1h'` or `"30s"`.
pub fn parse_interval(literal: &str) -> Result<Duration, MacroError> {
    let invalid = |reason: String| MacroError::InvalidInterval {
        literal: literal.to_string(),
        reason,
    };

    let trimmed = literal.trim_matches(|c| c == '\'' || c == '"');
    let interval = humantime::parse_duration(trimmed).map_err(|e| invalid(e.to_string()))?;

    if interval.as_secs() == 0 || interval.subsec_nanos() != 0 {
        return Err(invalid("must be a whole number of seconds".to_string()));
    }
    Ok(interval)
}

#[derive(Clone, Copy)]
pub struct MacroExpander {
    dialect: &'static dyn Dialect,
}

impl std::fmt::Debug for MacroExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroExpander").finish_non_exhaustive()
    }
}

impl MacroExpander {
    pub fn new(dialect: &'static dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Replace every macro in `raw` with its SQL fragment.
    ///
    /// Text between macros is copied unchanged. The first failing macro
    /// aborts the whole expansion.
    pub fn expand(
        &self,
        raw: &str,
        mut ctx: MacroContext,
    ) -> Result<(String, MacroContext), MacroError> {
        let mut sql = String::with_capacity(raw.len());
        let mut last = 0;

        for captures in MACRO_PATTERN.captures_iter(raw) {
            let Some(span) = captures.get(0) else {
                continue;
            };
            sql.push_str(&raw[last..span.start()]);
            sql.push_str(&self.expand_one(&captures, &mut ctx)?);
            last = span.end();
        }
        sql.push_str(&raw[last..]);

        Ok((sql, ctx))
    }

    fn expand_one(
        &self,
        captures: &Captures<'_>,
        ctx: &mut MacroContext,
    ) -> Result<String, MacroError> {
        let name = captures.get(1).map_or("", |m| m.as_str());
        let args = split_args(captures.get(2).map_or("", |m| m.as_str()));

        let spec = MACROS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| MacroError::UnknownMacro(name.to_string()))?;

        if args.len() < spec.required.len() || args.len() > spec.max_args() {
            return Err(MacroError::Arity {
                name: name.to_string(),
                expected: spec.arity(),
                found: args.len(),
            });
        }
        if let Some((_, argument)) = args
            .iter()
            .zip(spec.required)
            .find(|(arg, _)| arg.is_empty())
        {
            return Err(MacroError::MissingArgument {
                name: name.to_string(),
                argument: *argument,
            });
        }

        let fragment = match spec.kind {
            MacroKind::TimeCast => self.dialect.time_column(args[0]),
            MacroKind::RangeStart => self.dialect.timestamp_literal(&ctx.range.from),
            MacroKind::RangeEnd => self.dialect.timestamp_literal(&ctx.range.to),
            MacroKind::RangeFilter => {
                self.dialect
                    .time_filter(args[0], &ctx.range.from, &ctx.range.to)
            }
            MacroKind::TimeBucket => {
                if ctx.bucket_used {
                    return Err(MacroError::DuplicateBucket);
                }
                let interval = parse_interval(args[1])?;
                let fill = args.get(2).map(|mode| mode.parse::<FillPolicy>()).transpose()?;

                ctx.bucket_used = true;
                ctx.interval = interval;
                if fill.is_some() {
                    ctx.fill = fill;
                }
                self.dialect.time_bucket(args[0], interval.as_secs())
            }
        };

        Ok(fragment)
    }
}
