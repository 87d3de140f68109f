//! Time-series query pipeline.
//!
//! Raw query text goes through [`query::macros`] expansion, is executed by a
//! [`executor::QueryExecutor`], coerced into a [`table::Table`] and assembled
//! into a [`frame::Frame`]. [`fanout::Coordinator`] runs the queries of one
//! request concurrently; [`http`] exposes it over HTTP.

pub mod executor;
pub mod fanout;
pub mod frame;
pub mod http;
pub mod query;
pub mod table;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
