// Copyright 2024 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! A compact InfluxQL front end: statement splitting, `SELECT` parsing,
//! canonical rendering and the time-predicate helpers needed to rewrite a
//! statement over a different time window.

pub mod ast;
pub mod duration;
mod parser;
pub mod time;

pub use ast::{
    BinaryOp, Dimension, Expr, Field, Fill, Measurement, MeasurementName, OtherStatement, Query,
    SelectStatement, SortOrder, Source, Statement,
};
pub use parser::parse_query;
pub use time::{has_time_expr, time_range, TimeRange};

/// Error returned when query text cannot be parsed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message} at position {pos}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the query text.
    pub pos: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Error returned when the `time()` dimension of a statement cannot be
/// reduced to a fixed interval.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IntervalError {
    #[error("time dimension expected 1 or 2 arguments")]
    Arity,
    #[error("time dimension must have duration argument")]
    NotADuration,
}

/// Error returned when the time predicate of a statement cannot be rewritten.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("time condition nested under OR cannot be rewritten: {0}")]
    TimeUnderOr(String),
    #[error("time comparison is not a range bound: {0}")]
    TimeOperator(String),
    #[error("invalid time range: start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },
}
