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

//! Splitting of `SELECT` statements into grid-aligned time chunks.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use influxql::{
    time::{has_non_range_time_expr, has_unresolved_time_expr},
    Expr, Fill, IntervalError, RewriteError, SelectStatement, SortOrder, TimeRange,
};

pub mod chopper;
pub mod interval;
pub mod time_range;

pub use chopper::{chop, plan, Chunk, ChunkPlan, CHUNK_SIZE, MIN_CHUNK_COUNT};

#[derive(Debug, thiserror::Error)]
pub enum ChopError {
    #[error("unsupported group by interval: {0}")]
    UnsupportedInterval(String),
    #[error("chunk rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
    #[error("time {0} is out of the supported range")]
    TimeOutOfRange(String),
}

impl From<IntervalError> for ChopError {
    fn from(e: IntervalError) -> Self {
        ChopError::UnsupportedInterval(e.to_string())
    }
}

/// Operations the chopper needs from a statement tree node. Every method
/// looks at the node itself only, sub-queries are reached through
/// [`walk`] and [`walk_mut`].
pub trait ChopStatement: Clone + fmt::Display {
    fn subqueries(&self) -> Vec<&Self>;

    fn subqueries_mut(&mut self) -> Vec<&mut Self>;

    fn is_raw_query(&self) -> bool;

    fn group_by_interval(&self) -> Result<Option<Duration>, IntervalError>;

    /// Window selected by the node's own condition.
    fn time_range(&self) -> TimeRange;

    fn has_time_condition(&self) -> bool;

    fn set_time_range(
        &mut self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), RewriteError>;

    /// Replaces `now()` in the node's own condition.
    fn reduce_now(&mut self, now: DateTime<Utc>);

    /// Why evaluating the node per window would differ from evaluating it
    /// over the whole window, if it would.
    fn chop_hazard(&self) -> Option<String>;
}

/// Visits `stmt` and then each sub-query, depth first, in source order.
pub fn walk<S, E, F>(stmt: &S, f: &mut F) -> Result<(), E>
where
    S: ChopStatement,
    F: FnMut(&S) -> Result<(), E>,
{
    f(stmt)?;
    for sub in stmt.subqueries() {
        walk(sub, f)?;
    }
    Ok(())
}

pub fn walk_mut<S, E, F>(stmt: &mut S, f: &mut F) -> Result<(), E>
where
    S: ChopStatement,
    F: FnMut(&mut S) -> Result<(), E>,
{
    f(stmt)?;
    for sub in stmt.subqueries_mut() {
        walk_mut(sub, f)?;
    }
    Ok(())
}

/// Functions whose output for one bucket depends on neighbouring buckets.
const CROSS_BUCKET_FUNCTIONS: &[&str] = &[
    "derivative",
    "non_negative_derivative",
    "difference",
    "non_negative_difference",
    "moving_average",
    "cumulative_sum",
    "elapsed",
    "holt_winters",
    "holt_winters_with_fit",
    "exponential_moving_average",
    "double_exponential_moving_average",
    "triple_exponential_moving_average",
    "triple_exponential_derivative",
    "relative_strength_index",
    "chande_momentum_oscillator",
    "kaufmans_efficiency_ratio",
    "kaufmans_adaptive_moving_average",
];

impl ChopStatement for SelectStatement {
    fn subqueries(&self) -> Vec<&Self> {
        SelectStatement::subqueries(self).collect()
    }

    fn subqueries_mut(&mut self) -> Vec<&mut Self> {
        SelectStatement::subqueries_mut(self).collect()
    }

    fn is_raw_query(&self) -> bool {
        SelectStatement::is_raw_query(self)
    }

    fn group_by_interval(&self) -> Result<Option<Duration>, IntervalError> {
        SelectStatement::group_by_interval(self)
    }

    fn time_range(&self) -> TimeRange {
        SelectStatement::time_range(self)
    }

    fn has_time_condition(&self) -> bool {
        SelectStatement::has_time_condition(self)
    }

    fn set_time_range(
        &mut self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), RewriteError> {
        SelectStatement::set_time_range(self, start, end)
    }

    fn reduce_now(&mut self, now: DateTime<Utc>) {
        if let Some(cond) = &self.condition {
            self.condition = Some(cond.reduce(now));
        }
    }

    fn chop_hazard(&self) -> Option<String> {
        if let Some(into) = &self.into {
            return Some(format!("INTO {into}"));
        }
        if self.order == Some(SortOrder::Desc) {
            return Some("ORDER BY time DESC".to_string());
        }
        if self.limit.is_some()
            || self.offset.is_some()
            || self.slimit.is_some()
            || self.soffset.is_some()
        {
            return Some("LIMIT/OFFSET".to_string());
        }
        if let Some(fill @ (Fill::Previous | Fill::Linear)) = &self.fill {
            return Some(fill.to_string());
        }
        match self.group_by_offset() {
            None => {}
            Some(Expr::Duration(d)) if d.is_zero() => {}
            Some(offset) => return Some(format!("time() offset {offset}")),
        }
        if let Some(tz) = &self.timezone {
            return Some(format!("tz('{tz}')"));
        }
        if let Some(name) = self.function_names().into_iter().find(|name| {
            CROSS_BUCKET_FUNCTIONS
                .iter()
                .any(|f| f.eq_ignore_ascii_case(name))
        }) {
            return Some(format!("{name}()"));
        }
        if self.condition.as_ref().is_some_and(has_non_range_time_expr) {
            return Some("time compared with a non-range operator".to_string());
        }
        if self.condition.as_ref().is_some_and(has_unresolved_time_expr) {
            return Some("time bound is not a literal".to_string());
        }
        None
    }
}
