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

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{
    interval::resolve_interval, time_range::resolve_time_range, walk, walk_mut, ChopError,
    ChopStatement,
};

/// Number of intervals in a complete chunk.
pub const CHUNK_SIZE: i32 = 60;

/// A statement is only split when its window spans at least this many
/// chunks, so at least one complete chunk exists.
pub const MIN_CHUNK_COUNT: i32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// `[start, end)` the chunk covers. `None` when the statement is forwarded
    /// intact. An open-ended statement's trailing chunk ends at the planning
    /// instant here, but its text keeps the open end.
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Ordered chunk texts for one statement, ascending in time.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn intact(text: String) -> Self {
        Self {
            chunks: vec![Chunk { text, window: None }],
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_split(&self) -> bool {
        self.chunks.len() > 1
    }
}

/// Splits `stmt` into chunks, falling back to the intact statement whenever
/// splitting is not possible or fails.
pub fn plan<S: ChopStatement>(stmt: &S, now: DateTime<Utc>) -> ChunkPlan {
    match chop(stmt, now) {
        Ok(plan) => plan,
        Err(e @ ChopError::UnsupportedInterval(_)) => {
            log::debug!("[CHOP] forwarding statement intact: {e}");
            ChunkPlan::intact(stmt.to_string())
        }
        Err(e) => {
            log::warn!("[CHOP] forwarding statement intact: {e}");
            ChunkPlan::intact(stmt.to_string())
        }
    }
}

/// Splits `stmt` along `CHUNK_SIZE` multiples of its aggregation interval.
/// Returns the intact statement when it has no interval, no lower time
/// bound, a shape that cannot be evaluated per window, or a window shorter
/// than `MIN_CHUNK_COUNT` chunks.
pub fn chop<S: ChopStatement>(stmt: &S, now: DateTime<Utc>) -> Result<ChunkPlan, ChopError> {
    let intact = || Ok(ChunkPlan::intact(stmt.to_string()));

    let interval = resolve_interval(stmt)?;
    if interval.is_zero() {
        return intact();
    }

    // now() must be an instant before the window can be inferred
    let mut reduced = stmt.clone();
    let _ = walk_mut(&mut reduced, &mut |node: &mut S| {
        node.reduce_now(now);
        Ok::<_, std::convert::Infallible>(())
    });

    if let Err(reason) = walk(&reduced, &mut |node: &S| match node.chop_hazard() {
        Some(reason) => Err(reason),
        None => Ok(()),
    }) {
        log::debug!("[CHOP] not splitting statement with {reason}");
        return intact();
    }

    let range = resolve_time_range(&reduced);
    let Some(min) = range.start else {
        return intact();
    };
    let max = range.end.unwrap_or(now);

    let (Some(chunk), Some(threshold)) = (
        interval.checked_mul(CHUNK_SIZE),
        interval.checked_mul(CHUNK_SIZE * MIN_CHUNK_COUNT),
    ) else {
        return intact();
    };
    if max - min < threshold {
        return intact();
    }

    let bounds = boundaries(min, max, chunk)?;
    let last = bounds.len() - 2;
    let mut chunks = Vec::with_capacity(bounds.len() - 1);
    for (i, pair) in bounds.windows(2).enumerate() {
        let (start, end) = (pair[0], pair[1]);
        let rewrite_end = if i == last && range.end.is_none() {
            None
        } else {
            Some(end)
        };
        let mut chunk_stmt = reduced.clone();
        walk_mut(&mut chunk_stmt, &mut |node: &mut S| {
            if node.has_time_condition() {
                node.set_time_range(start, rewrite_end)?;
            }
            Ok::<_, ChopError>(())
        })?;
        chunks.push(Chunk {
            text: chunk_stmt.to_string(),
            window: Some((start, end)),
        });
    }
    Ok(ChunkPlan { chunks })
}

/// `min`, every multiple of `chunk` since the epoch strictly inside
/// `(min, max)`, then `max`.
fn boundaries(
    min: DateTime<Utc>,
    max: DateTime<Utc>,
    chunk: Duration,
) -> Result<Vec<DateTime<Utc>>, ChopError> {
    let out_of_range = |t: DateTime<Utc>| ChopError::TimeOutOfRange(t.to_rfc3339());
    let step = chunk.num_nanoseconds().ok_or_else(|| out_of_range(max))?;
    let start = min.timestamp_nanos_opt().ok_or_else(|| out_of_range(min))?;
    let first = start
        .div_euclid(step)
        .checked_mul(step)
        .and_then(|t| t.checked_add(step))
        .ok_or_else(|| out_of_range(min))?;

    let mut bounds = vec![min];
    let mut next = Utc.timestamp_nanos(first);
    while next < max {
        bounds.push(next);
        next = next.checked_add_signed(chunk).ok_or_else(|| out_of_range(next))?;
    }
    bounds.push(max);
    Ok(bounds)
}
