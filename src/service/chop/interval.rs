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

//! Aggregation interval arithmetic. A zero duration stands for "no
//! periodicity requirement".

use chrono::Duration;

use super::{walk, ChopError, ChopStatement};

fn nanos(d: Duration) -> i64 {
    d.num_nanoseconds().unwrap_or(i64::MAX).abs()
}

pub fn gcd(a: Duration, b: Duration) -> Duration {
    let (mut a, mut b) = (nanos(a), nanos(b));
    while b != 0 {
        (a, b) = (b, a % b);
    }
    Duration::nanoseconds(a)
}

/// Least common multiple; a zero operand yields the other one. Zero is also
/// returned when the result does not fit, which disables chopping.
pub fn lcm(a: Duration, b: Duration) -> Duration {
    if a.is_zero() {
        return b;
    }
    if b.is_zero() {
        return a;
    }
    let g = nanos(gcd(a, b));
    (nanos(a) / g)
        .checked_mul(nanos(b))
        .map(Duration::nanoseconds)
        .unwrap_or_else(Duration::zero)
}

/// Interval every chunk boundary of the statement must be a multiple of:
/// the lcm of the `time()` intervals found in the whole tree. Zero when no
/// node groups by time.
pub fn resolve_interval<S: ChopStatement>(stmt: &S) -> Result<Duration, ChopError> {
    let mut interval = Duration::zero();
    walk(stmt, &mut |node: &S| {
        match node.group_by_interval()? {
            Some(i) => interval = lcm(interval, i),
            // selectors and aggregates over the whole window
            None if !node.is_raw_query() => {
                return Err(ChopError::UnsupportedInterval(
                    "aggregate without time() dimension".to_string(),
                ));
            }
            None => {}
        }
        Ok(())
    })?;
    Ok(interval)
}
