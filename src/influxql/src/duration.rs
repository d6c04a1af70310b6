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

//! Duration literals: `10s`, `1h30m`, `500ms`, `2w`.

use chrono::Duration;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res, value},
    multi::many1,
    IResult, Parser,
};

const NANOSECOND: i64 = 1;
const MICROSECOND: i64 = 1_000 * NANOSECOND;
const MILLISECOND: i64 = 1_000 * MICROSECOND;
const SECOND: i64 = 1_000 * MILLISECOND;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

// Largest first, used when rendering.
const UNITS: [(&str, i64); 8] = [
    ("w", WEEK),
    ("d", DAY),
    ("h", HOUR),
    ("m", MINUTE),
    ("s", SECOND),
    ("ms", MILLISECOND),
    ("u", MICROSECOND),
    ("ns", NANOSECOND),
];

fn unit(input: &str) -> IResult<&str, i64> {
    alt((
        value(NANOSECOND, tag("ns")),
        value(MILLISECOND, tag("ms")),
        value(MICROSECOND, alt((tag("u"), tag("µ")))),
        value(SECOND, tag("s")),
        value(MINUTE, tag("m")),
        value(HOUR, tag("h")),
        value(DAY, tag("d")),
        value(WEEK, tag("w")),
    ))
    .parse(input)
}

fn duration_parts(input: &str) -> IResult<&str, Vec<(i64, i64)>> {
    all_consuming(many1((
        map_res(digit1, |s: &str| s.parse::<i64>()),
        unit,
    )))
    .parse(input)
}

/// Parses a duration literal made of one or more `<integer><unit>` pairs.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let (_, parts) = duration_parts(s).ok()?;
    parts
        .into_iter()
        .try_fold(0i64, |total, (n, unit)| total.checked_add(n.checked_mul(unit)?))
        .map(Duration::nanoseconds)
}

/// Renders a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let Some(nanos) = d.num_nanoseconds() else {
        // Out of nanosecond range, fall back to whole seconds.
        return format!("{}s", d.num_seconds());
    };
    if nanos == 0 {
        return "0s".to_string();
    }
    for (unit, size) in UNITS {
        if nanos % size == 0 {
            return format!("{}{}", nanos / size, unit);
        }
    }
    format!("{nanos}ns")
}
