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

//! Time predicates: inferring the window a condition selects, reducing
//! `now()` to an absolute instant and rewriting the window.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::{
    ast::{BinaryOp, Expr, SelectStatement},
    RewriteError,
};

/// Half-open `[start, end)` window. `None` means unbounded on that side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Window selected by both ranges.
    pub fn intersect(self, other: TimeRange) -> TimeRange {
        TimeRange {
            start: match (self.start, other.start) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            end: match (self.end, other.end) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Smallest window covering both ranges.
    pub fn union(self, other: TimeRange) -> TimeRange {
        TimeRange {
            start: match (self.start, other.start) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            },
            end: match (self.end, other.end) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }
}

/// Window implied by the `time` comparisons of a condition.
pub fn time_range(expr: &Expr) -> TimeRange {
    match expr {
        Expr::Paren(e) => time_range(e),
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => time_range(lhs).intersect(time_range(rhs)),
        Expr::Binary {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => time_range(lhs).union(time_range(rhs)),
        Expr::Binary { op, lhs, rhs } if is_range_op(*op) => comparison_range(*op, lhs, rhs),
        _ => TimeRange::default(),
    }
}

fn comparison_range(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> TimeRange {
    let (op, value) = if lhs.is_time_ref() {
        (op, rhs)
    } else if rhs.is_time_ref() {
        (flip(op), lhs)
    } else {
        return TimeRange::default();
    };
    let Some(t) = literal_time(value) else {
        return TimeRange::default();
    };
    let next = t.checked_add_signed(Duration::nanoseconds(1));
    match op {
        BinaryOp::Gt => TimeRange::new(next, None),
        BinaryOp::Gte => TimeRange::new(Some(t), None),
        BinaryOp::Lt => TimeRange::new(None, Some(t)),
        BinaryOp::Lte => TimeRange::new(None, next),
        BinaryOp::Eq => TimeRange::new(Some(t), next),
        _ => TimeRange::default(),
    }
}

fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Gte => BinaryOp::Lte,
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Lte => BinaryOp::Gte,
        other => other,
    }
}

/// Resolves an expression compared against `time` to an instant.
fn literal_time(expr: &Expr) -> Option<DateTime<Utc>> {
    match expr {
        Expr::Time(t) => Some(*t),
        Expr::String(s) => parse_time_string(s),
        Expr::Integer(n) => Some(Utc.timestamp_nanos(*n)),
        Expr::Duration(d) => Some(Utc.timestamp_nanos(d.num_nanoseconds()?)),
        Expr::Paren(e) => literal_time(e),
        Expr::Binary { op, lhs, rhs } => match (literal_time(lhs), rhs.as_ref(), op) {
            (Some(t), Expr::Duration(d), BinaryOp::Add) => t.checked_add_signed(*d),
            (Some(t), Expr::Duration(d), BinaryOp::Sub) => t.checked_sub_signed(*d),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts RFC3339 and the `YYYY-MM-DD[ HH:MM:SS[.fff]]` forms, as UTC.
pub fn parse_time_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Operators that bound `time` to a single interval.
fn is_range_op(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
    )
}

fn compares_time(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            lhs.is_time_ref() || rhs.is_time_ref()
        }
        _ => false,
    }
}

fn is_time_comparison(expr: &Expr) -> bool {
    matches!(expr, Expr::Binary { op, .. } if is_range_op(*op)) && compares_time(expr)
}

/// True when `time` is compared with an operator that does not describe an
/// interval, such as `!=` or `=~`.
pub fn has_non_range_time_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Paren(e) => has_non_range_time_expr(e),
        Expr::Binary {
            op: BinaryOp::And | BinaryOp::Or,
            lhs,
            rhs,
        } => has_non_range_time_expr(lhs) || has_non_range_time_expr(rhs),
        e => compares_time(e) && !is_time_comparison(e),
    }
}

/// True when the condition compares `time` anywhere.
pub fn has_time_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Paren(e) => has_time_expr(e),
        Expr::Binary {
            op: BinaryOp::And | BinaryOp::Or,
            lhs,
            rhs,
        } => has_time_expr(lhs) || has_time_expr(rhs),
        e => is_time_comparison(e),
    }
}

/// True when some `time` comparison has a value that does not resolve to an
/// instant, e.g. a bound parameter or an unreduced `now()`.
pub fn has_unresolved_time_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Paren(e) => has_unresolved_time_expr(e),
        Expr::Binary {
            op: BinaryOp::And | BinaryOp::Or,
            lhs,
            rhs,
        } => has_unresolved_time_expr(lhs) || has_unresolved_time_expr(rhs),
        Expr::Binary { lhs, rhs, .. } if is_time_comparison(expr) => {
            let value = if lhs.is_time_ref() { rhs } else { lhs };
            literal_time(value).is_none()
        }
        _ => false,
    }
}

impl Expr {
    /// Replaces `now()` with `now` and folds constant time arithmetic.
    pub fn reduce(&self, now: DateTime<Utc>) -> Expr {
        match self {
            Expr::Call { name, args } if args.is_empty() && name.eq_ignore_ascii_case("now") => {
                Expr::Time(now)
            }
            Expr::Call { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(|a| a.reduce(now)).collect(),
            },
            Expr::Paren(e) => match e.reduce(now) {
                lit @ (Expr::Time(_) | Expr::Duration(_) | Expr::Integer(_)) => lit,
                other => Expr::Paren(Box::new(other)),
            },
            Expr::Binary { op, lhs, rhs } => fold(*op, lhs.reduce(now), rhs.reduce(now)),
            other => other.clone(),
        }
    }
}

fn fold(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let folded = match (&lhs, op, &rhs) {
        (Expr::Time(t), BinaryOp::Add, Expr::Duration(d))
        | (Expr::Duration(d), BinaryOp::Add, Expr::Time(t)) => {
            t.checked_add_signed(*d).map(Expr::Time)
        }
        (Expr::Time(t), BinaryOp::Sub, Expr::Duration(d)) => {
            t.checked_sub_signed(*d).map(Expr::Time)
        }
        (Expr::String(s), BinaryOp::Add | BinaryOp::Sub, Expr::Duration(_)) => {
            return match parse_time_string(s) {
                Some(t) => fold(op, Expr::Time(t), rhs),
                None => Expr::binary(op, lhs, rhs),
            };
        }
        (Expr::Duration(a), BinaryOp::Add, Expr::Duration(b)) => {
            a.checked_add(b).map(Expr::Duration)
        }
        (Expr::Duration(a), BinaryOp::Sub, Expr::Duration(b)) => {
            a.checked_sub(b).map(Expr::Duration)
        }
        (Expr::Integer(a), BinaryOp::Add, Expr::Integer(b)) => a.checked_add(*b).map(Expr::Integer),
        (Expr::Integer(a), BinaryOp::Sub, Expr::Integer(b)) => a.checked_sub(*b).map(Expr::Integer),
        (Expr::Integer(a), BinaryOp::Mul, Expr::Integer(b)) => a.checked_mul(*b).map(Expr::Integer),
        _ => None,
    };
    folded.unwrap_or_else(|| Expr::binary(op, lhs, rhs))
}

/// Removes every `time` comparison from a conjunction.
fn strip_time(expr: &Expr) -> Result<Option<Expr>, RewriteError> {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => Ok(match (strip_time(lhs)?, strip_time(rhs)?) {
            (Some(l), Some(r)) => Some(Expr::binary(BinaryOp::And, l, r)),
            (Some(e), None) | (None, Some(e)) => Some(e),
            (None, None) => None,
        }),
        Expr::Paren(inner) => Ok(strip_time(inner)?.map(|e| Expr::Paren(Box::new(e)))),
        Expr::Binary {
            op: BinaryOp::Or, ..
        } if has_time_expr(expr) => Err(RewriteError::TimeUnderOr(expr.to_string())),
        e if is_time_comparison(e) => Ok(None),
        e if compares_time(e) => Err(RewriteError::TimeOperator(e.to_string())),
        e => Ok(Some(e.clone())),
    }
}

impl SelectStatement {
    /// Replaces `now()` in this statement and every sub-query.
    pub fn reduce(&mut self, now: DateTime<Utc>) {
        if let Some(cond) = &self.condition {
            self.condition = Some(cond.reduce(now));
        }
        for sub in self.subqueries_mut() {
            sub.reduce(now);
        }
    }

    /// Window selected by this statement's own condition.
    pub fn time_range(&self) -> TimeRange {
        self.condition.as_ref().map(time_range).unwrap_or_default()
    }

    pub fn has_time_condition(&self) -> bool {
        self.condition.as_ref().is_some_and(has_time_expr)
    }

    /// Replaces the time bounds of this statement's own condition with
    /// `time >= start [AND time < end]`, keeping every other predicate.
    pub fn set_time_range(
        &mut self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), RewriteError> {
        if let Some(end) = end {
            if end <= start {
                return Err(RewriteError::EmptyRange {
                    start: start.to_rfc3339(),
                    end: end.to_rfc3339(),
                });
            }
        }
        let rest = match &self.condition {
            Some(cond) => strip_time(cond)?,
            None => None,
        };
        let mut bound = Expr::binary(BinaryOp::Gte, Expr::var("time"), Expr::Time(start));
        if let Some(end) = end {
            bound = Expr::binary(
                BinaryOp::And,
                bound,
                Expr::binary(BinaryOp::Lt, Expr::var("time"), Expr::Time(end)),
            );
        }
        self.condition = Some(match rest {
            Some(rest @ Expr::Binary {
                op: BinaryOp::Or, ..
            }) => Expr::binary(BinaryOp::And, Expr::Paren(Box::new(rest)), bound),
            Some(rest) => Expr::binary(BinaryOp::And, rest, bound),
            None => bound,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use collapse::*;

    use super::*;
    use crate::{parse_query, Statement};

    fn select(text: &str) -> SelectStatement {
        match parse_query(text).unwrap().statements.remove(0) {
            Statement::Select(s) => *s,
            other => panic!("expected SELECT, got {other:?}"),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_time_string(s).unwrap()
    }

    #[test]
    fn range_from_comparisons() {
        let stmt = select(
            "SELECT v FROM m WHERE time >= '2024-01-01T00:00:00Z' AND time < '2024-01-02T00:00:00Z'",
        );
        assert_eq!(
            stmt.time_range(),
            TimeRange::new(Some(at("2024-01-01T00:00:00Z")), Some(at("2024-01-02T00:00:00Z")))
        );

        let stmt = select("SELECT v FROM m WHERE time > '2024-01-01' AND host = 'a'");
        let r = stmt.time_range();
        assert_eq!(
            r.start,
            Some(at("2024-01-01T00:00:00Z") + Duration::nanoseconds(1))
        );
        assert_eq!(r.end, None);

        let stmt = select("SELECT v FROM m WHERE '2024-01-01 10:00:00' >= time");
        assert_eq!(
            stmt.time_range(),
            TimeRange::new(None, Some(at("2024-01-01T10:00:00Z") + Duration::nanoseconds(1)))
        );

        let stmt = select("SELECT v FROM m WHERE time = 1000000000");
        assert_eq!(
            stmt.time_range().start,
            Some(at("1970-01-01T00:00:01Z"))
        );
    }

    #[test]
    fn range_intersects_and_unions() {
        let stmt = select(
            "SELECT v FROM m WHERE (time > '2024-01-01T00:00:00Z' OR time > '2024-01-05T00:00:00Z') AND time >= '2024-01-02T00:00:00Z'",
        );
        assert_eq!(stmt.time_range().start, Some(at("2024-01-02T00:00:00Z")));

        let stmt = select("SELECT v FROM m WHERE time > '2024-01-01T00:00:00Z' OR host = 'a'");
        assert_eq!(stmt.time_range(), TimeRange::default());

        let stmt = select("SELECT v FROM m WHERE host = 'a'");
        assert_eq!(stmt.time_range(), TimeRange::default());
        assert!(!stmt.has_time_condition());
    }

    #[test]
    fn reduce_now() {
        let mut stmt = select(
            "SELECT mean(v) FROM m WHERE host = 'a' AND time > now() - 1h GROUP BY time(1m)",
        );
        stmt.reduce(at("2024-01-01T12:00:00Z"));
        collapsed_eq!(
            &stmt.to_string(),
            r#"SELECT mean(v) FROM m WHERE host = 'a' AND time > '2024-01-01T11:00:00Z' GROUP BY time(1m)"#
        );
        assert!(!has_unresolved_time_expr(stmt.condition.as_ref().unwrap()));
    }

    #[test]
    fn reduce_reaches_subqueries() {
        let mut stmt = select("SELECT max(v) FROM (SELECT v FROM m WHERE time > now() - (1h + 30m))");
        stmt.reduce(at("2024-01-01T12:00:00Z"));
        let sub = stmt.subqueries().next().unwrap();
        assert_eq!(sub.time_range().start, Some(at("2024-01-01T10:30:00.000000001Z")));
    }

    #[test]
    fn unresolved_time_comparisons() {
        let stmt = select("SELECT v FROM m WHERE time > $start");
        assert!(has_unresolved_time_expr(stmt.condition.as_ref().unwrap()));
        let stmt = select("SELECT v FROM m WHERE time > now() - 1h");
        assert!(has_unresolved_time_expr(stmt.condition.as_ref().unwrap()));
    }

    #[test]
    fn set_time_range_keeps_other_predicates() {
        let mut stmt = select(
            "SELECT mean(v) FROM m WHERE time > now() - 1d AND host = 'a' GROUP BY time(1m)",
        );
        stmt.set_time_range(at("2024-01-01T10:00:00Z"), Some(at("2024-01-01T11:00:00Z")))
            .unwrap();
        collapsed_eq!(
            &stmt.to_string(),
            r#"SELECT mean(v) FROM m WHERE host = 'a'
               AND time >= '2024-01-01T10:00:00Z' AND time < '2024-01-01T11:00:00Z'
               GROUP BY time(1m)"#
        );
    }

    #[test]
    fn set_time_range_open_end_and_or_predicates() {
        let mut stmt = select("SELECT v FROM m WHERE (host = 'a' OR host = 'b') AND time > 0");
        stmt.set_time_range(at("2024-01-01T10:00:00Z"), None).unwrap();
        collapsed_eq!(
            &stmt.to_string(),
            r#"SELECT v FROM m WHERE (host = 'a' OR host = 'b') AND time >= '2024-01-01T10:00:00Z'"#
        );

        let mut stmt = select("SELECT v FROM m WHERE host = 'a' OR host = 'b'");
        stmt.set_time_range(at("2024-01-01T10:00:00Z"), None).unwrap();
        collapsed_eq!(
            &stmt.to_string(),
            r#"SELECT v FROM m WHERE (host = 'a' OR host = 'b') AND time >= '2024-01-01T10:00:00Z'"#
        );
    }

    #[test]
    fn time_inequality_is_not_a_bound() {
        let mut stmt = select(
            "SELECT mean(v) FROM m WHERE time >= '2024-01-01' AND time < '2024-01-02' AND time != '2024-01-01T05:00:00Z' GROUP BY time(1m)",
        );
        let cond = stmt.condition.clone().unwrap();
        assert!(has_non_range_time_expr(&cond));
        assert_eq!(
            stmt.time_range(),
            TimeRange::new(Some(at("2024-01-01T00:00:00Z")), Some(at("2024-01-02T00:00:00Z")))
        );
        assert!(matches!(
            stmt.set_time_range(at("2024-01-01T05:00:00Z"), Some(at("2024-01-01T06:00:00Z"))),
            Err(RewriteError::TimeOperator(_))
        ));
        assert_eq!(stmt.condition, Some(cond));

        let stmt = select("SELECT v FROM m WHERE time !~ /x/ OR host = 'a'");
        assert!(has_non_range_time_expr(stmt.condition.as_ref().unwrap()));
        assert!(!stmt.has_time_condition());
        let stmt = select("SELECT v FROM m WHERE time > 0 AND host != 'a'");
        assert!(!has_non_range_time_expr(stmt.condition.as_ref().unwrap()));
    }

    #[test]
    fn set_time_range_rejects_time_under_or() {
        let mut stmt = select("SELECT v FROM m WHERE time > 0 OR host = 'a'");
        assert!(matches!(
            stmt.set_time_range(at("2024-01-01T10:00:00Z"), None),
            Err(RewriteError::TimeUnderOr(_))
        ));
        let start = at("2024-01-01T10:00:00Z");
        assert!(matches!(
            stmt.set_time_range(start, Some(start)),
            Err(RewriteError::EmptyRange { .. })
        ));
    }
}
