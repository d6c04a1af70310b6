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

//! Statement tree and its canonical text rendering.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::{duration::format_duration, IntervalError};

/// Words that must be double-quoted when used as identifiers.
const KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "ANALYZE", "AND", "ANY", "AS", "ASC", "BEGIN", "BY", "CARDINALITY", "CREATE",
    "CONTINUOUS", "DATABASE", "DATABASES", "DEFAULT", "DELETE", "DESC", "DESTINATIONS",
    "DIAGNOSTICS", "DISTINCT", "DROP", "DURATION", "END", "EVERY", "EXACT", "EXPLAIN", "FALSE",
    "FIELD", "FOR", "FROM", "GRANT", "GRANTS", "GROUP", "GROUPS", "IN", "INF", "INSERT", "INTO",
    "KEY", "KEYS", "KILL", "LIMIT", "MEASUREMENT", "MEASUREMENTS", "NAME", "OFFSET", "ON", "OR",
    "ORDER", "PASSWORD", "POLICIES", "POLICY", "PRIVILEGES", "QUERIES", "QUERY", "READ",
    "REPLICATION", "RESAMPLE", "RETENTION", "REVOKE", "SELECT", "SERIES", "SET", "SHARD", "SHARDS",
    "SLIMIT", "SOFFSET", "STATS", "SUBSCRIPTION", "SUBSCRIPTIONS", "TAG", "TO", "TRUE", "USER",
    "USERS", "VALUES", "WHERE", "WITH", "WRITE",
];

pub(crate) fn is_keyword(s: &str) -> bool {
    KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(s))
}

/// Writes an identifier, quoting it when it is not a plain word.
pub(crate) fn write_ident(f: &mut fmt::Formatter<'_>, ident: &str) -> fmt::Result {
    let mut chars = ident.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_keyword(ident);
    if plain {
        f.write_str(ident)
    } else {
        write!(f, "\"{}\"", ident.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(
        f,
        "'{}'",
        s.replace('\\', "\\\\")
            .replace('\'', "\\'")
            .replace('\n', "\\n")
    )
}

fn write_regex(f: &mut fmt::Formatter<'_>, re: &str) -> fmt::Result {
    write!(f, "/{}/", re.replace('/', "\\/"))
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// A parsed query: one or more statements separated by `;`.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub statements: Vec<Statement>,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(Box<SelectStatement>),
    /// Any statement that is not a `SELECT`. Kept as text and forwarded as is.
    Other(OtherStatement),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(s) => write!(f, "{s}"),
            Statement::Other(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OtherStatement {
    /// Upper-cased leading keyword, e.g. `SHOW` or `DROP`.
    pub kind: String,
    pub text: String,
}

impl fmt::Display for OtherStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Fill {
    Null,
    None,
    Previous,
    Linear,
    Number(f64),
    Integer(i64),
}

impl fmt::Display for Fill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fill::Null => f.write_str("fill(null)"),
            Fill::None => f.write_str("fill(none)"),
            Fill::Previous => f.write_str("fill(previous)"),
            Fill::Linear => f.write_str("fill(linear)"),
            Fill::Number(n) => write!(f, "fill({n:?})"),
            Fill::Integer(n) => write!(f, "fill({n})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub into: Option<Measurement>,
    pub sources: Vec<Source>,
    pub condition: Option<Expr>,
    pub dimensions: Vec<Dimension>,
    pub fill: Option<Fill>,
    pub order: Option<SortOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub slimit: Option<u64>,
    pub soffset: Option<u64>,
    pub timezone: Option<String>,
}

impl SelectStatement {
    /// True when no field calls a function, i.e. rows are returned as stored.
    pub fn is_raw_query(&self) -> bool {
        !self.fields.iter().any(|f| f.expr.has_call())
    }

    /// The `time()` dimension, if the statement groups by time.
    pub fn time_dimension(&self) -> Option<&Expr> {
        self.dimensions
            .iter()
            .map(|d| &d.0)
            .find(|e| matches!(e, Expr::Call { name, .. } if name.eq_ignore_ascii_case("time")))
    }

    /// Interval of the `time()` dimension. `Ok(None)` when the statement does
    /// not group by time.
    pub fn group_by_interval(&self) -> Result<Option<Duration>, IntervalError> {
        let Some(Expr::Call { args, .. }) = self.time_dimension() else {
            return Ok(None);
        };
        if !(1..=2).contains(&args.len()) {
            return Err(IntervalError::Arity);
        }
        match &args[0] {
            Expr::Duration(d) => Ok(Some(*d)),
            _ => Err(IntervalError::NotADuration),
        }
    }

    /// Offset argument of the `time()` dimension, if any.
    pub fn group_by_offset(&self) -> Option<&Expr> {
        match self.time_dimension() {
            Some(Expr::Call { args, .. }) => args.get(1),
            _ => None,
        }
    }

    /// Sub-queries referenced directly by this statement's `FROM` clause.
    pub fn subqueries(&self) -> impl Iterator<Item = &SelectStatement> {
        self.sources.iter().filter_map(|s| match s {
            Source::SubQuery(stmt) => Some(stmt.as_ref()),
            Source::Measurement(_) => None,
        })
    }

    pub fn subqueries_mut(&mut self) -> impl Iterator<Item = &mut SelectStatement> {
        self.sources.iter_mut().filter_map(|s| match s {
            Source::SubQuery(stmt) => Some(stmt.as_mut()),
            Source::Measurement(_) => None,
        })
    }

    /// Names of every function called in the fields.
    pub fn function_names(&self) -> Vec<&str> {
        let mut out = vec![];
        for field in &self.fields {
            field.expr.collect_calls(&mut out);
        }
        out
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        write_list(f, &self.fields)?;
        if let Some(into) = &self.into {
            write!(f, " INTO {into}")?;
        }
        f.write_str(" FROM ")?;
        write_list(f, &self.sources)?;
        if let Some(cond) = &self.condition {
            write!(f, " WHERE {cond}")?;
        }
        if !self.dimensions.is_empty() {
            f.write_str(" GROUP BY ")?;
            write_list(f, &self.dimensions)?;
        }
        if let Some(fill) = &self.fill {
            write!(f, " {fill}")?;
        }
        match self.order {
            Some(SortOrder::Asc) => f.write_str(" ORDER BY time ASC")?,
            Some(SortOrder::Desc) => f.write_str(" ORDER BY time DESC")?,
            None => {}
        }
        if let Some(n) = self.limit {
            write!(f, " LIMIT {n}")?;
        }
        if let Some(n) = self.offset {
            write!(f, " OFFSET {n}")?;
        }
        if let Some(n) = self.slimit {
            write!(f, " SLIMIT {n}")?;
        }
        if let Some(n) = self.soffset {
            write!(f, " SOFFSET {n}")?;
        }
        if let Some(tz) = &self.timezone {
            f.write_str(" tz(")?;
            write_string(f, tz)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            f.write_str(" AS ")?;
            write_ident(f, alias)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dimension(pub Expr);

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Measurement(Measurement),
    SubQuery(Box<SelectStatement>),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Measurement(m) => write!(f, "{m}"),
            Source::SubQuery(s) => write!(f, "({s})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MeasurementName {
    Name(String),
    Regex(String),
    /// `:MEASUREMENT` in an `INTO` clause.
    Backref,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub database: Option<String>,
    pub retention_policy: Option<String>,
    pub name: MeasurementName,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.database, &self.retention_policy) {
            (Some(db), rp) => {
                write_ident(f, db)?;
                f.write_str(".")?;
                if let Some(rp) = rp {
                    write_ident(f, rp)?;
                }
                f.write_str(".")?;
            }
            (None, Some(rp)) => {
                write_ident(f, rp)?;
                f.write_str(".")?;
            }
            (None, None) => {}
        }
        match &self.name {
            MeasurementName::Name(name) => write_ident(f, name),
            MeasurementName::Regex(re) => write_regex(f, re),
            MeasurementName::Backref => f.write_str(":MEASUREMENT"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Neq,
    EqRegex,
    NeqRegex,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::EqRegex
            | BinaryOp::NeqRegex
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte => 4,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::BitOr | BinaryOp::BitXor => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::BitAnd => 6,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 4
    }

    fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::EqRegex => "=~",
            BinaryOp::NeqRegex => "!~",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    VarRef {
        name: String,
        /// `::field`, `::tag`, `::integer`...
        data_type: Option<String>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
    Integer(i64),
    Number(f64),
    String(String),
    Boolean(bool),
    Duration(Duration),
    /// An absolute instant, produced when `now()` is reduced or a time range is
    /// rewritten. Rendered as a string literal.
    Time(DateTime<Utc>),
    Regex(String),
    Wildcard(Option<String>),
    BoundParam(String),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::VarRef {
            name: name.into(),
            data_type: None,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// True when the expression references the `time` column.
    pub fn is_time_ref(&self) -> bool {
        matches!(self, Expr::VarRef { name, .. } if name.eq_ignore_ascii_case("time"))
    }

    pub fn has_call(&self) -> bool {
        match self {
            Expr::Call { .. } => true,
            Expr::Binary { lhs, rhs, .. } => lhs.has_call() || rhs.has_call(),
            Expr::Paren(e) => e.has_call(),
            _ => false,
        }
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Call { name, args } => {
                out.push(name);
                for arg in args {
                    arg.collect_calls(out);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            Expr::Paren(e) => e.collect_calls(out),
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef { name, data_type } => {
                write_ident(f, name)?;
                if let Some(t) = data_type {
                    write!(f, "::{t}")?;
                }
                Ok(())
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::Paren(e) => write!(f, "({e})"),
            Expr::Integer(n) => write!(f, "{n}"),
            Expr::Number(n) => write!(f, "{n:?}"),
            Expr::String(s) => write_string(f, s),
            Expr::Boolean(b) => write!(f, "{b}"),
            Expr::Duration(d) => f.write_str(&format_duration(*d)),
            Expr::Time(t) => write!(
                f,
                "'{}'",
                t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ),
            Expr::Regex(re) => write_regex(f, re),
            Expr::Wildcard(None) => f.write_str("*"),
            Expr::Wildcard(Some(t)) => write!(f, "*::{t}"),
            Expr::BoundParam(p) => write!(f, "${p}"),
        }
    }
}
