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

//! InfluxQL grammar.
//!
//! ```sql
//! -- aggregates over a time window
//! SELECT mean(value) FROM cpu WHERE time > now() - 1h GROUP BY time(1m), host fill(none)
//!
//! -- sub-queries, qualified and regex sources
//! SELECT max(m) FROM (SELECT mean(v) AS m FROM "db"."rp".cpu GROUP BY time(10s))
//! SELECT count(*) FROM /cpu.*/ WHERE host =~ /web[0-9]+/ LIMIT 10
//!
//! -- several statements; non-SELECT ones are kept as text
//! SELECT v FROM a; SHOW DATABASES
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace1, none_of, not_line_ending, one_of, satisfy},
    combinator::{cut, map, map_opt, map_res, not, opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::{fold_many0, many0_count, separated_list0, separated_list1},
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::{
    ast::{
        is_keyword, BinaryOp, Dimension, Expr, Field, Fill, Measurement, MeasurementName,
        OtherStatement, Query, SelectStatement, SortOrder, Source, Statement,
    },
    duration::parse_duration,
    ParseError,
};

/// Leading keywords of the statements that are accepted but not parsed.
const OTHER_STATEMENTS: &[&str] = &[
    "ALTER", "CREATE", "DELETE", "DROP", "EXPLAIN", "GRANT", "INSERT", "KILL", "REVOKE", "SET",
    "SHOW",
];

/// Parses query text made of one or more `;` separated statements.
pub fn parse_query(text: &str) -> Result<Query, ParseError> {
    let mut statements = vec![];
    let mut input = text;
    loop {
        let (rest, _) = separators(input).map_err(|e| syntax_error(text, e))?;
        if rest.is_empty() {
            break;
        }
        let (rest, stmt) = statement(rest).map_err(|e| syntax_error(text, e))?;
        statements.push(stmt);
        let (rest, _) = sp(rest).map_err(|e| syntax_error(text, e))?;
        if rest.is_empty() {
            break;
        }
        match semicolon(rest) {
            Ok((rest, _)) => input = rest,
            Err(_) => {
                return Err(ParseError::new(
                    format!("found {}, expected ; or end of query", found(rest)),
                    offset(text, rest),
                ));
            }
        }
    }
    if statements.is_empty() {
        return Err(ParseError::new("empty query", 0));
    }
    Ok(Query { statements })
}

fn offset(text: &str, rest: &str) -> usize {
    text.len() - rest.len()
}

fn found(rest: &str) -> String {
    match rest.split_whitespace().next() {
        Some(word) => format!("{word:?}"),
        None => "EOF".to_string(),
    }
}

fn syntax_error(text: &str, err: nom::Err<NomError<&str>>) -> ParseError {
    let rest = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        nom::Err::Incomplete(_) => "",
    };
    let rest = sp(rest).map_or(rest, |(rest, _)| rest);
    ParseError::new(
        format!("syntax error near {}", found(rest)),
        offset(text, rest),
    )
}

fn fatal(err: nom::Err<NomError<&str>>) -> nom::Err<NomError<&str>> {
    match err {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    }
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Skips whitespace and `--` comments.
fn sp(input: &str) -> IResult<&str, ()> {
    value((), many0_count(alt((multispace1, comment)))).parse(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(tag("--"), not_line_ending)).parse(input)
}

fn separators(input: &str) -> IResult<&str, ()> {
    value((), (many0_count(preceded(sp, char(';'))), sp)).parse(input)
}

fn semicolon(input: &str) -> IResult<&str, char> {
    char(';').parse(input)
}

fn dot(input: &str) -> IResult<&str, char> {
    char('.').parse(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        preceded(
            sp,
            terminated(tag_no_case(kw), not(satisfy(is_ident_char))),
        )
        .parse(input)
    }
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| preceded(sp, tag(s)).parse(input)
}

fn ident_body(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))
    .parse(input)
}

/// A `q` delimited literal. `\n`, `\\` and an escaped `q` are unescaped,
/// other escapes are kept verbatim.
fn quoted<'a>(q: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    move |input| {
        delimited(
            char(q),
            fold_many0(
                alt((
                    preceded(
                        char('\\'),
                        map(none_of("\n"), move |c| match c {
                            'n' => (None, '\n'),
                            c if c == '\\' || c == q => (None, c),
                            c => (Some('\\'), c),
                        }),
                    ),
                    map(satisfy(move |c| c != q && c != '\\' && c != '\n'), |c| {
                        (None, c)
                    }),
                )),
                String::new,
                |mut out: String, (escape, c): (Option<char>, char)| {
                    out.extend(escape);
                    out.push(c);
                    out
                },
            ),
            char(q),
        )
        .parse(input)
    }
}

fn name_literal(input: &str) -> IResult<&str, String> {
    alt((quoted('"'), map(ident_body, str::to_string))).parse(input)
}

fn identifier(input: &str) -> IResult<&str, String> {
    preceded(sp, name_literal).parse(input)
}

/// `/regex/`, where `\/` stands for a slash.
fn regex_lit(input: &str) -> IResult<&str, String> {
    delimited(
        char('/'),
        fold_many0(
            alt((value('/', tag("\\/")), none_of("/\n"))),
            String::new,
            |mut out: String, c: char| {
                out.push(c);
                out
            },
        ),
        char('/'),
    )
    .parse(input)
}

fn regex_expr(input: &str) -> IResult<&str, Expr> {
    map(preceded(sp, regex_lit), Expr::Regex).parse(input)
}

/// Durations (`1h30m`), floats and integers.
fn number(input: &str) -> IResult<&str, Expr> {
    alt((
        map_opt(
            recognize((
                digit1,
                take_while1(|c: char| c.is_alphabetic()),
                take_while(|c: char| c.is_alphanumeric()),
            )),
            |s: &str| parse_duration(s).map(Expr::Duration),
        ),
        map_res(
            alt((
                recognize((digit1, char('.'), digit1)),
                recognize((char('.'), digit1)),
            )),
            |s: &str| s.parse().map(Expr::Number),
        ),
        map_res(digit1, |s: &str| s.parse().map(Expr::Integer)),
    ))
    .parse(input)
}

fn unsigned(input: &str) -> IResult<&str, u64> {
    preceded(sp, map_res(digit1, |s: &str| s.parse::<u64>())).parse(input)
}

// ============================================================================
// Statements
// ============================================================================

fn statement(input: &str) -> IResult<&str, Statement> {
    alt((
        map(select, |s| Statement::Select(Box::new(s))),
        map(other_statement, Statement::Other),
    ))
    .parse(input)
}

fn other_statement(input: &str) -> IResult<&str, OtherStatement> {
    let (_, word) = preceded(sp, ident_body).parse(input)?;
    let Some(kind) = OTHER_STATEMENTS
        .iter()
        .find(|kw| kw.eq_ignore_ascii_case(word))
    else {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)));
    };
    let (rest, text) =
        recognize((sp, ident_body, many0_count(other_piece))).parse(input)?;
    Ok((
        rest,
        OtherStatement {
            kind: kind.to_string(),
            text: text.trim().to_string(),
        },
    ))
}

/// One chunk of an unparsed statement; quoted text and regexes may hold `;`.
fn other_piece(input: &str) -> IResult<&str, &str> {
    alt((
        recognize((alt((tag("=~"), tag("!~"))), sp, regex_lit)),
        recognize(quoted('\'')),
        recognize(quoted('"')),
        comment,
        recognize(none_of(";")),
    ))
    .parse(input)
}

fn select(input: &str) -> IResult<&str, SelectStatement> {
    let (input, _) = keyword("SELECT").parse(input)?;
    let (input, fields) = cut(separated_list1(sym(","), field)).parse(input)?;
    let (input, into) = opt(preceded(keyword("INTO"), cut(into_measurement))).parse(input)?;
    let (input, _) = cut(keyword("FROM")).parse(input)?;
    let (input, sources) = cut(separated_list1(sym(","), source)).parse(input)?;
    let (input, condition) = opt(preceded(keyword("WHERE"), cut(expr))).parse(input)?;
    let (input, dimensions) = opt(preceded(
        (keyword("GROUP"), cut(keyword("BY"))),
        cut(separated_list1(sym(","), dimension)),
    ))
    .parse(input)?;
    let (input, fill) = opt(preceded(keyword("fill"), cut(fill_option))).parse(input)?;
    let (input, order) = opt(preceded(
        (keyword("ORDER"), cut(keyword("BY"))),
        cut(sort_order),
    ))
    .parse(input)?;
    let (input, limit) = opt(preceded(keyword("LIMIT"), cut(unsigned))).parse(input)?;
    let (input, offset) = opt(preceded(keyword("OFFSET"), cut(unsigned))).parse(input)?;
    let (input, slimit) = opt(preceded(keyword("SLIMIT"), cut(unsigned))).parse(input)?;
    let (input, soffset) = opt(preceded(keyword("SOFFSET"), cut(unsigned))).parse(input)?;
    let (input, timezone) = opt(preceded(
        keyword("tz"),
        cut(delimited(sym("("), preceded(sp, quoted('\'')), sym(")"))),
    ))
    .parse(input)?;
    Ok((
        input,
        SelectStatement {
            fields,
            into,
            sources,
            condition,
            dimensions: dimensions.unwrap_or_default(),
            fill,
            order,
            limit,
            offset,
            slimit,
            soffset,
            timezone,
        },
    ))
}

fn field(input: &str) -> IResult<&str, Field> {
    map(
        (expr, opt(preceded(keyword("AS"), cut(identifier)))),
        |(expr, alias)| Field { expr, alias },
    )
    .parse(input)
}

fn source(input: &str) -> IResult<&str, Source> {
    alt((
        map(delimited(sym("("), cut(select), cut(sym(")"))), |s| {
            Source::SubQuery(Box::new(s))
        }),
        map(from_measurement, Source::Measurement),
    ))
    .parse(input)
}

fn from_measurement(input: &str) -> IResult<&str, Measurement> {
    measurement(input, false)
}

fn into_measurement(input: &str) -> IResult<&str, Measurement> {
    measurement(input, true)
}

fn backref(input: &str) -> IResult<&str, ()> {
    value((), (char(':'), sp, tag_no_case("MEASUREMENT"))).parse(input)
}

/// `[db.][rp.]name`, where either qualifier may be empty (`db..cpu`) and the
/// name may be a regex, or `:MEASUREMENT` for an `INTO` target.
fn measurement(input: &str, into: bool) -> IResult<&str, Measurement> {
    let (mut input, _) = sp(input)?;
    let mut qualifiers: Vec<Option<String>> = vec![];
    let name = loop {
        if let Ok((rest, re)) = regex_lit(input) {
            input = rest;
            break MeasurementName::Regex(re);
        }
        if into {
            if let Ok((rest, _)) = backref(input) {
                input = rest;
                break MeasurementName::Backref;
            }
        }
        match name_literal(input) {
            Ok((rest, ident)) => {
                if qualifiers.len() < 2 {
                    if let Ok((rest, _)) = dot(rest) {
                        qualifiers.push(Some(ident));
                        input = rest;
                        continue;
                    }
                }
                input = rest;
                break MeasurementName::Name(ident);
            }
            Err(e) => {
                if qualifiers.len() < 2 {
                    if let Ok((rest, _)) = dot(input) {
                        qualifiers.push(None);
                        input = rest;
                        continue;
                    }
                }
                return Err(e);
            }
        }
    };
    let (database, retention_policy) = match qualifiers.len() {
        2 => (qualifiers[0].take(), qualifiers[1].take()),
        1 => (None, qualifiers[0].take()),
        _ => (None, None),
    };
    Ok((
        input,
        Measurement {
            database,
            retention_policy,
            name,
        },
    ))
}

fn dimension(input: &str) -> IResult<&str, Dimension> {
    map(alt((regex_expr, expr)), Dimension).parse(input)
}

fn fill_option(input: &str) -> IResult<&str, Fill> {
    delimited(
        sym("("),
        alt((
            value(Fill::Null, keyword("null")),
            value(Fill::None, keyword("none")),
            value(Fill::Previous, keyword("previous")),
            value(Fill::Linear, keyword("linear")),
            fill_number,
        )),
        sym(")"),
    )
    .parse(input)
}

fn fill_number(input: &str) -> IResult<&str, Fill> {
    let (rest, negative) = opt(sym("-")).parse(input)?;
    let (rest, n) = preceded(sp, number).parse(rest)?;
    match n {
        Expr::Integer(n) if negative.is_some() => Ok((rest, Fill::Integer(-n))),
        Expr::Integer(n) => Ok((rest, Fill::Integer(n))),
        Expr::Number(n) if negative.is_some() => Ok((rest, Fill::Number(-n))),
        Expr::Number(n) => Ok((rest, Fill::Number(n))),
        _ => Err(nom::Err::Error(NomError::new(input, ErrorKind::Verify))),
    }
}

fn sort_order(input: &str) -> IResult<&str, SortOrder> {
    let (input, named_time) = opt(keyword("time")).parse(input)?;
    let (rest, direction) = opt(alt((
        value(SortOrder::Desc, keyword("DESC")),
        value(SortOrder::Asc, keyword("ASC")),
    )))
    .parse(input)?;
    match (direction, named_time) {
        (Some(direction), _) => Ok((rest, direction)),
        (None, Some(_)) => Ok((rest, SortOrder::Asc)),
        (None, None) => Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag))),
    }
}

// ============================================================================
// Expressions
// ============================================================================

fn expr(input: &str) -> IResult<&str, Expr> {
    binary(input, 1)
}

/// Precedence climbing over `BinaryOp::precedence`; operators of equal
/// precedence associate to the left.
fn binary(input: &str, min_prec: u8) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = unary(input)?;
    loop {
        let Ok((rest, op)) = binary_op(input) else {
            return Ok((input, lhs));
        };
        let prec = op.precedence();
        if prec < min_prec {
            return Ok((input, lhs));
        }
        let rhs = match op {
            BinaryOp::EqRegex | BinaryOp::NeqRegex => {
                regex_expr(rest).or_else(|_| binary(rest, prec + 1))
            }
            _ => binary(rest, prec + 1),
        };
        let (rest, rhs) = rhs.map_err(fatal)?;
        input = rest;
        lhs = Expr::binary(op, lhs, rhs);
    }
}

fn binary_op(input: &str) -> IResult<&str, BinaryOp> {
    preceded(
        sp,
        alt((
            value(BinaryOp::Lte, tag("<=")),
            value(BinaryOp::Gte, tag(">=")),
            value(BinaryOp::Neq, alt((tag("!="), tag("<>")))),
            value(BinaryOp::EqRegex, tag("=~")),
            value(BinaryOp::NeqRegex, tag("!~")),
            value(BinaryOp::Lt, tag("<")),
            value(BinaryOp::Gt, tag(">")),
            value(BinaryOp::Eq, tag("=")),
            value(BinaryOp::Add, tag("+")),
            value(BinaryOp::Sub, tag("-")),
            value(BinaryOp::Mul, tag("*")),
            value(BinaryOp::Div, tag("/")),
            value(BinaryOp::Mod, tag("%")),
            value(BinaryOp::BitAnd, tag("&")),
            value(BinaryOp::BitOr, tag("|")),
            value(BinaryOp::BitXor, tag("^")),
            value(BinaryOp::And, keyword("AND")),
            value(BinaryOp::Or, keyword("OR")),
        )),
    )
    .parse(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    let (input, sign) = opt(preceded(sp, one_of("+-"))).parse(input)?;
    let (input, expr) = primary(input)?;
    let expr = match (sign, expr) {
        (Some('-'), Expr::Integer(n)) => Expr::Integer(-n),
        (Some('-'), Expr::Number(n)) => Expr::Number(-n),
        (Some('-'), Expr::Duration(d)) => Expr::Duration(-d),
        (Some('-'), other) => Expr::binary(BinaryOp::Mul, Expr::Integer(-1), other),
        (_, expr) => expr,
    };
    Ok((input, expr))
}

fn data_type(input: &str) -> IResult<&str, String> {
    preceded(sym("::"), cut(preceded(sp, map(ident_body, str::to_lowercase)))).parse(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    preceded(
        sp,
        alt((
            map(delimited(char('('), cut(expr), cut(sym(")"))), |e| {
                Expr::Paren(Box::new(e))
            }),
            map(preceded(char('*'), opt(data_type)), Expr::Wildcard),
            map(quoted('\''), Expr::String),
            map(
                preceded(char('$'), cut(take_while1(is_ident_char))),
                |p: &str| Expr::BoundParam(p.to_string()),
            ),
            number,
            map((quoted('"'), opt(data_type)), |(name, data_type)| {
                Expr::VarRef { name, data_type }
            }),
            word,
        )),
    )
    .parse(input)
}

/// Booleans, function calls and bare variable references.
fn word(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = ident_body(input)?;
    if name.eq_ignore_ascii_case("true") {
        return Ok((rest, Expr::Boolean(true)));
    }
    if name.eq_ignore_ascii_case("false") {
        return Ok((rest, Expr::Boolean(false)));
    }
    if is_keyword(name) {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)));
    }
    let (rest, args) = opt(preceded(sym("("), cut(call_args))).parse(rest)?;
    if let Some(args) = args {
        return Ok((
            rest,
            Expr::Call {
                name: name.to_string(),
                args,
            },
        ));
    }
    let (rest, data_type) = opt(data_type).parse(rest)?;
    Ok((
        rest,
        Expr::VarRef {
            name: name.to_string(),
            data_type,
        },
    ))
}

fn call_args(input: &str) -> IResult<&str, Vec<Expr>> {
    terminated(
        separated_list0(sym(","), alt((regex_expr, expr))),
        sym(")"),
    )
    .parse(input)
}
