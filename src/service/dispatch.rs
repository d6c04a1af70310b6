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

//! Turns query text into chunk requests, sends them and assembles the
//! response in statement order.

use chrono::{DateTime, Utc};
use config::meta::query::{Response, StatementResult};
use futures::{stream, StreamExt, TryStreamExt};
use influxql::{ParseError, Statement};

use crate::service::{
    backend::{BackendError, BackendRequest, CacheDirective, QueryBackend},
    chop::{self, ChunkPlan},
    merge::merge_chunks,
};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("missing required parameter \"q\"")]
    MissingQuery,
    #[error("error parsing query: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What is forwarded with every chunk of an inbound request.
#[derive(Clone, Debug, Default)]
pub struct QueryContext {
    pub params: Vec<(String, String)>,
    pub authorization: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchOptions {
    pub max_age: u64,
    pub concurrency: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatementPlan {
    pub plan: ChunkPlan,
    pub retryable: bool,
}

/// Parses `text` and plans every statement. Only `SELECT` statements are
/// ever split.
pub fn plan_query(text: &str, now: DateTime<Utc>) -> Result<Vec<StatementPlan>, ParseError> {
    let query = influxql::parse_query(text)?;
    Ok(query
        .statements
        .iter()
        .map(|stmt| match stmt {
            Statement::Select(select) => StatementPlan {
                plan: chop::plan(select.as_ref(), now),
                retryable: select.into.is_none(),
            },
            Statement::Other(other) => StatementPlan {
                plan: ChunkPlan::intact(other.to_string()),
                retryable: false,
            },
        })
        .collect())
}

/// Chunks of a split plan are cacheable when their window is over, except
/// the trailing one. Intact statements are never cached.
pub fn cache_directive(
    plan: &ChunkPlan,
    index: usize,
    now: DateTime<Utc>,
    max_age: u64,
) -> CacheDirective {
    if !plan.is_split() || index + 1 >= plan.len() {
        return CacheDirective::NoCache;
    }
    match plan.chunks[index].window {
        Some((_, end)) if end <= now => CacheDirective::MaxAge(max_age),
        _ => CacheDirective::NoCache,
    }
}

/// Sends every chunk with at most `concurrency` requests in flight and merges
/// the answers per statement. The first failure aborts the whole query and
/// drops the requests still in flight.
pub async fn dispatch(
    backend: &dyn QueryBackend,
    plans: Vec<StatementPlan>,
    ctx: &QueryContext,
    opts: DispatchOptions,
    now: DateTime<Utc>,
) -> Result<Response, BackendError> {
    let mut requests = vec![];
    for (stmt_index, stmt) in plans.iter().enumerate() {
        for (i, chunk) in stmt.plan.chunks.iter().enumerate() {
            requests.push((
                stmt_index,
                BackendRequest {
                    params: ctx.params.clone(),
                    query: chunk.text.clone(),
                    directive: cache_directive(&stmt.plan, i, now, opts.max_age),
                    authorization: ctx.authorization.clone(),
                    retryable: stmt.retryable,
                },
            ));
        }
    }
    log::debug!(
        "[DISPATCH] {} statements, {} backend requests",
        plans.len(),
        requests.len()
    );

    let responses: Vec<(usize, Response)> = stream::iter(requests)
        .map(|(stmt_index, req)| async move {
            backend.query(&req).await.map(|resp| (stmt_index, resp))
        })
        .buffered(opts.concurrency.max(1))
        .try_collect()
        .await?;

    let mut per_statement: Vec<Vec<Response>> = vec![vec![]; plans.len()];
    for (stmt_index, resp) in responses {
        per_statement[stmt_index].push(resp);
    }
    let results: Vec<StatementResult> = per_statement
        .into_iter()
        .flat_map(merge_chunks)
        .enumerate()
        .map(|(id, result)| StatementResult {
            statement_id: id,
            ..result
        })
        .collect();
    Ok(Response::new(results))
}

/// Plans, forwards and merges one inbound query.
pub async fn execute(
    backend: &dyn QueryBackend,
    text: &str,
    ctx: &QueryContext,
    opts: DispatchOptions,
) -> Result<Response, QueryError> {
    let now = Utc::now();
    let plans = plan_query(text, now)?;
    for (i, stmt) in plans.iter().enumerate() {
        log::debug!("[DISPATCH] statement {i} planned as {} chunks", stmt.plan.len());
    }
    Ok(dispatch(backend, plans, ctx, opts, now).await?)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use chrono::{SecondsFormat, TimeZone};
    use config::meta::query::Series;
    use influxql::{time::parse_time_string, Expr};
    use serde_json::{json, Value};

    use super::*;

    /// Answers every chunk with a single row holding the chunk text.
    #[derive(Default)]
    struct FakeBackend {
        seen: Mutex<Vec<BackendRequest>>,
        calls: AtomicUsize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl QueryBackend for FakeBackend {
        async fn query(&self, req: &BackendRequest) -> Result<Response, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req.clone());
            if self.fail_at == Some(n) {
                return Err(BackendError::Timeout);
            }
            // later requests finish first
            let delay = 20u64.saturating_sub(n as u64 * 5);
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            let name = if req.query.starts_with("SHOW") { "databases" } else { "m" };
            Ok(Response::new(vec![StatementResult {
                series: vec![Series {
                    name: name.to_string(),
                    columns: vec!["q".to_string()],
                    values: vec![vec![json!(req.query)]],
                    ..Default::default()
                }],
                ..Default::default()
            }]))
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_time_string(s).unwrap()
    }

    const POINT_STEP_NS: i64 = 10_000_000_000;
    const POINT_COUNT: i64 = 12 * 360;

    /// Evaluates `sum(v) ... GROUP BY time(<interval>)[, host]` with
    /// fill(null) over one point every 10s from midnight, alternating between
    /// hosts `a` and `b`; point `k` has value `k`. An open upper bound ends at
    /// `now`, as it does on a real server.
    struct BucketBackend {
        now: DateTime<Utc>,
    }

    impl BucketBackend {
        fn sum(&self, lo: i64, hi: i64, host: Option<&str>) -> Value {
            let origin = at("2024-01-01T00:00:00Z").timestamp_nanos_opt().unwrap();
            let values: Vec<i64> = (0..POINT_COUNT)
                .filter(|k| {
                    let t = origin + k * POINT_STEP_NS;
                    let h = if k % 2 == 0 { "a" } else { "b" };
                    t >= lo && t < hi && host.map_or(true, |host| host == h)
                })
                .collect();
            if values.is_empty() {
                Value::Null
            } else {
                json!(values.iter().sum::<i64>())
            }
        }
    }

    #[async_trait]
    impl QueryBackend for BucketBackend {
        async fn query(&self, req: &BackendRequest) -> Result<Response, BackendError> {
            let mut stmt = match influxql::parse_query(&req.query).unwrap().statements.remove(0) {
                Statement::Select(s) => *s,
                other => panic!("unexpected {other:?}"),
            };
            stmt.reduce(self.now);
            let range = stmt.time_range();
            let start = range.start.unwrap().timestamp_nanos_opt().unwrap();
            let end = range.end.unwrap_or(self.now).timestamp_nanos_opt().unwrap();
            let step = stmt
                .group_by_interval()
                .unwrap()
                .unwrap()
                .num_nanoseconds()
                .unwrap();
            let hosts = if stmt.dimensions.iter().any(|d| d.0 == Expr::var("host")) {
                vec![Some("a"), Some("b")]
            } else {
                vec![None]
            };
            let series = hosts
                .into_iter()
                .map(|host| {
                    let mut values = vec![];
                    let mut bucket = start.div_euclid(step) * step;
                    while bucket < end {
                        let time = Utc
                            .timestamp_nanos(bucket)
                            .to_rfc3339_opts(SecondsFormat::Secs, true);
                        let sum = self.sum(bucket.max(start), (bucket + step).min(end), host);
                        values.push(vec![json!(time), sum]);
                        bucket += step;
                    }
                    Series {
                        name: "m".to_string(),
                        tags: host.map(|h| BTreeMap::from([("host".to_string(), h.to_string())])),
                        columns: vec!["time".to_string(), "sum".to_string()],
                        values,
                        ..Default::default()
                    }
                })
                .collect();
            Ok(Response::new(vec![StatementResult {
                series,
                ..Default::default()
            }]))
        }
    }

    #[tokio::test]
    async fn test_chunked_answer_matches_unsplit() {
        let now = at("2024-01-01T12:00:00Z");
        let backend = BucketBackend { now };
        let ctx = QueryContext::default();
        for text in [
            // exclusive lower bound on a point, closed upper bound
            "SELECT sum(v) FROM m WHERE time > '2024-01-01T01:07:30Z' AND time < '2024-01-01T09:00:00Z' GROUP BY time(1m)",
            // relative lower bound, open trailing chunk, one series per host
            "SELECT sum(v) FROM m WHERE time > now() - 10h GROUP BY time(1m), host",
            "SELECT sum(v) FROM m WHERE time >= '2024-01-01T00:00:00Z' GROUP BY time(2m)",
        ] {
            let plans = plan_query(text, now).unwrap();
            assert!(plans[0].plan.is_split(), "{text}");
            let chunked = dispatch(&backend, plans, &ctx, OPTS, now).await.unwrap();

            let whole = vec![StatementPlan {
                plan: ChunkPlan::intact(text.to_string()),
                retryable: true,
            }];
            let unsplit = dispatch(&backend, whole, &ctx, OPTS, now).await.unwrap();

            assert!(!unsplit.results[0].series[0].values.is_empty(), "{text}");
            assert_eq!(chunked, unsplit, "{text}");
        }
    }

    const OPTS: DispatchOptions = DispatchOptions {
        max_age: 86400,
        concurrency: 4,
    };

    #[test]
    fn test_plan_query_statements() {
        let now = at("2024-01-08T00:00:00Z");
        let plans = plan_query(
            "SELECT mean(value) FROM m WHERE time > now() - 7d GROUP BY time(1m); SHOW DATABASES; SELECT mean(value) INTO m2 FROM m WHERE time > now() - 7d GROUP BY time(1m)",
            now,
        )
        .unwrap();
        assert_eq!(plans.len(), 3);
        assert!(plans[0].plan.is_split());
        assert!(plans[0].retryable);
        assert_eq!(plans[1].plan, ChunkPlan::intact("SHOW DATABASES".to_string()));
        assert!(!plans[1].retryable);
        assert!(!plans[2].plan.is_split());
        assert!(!plans[2].retryable);

        assert!(plan_query("SELEKT 1", now).is_err());
    }

    #[test]
    fn test_cache_directive_policy() {
        let now = at("2024-01-08T00:00:00Z");
        let plans = plan_query(
            "SELECT mean(value) FROM m WHERE time > now() - 7d GROUP BY time(1m)",
            now,
        )
        .unwrap();
        let plan = &plans[0].plan;
        let last = plan.len() - 1;
        for i in 0..last {
            assert_eq!(cache_directive(plan, i, now, 60), CacheDirective::MaxAge(60));
        }
        assert_eq!(cache_directive(plan, last, now, 60), CacheDirective::NoCache);

        // a window that is not over yet is never cached
        let earlier = at("2024-01-07T12:00:00Z");
        assert_eq!(
            cache_directive(plan, last - 1, earlier, 60),
            CacheDirective::NoCache
        );

        let intact = ChunkPlan::intact("SHOW DATABASES".to_string());
        assert_eq!(cache_directive(&intact, 0, now, 60), CacheDirective::NoCache);
    }

    #[tokio::test]
    async fn test_dispatch_merges_in_order() {
        let now = at("2024-01-01T12:00:00Z");
        let backend = FakeBackend::default();
        let plans = plan_query(
            "SELECT mean(value) FROM m WHERE time >= '2024-01-01T00:00:00Z' AND time < '2024-01-01T04:00:00Z' GROUP BY time(1m); SHOW DATABASES",
            now,
        )
        .unwrap();
        let ctx = QueryContext {
            params: vec![("db".to_string(), "telegraf".to_string())],
            authorization: Some("Token abc".to_string()),
        };
        let texts: Vec<String> = plans[0].plan.chunks.iter().map(|c| c.text.clone()).collect();
        assert_eq!(texts.len(), 4);
        let resp = dispatch(&backend, plans, &ctx, OPTS, now).await.unwrap();

        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].statement_id, 0);
        assert_eq!(resp.results[1].statement_id, 1);
        let rows: Vec<_> = resp.results[0].series[0]
            .values
            .iter()
            .map(|r| r[0].as_str().unwrap().to_string())
            .collect();
        assert_eq!(rows, texts);
        assert_eq!(resp.results[1].series[0].name, "databases");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|r| r.params == ctx.params));
        assert!(seen.iter().all(|r| r.authorization.as_deref() == Some("Token abc")));
        let directive = |text: &str| seen.iter().find(|r| r.query == text).unwrap().directive;
        assert_eq!(directive(&texts[0]), CacheDirective::MaxAge(86400));
        assert_eq!(directive(&texts[1]), CacheDirective::MaxAge(86400));
        assert_eq!(directive(&texts[2]), CacheDirective::MaxAge(86400));
        assert_eq!(directive(&texts[3]), CacheDirective::NoCache);
        let show = seen.iter().find(|r| r.query == "SHOW DATABASES").unwrap();
        assert_eq!(show.directive, CacheDirective::NoCache);
        assert!(!show.retryable);
    }

    #[tokio::test]
    async fn test_dispatch_fails_on_any_chunk() {
        let now = at("2024-01-01T12:00:00Z");
        let backend = FakeBackend {
            fail_at: Some(2),
            ..Default::default()
        };
        let plans = plan_query(
            "SELECT mean(value) FROM m WHERE time >= '2024-01-01T00:00:00Z' AND time < '2024-01-01T04:00:00Z' GROUP BY time(1m)",
            now,
        )
        .unwrap();
        let err = dispatch(&backend, plans, &QueryContext::default(), OPTS, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout));
    }

    #[tokio::test]
    async fn test_execute_parse_error() {
        let backend = FakeBackend::default();
        let err = execute(&backend, "SELECT FROM", &QueryContext::default(), OPTS)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
