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

//! Recombines the responses of a statement's chunks into one result.

use config::meta::query::{Response, StatementResult};

/// Folds `src` into `dst`: results are aligned by position, series inside a
/// result by identity. Values of a known series are appended, unknown series
/// are appended once at the end.
pub fn merge(dst: &mut Vec<StatementResult>, src: Vec<StatementResult>) {
    if dst.is_empty() {
        *dst = src;
        return;
    }
    for (i, result) in src.into_iter().enumerate() {
        match dst.get_mut(i) {
            Some(d) => merge_result(d, result),
            None => dst.push(result),
        }
    }
}

fn merge_result(dst: &mut StatementResult, src: StatementResult) {
    if dst.error.is_none() {
        dst.error = src.error;
    }
    dst.partial |= src.partial;
    for message in src.messages {
        if !dst.messages.contains(&message) {
            dst.messages.push(message);
        }
    }
    for series in src.series {
        match dst.series.iter_mut().find(|s| s.same_identity(&series)) {
            Some(d) => {
                if d.columns.is_empty() {
                    d.columns = series.columns;
                }
                d.values.extend(series.values);
                d.partial |= series.partial;
            }
            None => dst.series.push(series),
        }
    }
}

/// Merges the responses of one statement's chunks, given in ascending time
/// order. A chunk that failed as a whole turns into an error result, and an
/// error in any chunk replaces the merged data.
pub fn merge_chunks(chunks: Vec<Response>) -> Vec<StatementResult> {
    let mut merged = vec![];
    for chunk in chunks {
        let results = match chunk.error {
            Some(error) => vec![StatementResult {
                error: Some(error),
                ..Default::default()
            }],
            None => chunk.results,
        };
        merge(&mut merged, results);
    }
    if merged.is_empty() {
        merged.push(StatementResult::default());
    }
    for result in merged.iter_mut() {
        if result.error.is_some() {
            result.series.clear();
            result.messages.clear();
            result.partial = false;
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use config::meta::query::{Message, Series};
    use serde_json::json;

    use super::*;

    fn series(name: &str, rows: &[i64]) -> Series {
        Series {
            name: name.to_string(),
            columns: vec!["time".to_string(), "mean".to_string()],
            values: rows.iter().map(|t| vec![json!(t), json!(1.0)]).collect(),
            ..Default::default()
        }
    }

    fn tagged(name: &str, host: &str, rows: &[i64]) -> Series {
        Series {
            tags: Some(BTreeMap::from([("host".to_string(), host.to_string())])),
            ..series(name, rows)
        }
    }

    fn result(series: Vec<Series>) -> StatementResult {
        StatementResult {
            series,
            ..Default::default()
        }
    }

    fn times(s: &Series) -> Vec<i64> {
        s.values.iter().map(|r| r[0].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_merge_adopts_first() {
        let mut dst = vec![];
        merge(&mut dst, vec![result(vec![series("cpu", &[1, 2])])]);
        assert_eq!(dst.len(), 1);
        assert_eq!(times(&dst[0].series[0]), vec![1, 2]);
    }

    #[test]
    fn test_merge_concatenates_by_name() {
        let mut dst = vec![result(vec![series("cpu", &[1, 2]), series("mem", &[1])])];
        merge(
            &mut dst,
            vec![result(vec![series("mem", &[2]), series("cpu", &[3, 4])])],
        );
        assert_eq!(dst[0].series.len(), 2);
        assert_eq!(times(&dst[0].series[0]), vec![1, 2, 3, 4]);
        assert_eq!(times(&dst[0].series[1]), vec![1, 2]);
    }

    #[test]
    fn test_merge_appends_unknown_series_once() {
        let mut dst = vec![result(vec![series("cpu", &[1]), series("mem", &[1])])];
        merge(&mut dst, vec![result(vec![series("disk", &[2])])]);
        let names: Vec<_> = dst[0].series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cpu", "mem", "disk"]);
    }

    #[test]
    fn test_merge_keeps_tag_sets_apart() {
        let mut dst = vec![result(vec![tagged("cpu", "a", &[1]), tagged("cpu", "b", &[1])])];
        merge(
            &mut dst,
            vec![result(vec![tagged("cpu", "b", &[2]), tagged("cpu", "a", &[2])])],
        );
        assert_eq!(dst[0].series.len(), 2);
        assert_eq!(times(&dst[0].series[0]), vec![1, 2]);
        assert_eq!(times(&dst[0].series[1]), vec![1, 2]);
    }

    #[test]
    fn test_merge_extra_results_appended() {
        let mut dst = vec![result(vec![series("cpu", &[1])])];
        merge(
            &mut dst,
            vec![
                result(vec![series("cpu", &[2])]),
                result(vec![series("mem", &[7])]),
            ],
        );
        assert_eq!(dst.len(), 2);
        assert_eq!(times(&dst[0].series[0]), vec![1, 2]);
        assert_eq!(dst[1].series[0].name, "mem");
    }

    #[test]
    fn test_merge_chunks_in_order() {
        let chunks = vec![
            Response::new(vec![result(vec![series("cpu", &[1, 2])])]),
            // an empty window returns no series at all
            Response::new(vec![result(vec![])]),
            Response::new(vec![result(vec![series("cpu", &[5, 6])])]),
        ];
        let merged = merge_chunks(chunks);
        assert_eq!(merged.len(), 1);
        assert_eq!(times(&merged[0].series[0]), vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_merge_chunks_messages_and_partial() {
        let warn = Message {
            level: "warning".to_string(),
            text: "deprecated".to_string(),
        };
        let mut first = result(vec![series("cpu", &[1])]);
        first.messages = vec![warn.clone()];
        let mut second = result(vec![series("cpu", &[2])]);
        second.messages = vec![warn.clone()];
        second.partial = true;
        let merged = merge_chunks(vec![Response::new(vec![first]), Response::new(vec![second])]);
        assert_eq!(merged[0].messages, vec![warn]);
        assert!(merged[0].partial);
    }

    #[test]
    fn test_merge_chunks_error_wins() {
        let mut failed = result(vec![]);
        failed.error = Some("timeout".to_string());
        let merged = merge_chunks(vec![
            Response::new(vec![result(vec![series("cpu", &[1])])]),
            Response::new(vec![failed]),
            Response::new(vec![result(vec![series("cpu", &[3])])]),
        ]);
        assert_eq!(merged[0].error.as_deref(), Some("timeout"));
        assert!(merged[0].series.is_empty());

        let merged = merge_chunks(vec![
            Response::error("shard unavailable"),
            Response::new(vec![result(vec![series("cpu", &[3])])]),
        ]);
        assert_eq!(merged[0].error.as_deref(), Some("shard unavailable"));
        assert!(merged[0].series.is_empty());
    }

    #[test]
    fn test_merge_chunks_empty_response() {
        let merged = merge_chunks(vec![Response::default()]);
        assert_eq!(merged, vec![StatementResult::default()]);
        assert_eq!(
            serde_json::to_value(&merged[0]).unwrap(),
            json!({"statement_id": 0})
        );
    }
}
