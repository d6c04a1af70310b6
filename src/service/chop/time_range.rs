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

use influxql::TimeRange;

use super::{walk, ChopStatement};

/// Tightest window enforced anywhere in the tree: the latest lower bound and
/// the earliest upper bound over every node.
pub fn resolve_time_range<S: ChopStatement>(stmt: &S) -> TimeRange {
    let mut range = TimeRange::default();
    let _ = walk(stmt, &mut |node: &S| {
        range = range.intersect(node.time_range());
        Ok::<_, std::convert::Infallible>(())
    });
    range
}
