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

use std::{fmt::Write, process::exit};

use config::{Backend, Cache, Http, Log};

/// One environment variable of a config section.
#[derive(Debug, PartialEq)]
struct Variable {
    name: String,
    default: String,
    help: String,
}

macro_rules! section {
    ($title:literal, $cfg:ty) => {{
        let mut vars: Vec<Variable> = <$cfg>::get_help()
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, (default, help))| Variable {
                name: name.to_string(),
                default: default.to_string(),
                help: help.as_deref().unwrap_or_default().to_string(),
            })
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        ($title, vars)
    }};
}

fn sections() -> Vec<(&'static str, Vec<Variable>)> {
    vec![
        section!("http", Http),
        section!("backend", Backend),
        section!("cache", Cache),
        section!("log", Log),
    ]
}

fn format_help(sections: &[(&str, Vec<Variable>)]) -> String {
    let width = sections
        .iter()
        .flat_map(|(_, vars)| vars.iter().map(|v| v.name.len()))
        .max()
        .unwrap_or_default()
        + 1;

    let mut out = String::new();
    for (title, vars) in sections {
        let _ = writeln!(out, "[{title}]");
        for v in vars {
            let _ = writeln!(
                out,
                "  {:<width$}: <default: {}> {}",
                v.name, v.default, v.help
            );
        }
    }
    out
}

fn unset_variables<'a>(
    sections: &'a [(&str, Vec<Variable>)],
    is_set: impl Fn(&str) -> bool,
) -> Vec<&'a str> {
    sections
        .iter()
        .flat_map(|(_, vars)| vars.iter())
        .map(|v| v.name.as_str())
        .filter(|name| !is_set(name))
        .collect()
}

/// Prints every environment variable grouped by config section, or with
/// `enable_check`, the variables missing from the environment.
pub(crate) fn render_help(enable_check: bool) {
    let sections = sections();
    if !enable_check {
        print!("{}", format_help(&sections));
        return;
    }

    let unset = unset_variables(&sections, |name| std::env::var_os(name).is_some());
    if !unset.is_empty() {
        println!("Following environment variables are not set:");
        println!("{}", unset.join("\n"));
        exit(1);
    }
}
