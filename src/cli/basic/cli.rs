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

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use config::{get_config, Config, VERSION};

use super::functions::render_help;

fn command() -> Command {
    Command::new("chopcache")
        .version(VERSION)
        .about("Caching proxy that splits InfluxQL queries into cacheable time chunks")
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("address to listen on, overrides CHOP_BIND_ADDR"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("URL")
                .help("backend query endpoint, overrides CHOP_BACKEND_URL"),
        )
        .arg(
            Arg::new("max-age")
                .long("max-age")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("max-age of cacheable chunks, overrides CHOP_CACHE_MAX_AGE"),
        )
        .arg(
            Arg::new("env-help")
                .long("env-help")
                .action(ArgAction::SetTrue)
                .help("print every environment variable with its default and exit"),
        )
        .arg(
            Arg::new("env-check")
                .long("env-check")
                .action(ArgAction::SetTrue)
                .help("list the environment variables that are not set and exit"),
        )
}

/// Applies command line overrides on top of the environment configuration.
fn apply_overrides(cfg: &mut Config, matches: &ArgMatches) {
    if let Some(bind) = matches.get_one::<String>("bind") {
        cfg.http.bind_addr = bind.clone();
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        cfg.backend.url = backend.clone();
    }
    if let Some(max_age) = matches.get_one::<u64>("max-age") {
        cfg.cache.max_age = *max_age;
    }
}

/// Handles the command line. Returns `Ok(false)` when the process is done,
/// e.g. after printing the environment help.
pub fn cli() -> Result<bool, anyhow::Error> {
    let matches = command().get_matches();
    if matches.get_flag("env-help") {
        render_help(false);
        return Ok(false);
    }
    if matches.get_flag("env-check") {
        render_help(true);
        return Ok(false);
    }

    let mut cfg = get_config().as_ref().clone();
    apply_overrides(&mut cfg, &matches);
    config::set_config(cfg)?;
    Ok(true)
}
