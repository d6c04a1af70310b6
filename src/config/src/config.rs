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

use std::sync::Arc;

use arc_swap::ArcSwap;
use dotenv_config::EnvConfig;
use dotenvy::dotenv_override;
use once_cell::sync::Lazy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Response header consulted by the cache sitting in front of the backend.
pub const CACHE_CONTROL_HEADER: &str = "X-Force-Cache-Control";

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from(Arc::new(init())));

pub fn get_config() -> Arc<Config> {
    CONFIG.load().clone()
}

/// Replaces the process configuration, e.g. after command line overrides.
pub fn set_config(cfg: Config) -> Result<(), anyhow::Error> {
    let mut cfg = cfg;
    check_config(&mut cfg)?;
    CONFIG.store(Arc::new(cfg));
    Ok(())
}

#[derive(Clone, Debug, EnvConfig)]
pub struct Config {
    pub http: Http,
    pub backend: Backend,
    pub cache: Cache,
    pub log: Log,
}

#[derive(Clone, Debug, EnvConfig)]
pub struct Http {
    #[env_config(
        name = "CHOP_BIND_ADDR",
        default = "0.0.0.0:8085",
        help = "Address the proxy listens on"
    )]
    pub bind_addr: String,
    #[env_config(
        name = "CHOP_HTTP_WORKERS",
        default = 0,
        help = "Number of http workers, 0 means the number of CPUs"
    )]
    pub workers: usize,
}

#[derive(Clone, Debug, EnvConfig)]
pub struct Backend {
    #[env_config(
        name = "CHOP_BACKEND_URL",
        default = "http://localhost:8086/query",
        help = "Query endpoint of the backend"
    )]
    pub url: String,
    #[env_config(
        name = "CHOP_BACKEND_TIMEOUT",
        default = 60,
        help = "Timeout of a single backend request, in seconds"
    )]
    pub timeout: u64,
    #[env_config(
        name = "CHOP_BACKEND_CONNECT_TIMEOUT",
        default = 5,
        help = "Connect timeout to the backend, in seconds"
    )]
    pub connect_timeout: u64,
    #[env_config(
        name = "CHOP_BACKEND_MAX_RETRIES",
        default = 2,
        help = "Retries of a failed read-only backend request"
    )]
    pub max_retries: u32,
    #[env_config(
        name = "CHOP_BACKEND_RETRY_DELAY",
        default = 100,
        help = "Base retry backoff in milliseconds, doubled on every attempt"
    )]
    pub retry_delay: u64,
    #[env_config(
        name = "CHOP_BACKEND_CONCURRENCY",
        default = 8,
        help = "Max in-flight backend requests per inbound query"
    )]
    pub concurrency: usize,
}

#[derive(Clone, Debug, EnvConfig)]
pub struct Cache {
    #[env_config(
        name = "CHOP_CACHE_MAX_AGE",
        default = 86400,
        help = "max-age in seconds advertised for cacheable chunks"
    )]
    pub max_age: u64,
}

#[derive(Clone, Debug, EnvConfig)]
pub struct Log {
    #[env_config(name = "CHOP_LOG_LEVEL", default = "info", help = "Log level filter")]
    pub level: String,
    #[env_config(
        name = "CHOP_LOG_JSON",
        default = false,
        help = "Emit logs as json lines"
    )]
    pub json_format: bool,
    #[env_config(
        name = "CHOP_LOG_LOCAL_TIME_FORMAT",
        default = "",
        help = "strftime format for local log timestamps, empty means RFC3339 UTC"
    )]
    pub local_time_format: String,
}

fn init() -> Config {
    dotenv_override().ok();
    let mut cfg = Config::init().expect("config init error");
    if let Err(e) = check_config(&mut cfg) {
        panic!("config error: {e}");
    }
    cfg
}

pub fn check_config(cfg: &mut Config) -> Result<(), anyhow::Error> {
    cfg.http.bind_addr = cfg.http.bind_addr.trim().to_string();
    if cfg.http.bind_addr.is_empty() {
        return Err(anyhow::anyhow!("CHOP_BIND_ADDR must not be empty"));
    }
    // a bare ":8085" binds every interface
    if cfg.http.bind_addr.starts_with(':') {
        cfg.http.bind_addr = format!("0.0.0.0{}", cfg.http.bind_addr);
    }

    let url = url::Url::parse(cfg.backend.url.trim())
        .map_err(|e| anyhow::anyhow!("CHOP_BACKEND_URL is not a valid url: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow::anyhow!(
            "CHOP_BACKEND_URL must be http or https, got {}",
            url.scheme()
        ));
    }
    cfg.backend.url = url.to_string();

    if cfg.backend.concurrency == 0 {
        cfg.backend.concurrency = 1;
    }
    if cfg.backend.timeout == 0 {
        return Err(anyhow::anyhow!("CHOP_BACKEND_TIMEOUT must be greater than 0"));
    }
    if cfg.cache.max_age == 0 {
        return Err(anyhow::anyhow!("CHOP_CACHE_MAX_AGE must be greater than 0"));
    }
    cfg.log.level = cfg.log.level.trim().to_lowercase();
    if cfg.log.level.is_empty() {
        cfg.log.level = "info".to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            http: Http {
                bind_addr: ":8085".to_string(),
                workers: 0,
            },
            backend: Backend {
                url: "http://localhost:8086/query".to_string(),
                timeout: 60,
                connect_timeout: 5,
                max_retries: 2,
                retry_delay: 100,
                concurrency: 0,
            },
            cache: Cache { max_age: 86400 },
            log: Log {
                level: " INFO ".to_string(),
                json_format: false,
                local_time_format: String::new(),
            },
        }
    }

    #[test]
    fn test_check_config_normalizes() {
        let mut cfg = sample();
        check_config(&mut cfg).unwrap();
        assert_eq!(cfg.http.bind_addr, "0.0.0.0:8085");
        assert_eq!(cfg.backend.concurrency, 1);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_check_config_rejects_bad_values() {
        let mut cfg = sample();
        cfg.backend.url = "localhost:8086".to_string();
        assert!(check_config(&mut cfg).is_err());

        let mut cfg = sample();
        cfg.backend.url = "ftp://localhost/query".to_string();
        assert!(check_config(&mut cfg).is_err());

        let mut cfg = sample();
        cfg.cache.max_age = 0;
        assert!(check_config(&mut cfg).is_err());

        let mut cfg = sample();
        cfg.http.bind_addr = "  ".to_string();
        assert!(check_config(&mut cfg).is_err());
    }
}
