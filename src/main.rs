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

use actix_web::{web, App, HttpServer};
use chopcache::{
    cli,
    handler::http::router,
    service::backend::{HttpBackend, QueryBackend},
};
use config::{
    get_config,
    meta::logger::{ChopFormatter, JsonFormat, RequestIdLayer},
    VERSION,
};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    if !cli::basic::cli::cli()? {
        return Ok(());
    }
    setup_logs();

    let cfg = get_config();
    log::info!("Starting chopcache v{VERSION}");

    let backend: Arc<dyn QueryBackend> = Arc::new(HttpBackend::new(&cfg.backend)?);
    let backend = web::Data::from(backend);
    let workers = if cfg.http.workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        cfg.http.workers
    };

    log::info!(
        "Serving on {} with {workers} workers, backend {}, max-age {}s",
        cfg.http.bind_addr,
        cfg.backend.url,
        cfg.cache.max_age
    );
    HttpServer::new(move || {
        App::new()
            .app_data(backend.clone())
            .configure(router::get_service_routes)
    })
    .workers(workers)
    .bind(cfg.http.bind_addr.as_str())?
    .run()
    .await?;

    log::info!("server stopped");
    Ok(())
}

fn setup_logs() {
    let cfg = get_config();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(RequestIdLayer);
    if cfg.log.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().event_format(JsonFormat))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .event_format(ChopFormatter::new()),
            )
            .init();
    }
}
