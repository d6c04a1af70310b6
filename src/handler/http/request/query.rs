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

use std::time::Instant;

use actix_web::{
    get,
    http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, ORIGIN},
    web, HttpRequest, HttpResponse,
};
use config::{get_config, meta::query::Response, utils::ider};
use tracing::Instrument;

use crate::{
    common::meta::http::HttpResponse as MetaHttpResponse,
    service::{
        backend::{BackendError, QueryBackend},
        dispatch::{self, DispatchOptions, QueryContext, QueryError},
    },
};

impl From<QueryError> for HttpResponse {
    fn from(value: QueryError) -> Self {
        let message = value.to_string();
        match value {
            QueryError::MissingQuery | QueryError::Parse(_) => {
                MetaHttpResponse::bad_request(message)
            }
            QueryError::Backend(BackendError::Timeout) => {
                MetaHttpResponse::gateway_timeout(message)
            }
            // authentication and unknown database replies stay visible
            QueryError::Backend(BackendError::Status { status, body }) if status < 500 => {
                MetaHttpResponse::relay(status, body)
            }
            QueryError::Backend(_) => MetaHttpResponse::bad_gateway(message),
        }
    }
}

/// Query
///
/// Accepts the query endpoint parameters of the backend. `q` is split into
/// chunks, every other parameter is forwarded unchanged.
#[get("/query")]
pub async fn query(req: HttpRequest, backend: web::Data<dyn QueryBackend>) -> HttpResponse {
    let request_id = ider::generate();
    let span = tracing::info_span!("query", request_id = request_id.as_str());
    handle(req, backend).instrument(span).await
}

async fn handle(req: HttpRequest, backend: web::Data<dyn QueryBackend>) -> HttpResponse {
    let mut text = None;
    let mut params = vec![];
    for (key, value) in url::form_urlencoded::parse(req.query_string().as_bytes()) {
        if key == "q" {
            text.get_or_insert(value.into_owned());
        } else {
            params.push((key.into_owned(), value.into_owned()));
        }
    }
    let Some(text) = text else {
        return QueryError::MissingQuery.into();
    };

    let cfg = get_config();
    let ctx = QueryContext {
        params,
        authorization: req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let opts = DispatchOptions {
        max_age: cfg.cache.max_age,
        concurrency: cfg.backend.concurrency,
    };

    let start = Instant::now();
    match dispatch::execute(backend.get_ref(), &text, &ctx, opts).await {
        Ok(resp) => {
            log::info!(
                "[QUERY] {} statements answered in {} ms",
                resp.results.len(),
                start.elapsed().as_millis()
            );
            respond(&req, &resp)
        }
        Err(e) => {
            log::error!("[QUERY] {text:?} failed: {e}");
            e.into()
        }
    }
}

fn respond(req: &HttpRequest, resp: &Response) -> HttpResponse {
    let mut body = match serde_json::to_string(resp) {
        Ok(body) => body,
        Err(e) => return MetaHttpResponse::internal_error(e),
    };
    body.push('\n');

    let mut builder = HttpResponse::Ok();
    builder.content_type("application/json");
    let origins: Vec<&str> = req
        .headers()
        .get_all(ORIGIN)
        .filter_map(|v| v.to_str().ok())
        .collect();
    if !origins.is_empty() {
        builder.insert_header((ACCESS_CONTROL_ALLOW_ORIGIN, origins.join(", ")));
    }
    builder.body(body)
}
