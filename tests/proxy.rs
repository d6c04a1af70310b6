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

//! Drives the proxy route against a loop-back backend speaking the query
//! endpoint protocol.

use std::{net::SocketAddr, sync::Arc, sync::Mutex};

use actix_web::{body::to_bytes, http::StatusCode, test, web, App, HttpRequest, HttpResponse, HttpServer};
use chopcache::{
    handler::http::router,
    service::backend::{HttpBackend, QueryBackend},
};
use serde_json::{json, Value};

type Seen = Mutex<Vec<(String, String)>>;

async fn fake_influx(req: HttpRequest, seen: web::Data<Seen>) -> HttpResponse {
    let params: Vec<(String, String)> = url::form_urlencoded::parse(req.query_string().as_bytes())
        .into_owned()
        .collect();
    let q = params
        .iter()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let directive = req
        .headers()
        .get("X-Force-Cache-Control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    seen.lock().unwrap().push((q.clone(), directive));

    if params.iter().any(|(k, v)| k == "db" && v == "missing") {
        return HttpResponse::NotFound().json(json!({"error": "database not found: missing"}));
    }
    if q.starts_with("SHOW") {
        return HttpResponse::Ok().json(json!({"results": [{"statement_id": 0, "series": [
            {"name": "databases", "columns": ["name"], "values": [["telegraf"]]}
        ]}]}));
    }
    HttpResponse::Ok().json(json!({"results": [{"statement_id": 0, "series": [
        {"name": "cpu", "tags": {"host": "a"}, "columns": ["time", "q"], "values": [[0, q]]}
    ]}]}))
}

fn start_backend() -> (SocketAddr, web::Data<Seen>) {
    let seen = web::Data::new(Seen::default());
    let data = seen.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/query", web::get().to(fake_influx))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (addr, seen)
}

fn proxy_backend(addr: SocketAddr) -> web::Data<dyn QueryBackend> {
    let backend = HttpBackend::new(&config::Backend {
        url: format!("http://{addr}/query"),
        timeout: 10,
        connect_timeout: 2,
        max_retries: 0,
        retry_delay: 1,
        concurrency: 4,
    })
    .unwrap();
    let backend: Arc<dyn QueryBackend> = Arc::new(backend);
    web::Data::from(backend)
}

#[actix_web::test]
async fn test_chopped_query_round_trip() {
    let (addr, seen) = start_backend();
    let app = test::init_service(
        App::new()
            .app_data(proxy_backend(addr))
            .configure(router::get_service_routes),
    )
    .await;

    let q = "SELECT mean(v) FROM cpu WHERE time >= '2024-01-01T00:00:00Z' AND time < '2024-01-01T04:00:00Z' GROUP BY time(1m); SHOW DATABASES";
    let uri = format!(
        "/query?db=telegraf&q={}",
        url::form_urlencoded::byte_serialize(q.as_bytes()).collect::<String>()
    );
    let req = test::TestRequest::get()
        .uri(&uri)
        .append_header(("Origin", "http://grafana.local"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("Access-Control-Allow-Origin").unwrap(),
        "http://grafana.local"
    );
    let body = to_bytes(resp.into_body()).await.unwrap();
    assert!(body.ends_with(b"\n"));
    let body: Value = serde_json::from_slice(&body).unwrap();

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["statement_id"], json!(0));
    assert_eq!(results[1]["statement_id"], json!(1));
    assert_eq!(results[1]["series"][0]["name"], json!("databases"));

    let series = results[0]["series"].as_array().unwrap();
    assert_eq!(series.len(), 1);
    let chunk_texts: Vec<String> = series[0]["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row[1].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        chunk_texts,
        vec![
            "SELECT mean(v) FROM cpu WHERE time >= '2024-01-01T00:00:00Z' AND time < '2024-01-01T01:00:00Z' GROUP BY time(1m)",
            "SELECT mean(v) FROM cpu WHERE time >= '2024-01-01T01:00:00Z' AND time < '2024-01-01T02:00:00Z' GROUP BY time(1m)",
            "SELECT mean(v) FROM cpu WHERE time >= '2024-01-01T02:00:00Z' AND time < '2024-01-01T03:00:00Z' GROUP BY time(1m)",
            "SELECT mean(v) FROM cpu WHERE time >= '2024-01-01T03:00:00Z' AND time < '2024-01-01T04:00:00Z' GROUP BY time(1m)",
        ]
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    let directive = |q: &str| {
        seen.iter()
            .find(|(text, _)| text == q)
            .map(|(_, d)| d.clone())
            .unwrap()
    };
    let max_age = format!("max-age={}", config::get_config().cache.max_age);
    assert_eq!(directive(&chunk_texts[0]), max_age);
    assert_eq!(directive(&chunk_texts[2]), max_age);
    assert_eq!(directive(&chunk_texts[3]), "no-cache");
    assert_eq!(directive("SHOW DATABASES"), "no-cache");
}

#[actix_web::test]
async fn test_backend_client_error_is_relayed() {
    let (addr, _) = start_backend();
    let app = test::init_service(
        App::new()
            .app_data(proxy_backend(addr))
            .configure(router::get_service_routes),
    )
    .await;
    let req = test::TestRequest::get()
        .uri("/query?db=missing&q=SHOW%20MEASUREMENTS")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body, json!({"error": "database not found: missing"}));
}

#[actix_web::test]
async fn test_health() {
    let (addr, seen) = start_backend();
    let app = test::init_service(
        App::new()
            .app_data(proxy_backend(addr))
            .configure(router::get_service_routes),
    )
    .await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(seen.lock().unwrap().is_empty());
}
