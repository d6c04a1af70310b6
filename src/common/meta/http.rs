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

use actix_web::{http::StatusCode, HttpResponse as ActixHttpResponse};
use serde::{Deserialize, Serialize};

/// Error body, shaped like the error envelope of the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub error: String,
}

impl HttpResponse {
    pub fn error(error: impl ToString) -> Self {
        HttpResponse {
            error: error.to_string(),
        }
    }

    fn with_status(status: StatusCode, error: impl ToString) -> ActixHttpResponse {
        ActixHttpResponse::build(status).json(Self::error(error))
    }

    pub fn bad_request(error: impl ToString) -> ActixHttpResponse {
        Self::with_status(StatusCode::BAD_REQUEST, error)
    }

    pub fn bad_gateway(error: impl ToString) -> ActixHttpResponse {
        Self::with_status(StatusCode::BAD_GATEWAY, error)
    }

    pub fn gateway_timeout(error: impl ToString) -> ActixHttpResponse {
        Self::with_status(StatusCode::GATEWAY_TIMEOUT, error)
    }

    pub fn internal_error(error: impl ToString) -> ActixHttpResponse {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Passes a backend reply through with its own status and body.
    pub fn relay(status: u16, body: String) -> ActixHttpResponse {
        match StatusCode::from_u16(status) {
            Ok(status) => ActixHttpResponse::build(status)
                .content_type("application/json")
                .body(body),
            Err(_) => Self::bad_gateway(format!("backend returned invalid status {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::body::to_bytes;

    use super::*;

    #[actix_web::test]
    async fn test_error_body() {
        let resp = HttpResponse::bad_request("boom");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, r#"{"error":"boom"}"#);
    }

    #[actix_web::test]
    async fn test_relay() {
        let resp = HttpResponse::relay(401, r#"{"error":"authorization failed"}"#.to_string());
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, r#"{"error":"authorization failed"}"#);

        assert_eq!(
            HttpResponse::relay(1000, String::new()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
