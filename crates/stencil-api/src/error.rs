//! Mapping of broker and boundary errors onto OSB status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use stencil_broker::BrokerError;
use tracing::{debug, error};

#[derive(Debug)]
pub enum ApiError {
    Broker(BrokerError),
    /// Malformed headers, query or body.
    BadRequest(String),
    /// Missing or unsupported `X-Broker-API-Version`.
    VersionMismatch(String),
    /// The operation may complete asynchronously but the client did not
    /// send `accepts_incomplete=true`.
    AsyncRequired,
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError::Broker(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::VersionMismatch(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::AsyncRequired => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Broker(e) => match e {
                BrokerError::Validation(_) | BrokerError::NotFound(_) | BrokerError::Credential(_) => {
                    StatusCode::BAD_REQUEST
                }
                BrokerError::Forbidden { .. } => StatusCode::FORBIDDEN,
                BrokerError::Conflict(_) => StatusCode::CONFLICT,
                BrokerError::Concurrency { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                BrokerError::Inconsistent(_) | BrokerError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::AsyncRequired => json!({
                "error": "AsyncRequired",
                "description": "This service plan requires client support for asynchronous service operations.",
            }),
            ApiError::Broker(e @ BrokerError::Concurrency { .. }) => json!({
                "error": "ConcurrencyError",
                "description": e.to_string(),
            }),
            ApiError::Broker(e) => json!({ "description": e.to_string() }),
            ApiError::BadRequest(msg) | ApiError::VersionMismatch(msg) => {
                json!({ "description": msg })
            }
        };
        if status.is_server_error() {
            error!(%status, body = %body, "request failed");
        } else {
            debug!(%status, body = %body, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_map_to_osb_statuses() {
        let cases = [
            (BrokerError::validation("x"), StatusCode::BAD_REQUEST),
            (BrokerError::NotFound("x".into()), StatusCode::BAD_REQUEST),
            (BrokerError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                BrokerError::Concurrency {
                    key: "k".into(),
                    attempts: 5,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (BrokerError::Inconsistent("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::AsyncRequired.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ApiError::VersionMismatch("old".into()).status(),
            StatusCode::PRECONDITION_FAILED
        );
    }
}
