//! Error taxonomy surfaced to gateway clients.
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Every failure the request pipeline can report to a client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Unknown service name. The message is identical for every name.
    #[error("service not found")]
    ServiceNotFound,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ServiceNotFound => StatusCode::NOT_FOUND,
            GatewayError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine readable code placed in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ServiceNotFound => "SERVICE_NOT_FOUND",
            GatewayError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            GatewayError::CircuitOpen => "CIRCUIT_OPEN",
            GatewayError::BadGateway(_) => "BAD_GATEWAY",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client facing message. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            GatewayError::BadGateway(_) => "upstream service unavailable".to_string(),
            GatewayError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Render the uniform `{"error": {"code", "message"}}` body.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.code(), &self.public_message())
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::ServiceNotFound.status_code(), 404);
        assert_eq!(GatewayError::RateLimitExceeded.status_code(), 429);
        assert_eq!(GatewayError::CircuitOpen.status_code(), 503);
        assert_eq!(GatewayError::BadGateway("x".into()).status_code(), 502);
        assert_eq!(GatewayError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(GatewayError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(GatewayError::Internal("x".into()).status_code(), 500);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let body = body_json(GatewayError::ServiceNotFound.into_response()).await;
        assert_eq!(body["error"]["code"], "SERVICE_NOT_FOUND");
        assert_eq!(body["error"]["message"], "service not found");
    }

    #[tokio::test]
    async fn test_bad_gateway_hides_details() {
        let resp = GatewayError::BadGateway("connect refused 10.0.0.3:8081".into()).into_response();
        let body = body_json(resp).await;
        assert_eq!(body["error"]["message"], "upstream service unavailable");
    }
}
