//! Request handlers
//!
//! Handlers receive the request body and the context of the request span
//! opened by the instrumentation wrapper, and return a JSON response or a
//! [`HandlerError`]. Errors are turned into `{"error": "..."}` bodies by
//! the server after the request span has been closed.

pub mod notify;
pub mod orders;

use crate::router::Router;
use crate::telemetry::{Context, ResponseError, Tracer};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body_util::Full;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Response type shared by every handler
pub type HttpResponse = Response<Full<Bytes>>;

pub type HandlerResult = Result<HttpResponse, HandlerError>;

/// A route handler
pub type Handler = fn(HandlerContext) -> BoxFuture<'static, HandlerResult>;

/// Everything a handler gets for one request
#[derive(Debug)]
pub struct HandlerContext {
    /// Tracer for handler-level spans
    pub tracer: Tracer,
    /// Context of the request span; parent for handler spans
    pub context: Context,
    pub body: Bytes,
}

/// Handler errors
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::MalformedJson(_)
            | HandlerError::MissingField(_)
            | HandlerError::Body(_) => StatusCode::BAD_REQUEST,
            HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn from_panic(message: String) -> Self {
        HandlerError::Internal(format!("handler panicked: {}", message))
    }
}

impl HandlerError {
    /// Convert into a JSON error response
    pub fn into_response(self) -> HttpResponse {
        error_response(self.status_code(), &self.to_string())
    }
}

/// Deserialize a JSON request body
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, HandlerError> {
    serde_json::from_slice(body).map_err(|e| HandlerError::MalformedJson(e.to_string()))
}

/// Serialize `body` into a JSON response
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            let mut response = Response::new(Full::new(Bytes::from_static(
                br#"{"error":"internal error"}"#,
            )));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// `{"error": message}` with `status`
pub fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    json_response(status, &json!({ "error": message }))
}

pub fn not_found() -> HttpResponse {
    error_response(StatusCode::NOT_FOUND, "not found")
}

/// 405 with an `Allow` header listing `allowed`
pub fn method_not_allowed(allowed: &[&Method]) -> HttpResponse {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    let allow = allowed
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

/// `GET /health`: liveness only, no handler span
pub fn health(_ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
    async { Ok(json_response(StatusCode::OK, &json!({ "status": "UP" }))) }.boxed()
}

/// Routes served by order-service
pub fn order_routes() -> Router<Handler> {
    Router::<Handler>::new()
        .route(Method::GET, "/health", health)
        .route(Method::POST, "/orders", orders::create_order)
}

/// Routes served by notification-service
pub fn notification_routes() -> Router<Handler> {
    Router::<Handler>::new()
        .route(Method::GET, "/health", health)
        .route(Method::POST, "/notify", notify::send_notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: HttpResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            HandlerError::MalformedJson("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HandlerError::MissingField("userId").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HandlerError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = HandlerError::MissingField("userId").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "missing field: userId" })
        );
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_methods() {
        let response = method_not_allowed(&[&Method::POST]);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), "POST");
        assert_eq!(body_json(response).await, json!({ "error": "method not allowed" }));
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        let result: Result<serde_json::Value, _> = parse_json(&Bytes::from_static(b"{not json"));
        assert!(matches!(result, Err(HandlerError::MalformedJson(_))));
    }

    #[test]
    fn test_route_tables() {
        let orders = order_routes();
        assert!(orders.resolve(&Method::POST, "/orders").is_ok());
        assert!(orders.resolve(&Method::POST, "/notify").is_err());

        let notifications = notification_routes();
        assert!(notifications.resolve(&Method::POST, "/notify").is_ok());
        assert!(notifications.resolve(&Method::GET, "/health").is_ok());
    }
}
