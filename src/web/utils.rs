//! Shared helpers for the HTTP handlers.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::CotaskError;
use crate::web::state::AppState;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

pub fn status_for(e: &CotaskError) -> StatusCode {
    match e {
        CotaskError::Forbidden(_) => StatusCode::FORBIDDEN,
        CotaskError::NotFound(_) => StatusCode::NOT_FOUND,
        CotaskError::AlreadyExists(_) => StatusCode::CONFLICT,
        CotaskError::SelfReference(_) | CotaskError::Validation(_) => StatusCode::BAD_REQUEST,
        CotaskError::Unauthenticated => StatusCode::UNAUTHORIZED,
        CotaskError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// JSON error body carrying the message and a machine-readable kind.
pub fn error_response(e: CotaskError) -> Response {
    let body = serde_json::json!({ "error": e.to_string(), "kind": e.kind() });
    (status_for(&e), axum::Json(body)).into_response()
}

/// Bearer token from the Authorization header, or from `?token=` for
/// WebSocket clients that cannot set headers.
pub fn bearer_token<'h>(headers: &'h HeaderMap, query_token: Option<&'h str>) -> Option<&'h str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(query_token)
}

/// Resolve the signed-in user for a request.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, CotaskError> {
    authenticate_token(state, bearer_token(headers, None))
}

pub fn authenticate_token(state: &AppState, token: Option<&str>) -> Result<String, CotaskError> {
    token
        .and_then(|t| state.sessions.get(t))
        .map(str::to_string)
        .ok_or(CotaskError::Unauthenticated)
}

/// JSON body with `status` on success, mapped error otherwise.
pub fn json_result<T: Serialize>(status: StatusCode, result: Result<T, CotaskError>) -> Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(e) => error_response(e),
    }
}

/// 204 on success, mapped error otherwise.
pub fn empty_result(result: Result<(), CotaskError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CotaskError::forbidden("x"), 403),
            (CotaskError::not_found("x"), 404),
            (CotaskError::AlreadyExists("x".into()), 409),
            (CotaskError::SelfReference("x".into()), 400),
            (CotaskError::validation("x"), 400),
            (CotaskError::Unauthenticated, 401),
            (CotaskError::TransientStore("x".into()), 503),
        ];
        for (err, code) in cases {
            assert_eq!(status_for(&err).as_u16(), code);
        }
    }

    #[test]
    fn test_bearer_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers, Some("q")), Some("q"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers, Some("q")), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers, None), None);
    }
}
