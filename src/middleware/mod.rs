// Access-token and CORS middleware

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::routes::AppState;

/// Access-token middleware.
///
/// Verifies `Authorization: Bearer {API_KEY}` on incoming requests; the
/// scheme is matched case-insensitively and the token is compared after
/// trimming.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if authorized(&state, &request) {
        return Ok(next.run(request).await);
    }
    tracing::warn!(
        method = %request.method(),
        path = request.uri().path(),
        "request with invalid or missing access token"
    );
    Err(ApiError::AuthError("Invalid access token".to_string()))
}

fn authorized(state: &AppState, request: &Request<Body>) -> bool {
    let Some(header) = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };
    let Some((scheme, token)) = header.split_once(' ') else {
        return false;
    };
    scheme.eq_ignore_ascii_case("Bearer") && token.trim() == state.access_token
}

/// Adds permissive CORS headers and answers any OPTIONS request with 204.
pub async fn cors_middleware(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert("access-control-allow-methods", HeaderValue::from_static("*"));
    headers.insert("access-control-allow-headers", HeaderValue::from_static("*"));
}
