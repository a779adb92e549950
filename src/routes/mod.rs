use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::HeaderMap,
    middleware as axum_middleware,
    response::Response,
    routing::post,
    Router,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::Value;

use crate::auth::AuthManager;
use crate::converters::anthropic_to_openai::convert_anthropic_request;
use crate::converters::core::{to_slice, to_str};
use crate::converters::openai_to_anthropic::convert_openai_response;
use crate::error::ApiError;
use crate::middleware;
use crate::streaming::stream_openai_to_anthropic;

/// Copilot chat completions endpoint.
const CHAT_COMPLETIONS_URL: &str = "https://api.githubcopilot.com/chat/completions";
/// Copilot embeddings endpoint.
const EMBEDDINGS_URL: &str = "https://api.githubcopilot.com/embeddings";

/// Hop-by-hop headers that must not be forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "http2-settings",
];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub access_token: String,
    pub auth: Arc<AuthManager>,
    pub client: reqwest::Client,
}

/// Proxy routes (require the access token)
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/chat/completions", post(chat_completions_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/embeddings", post(embeddings_handler))
        .route("/v1/embeddings", post(embeddings_handler))
        .route("/messages", post(messages_handler))
        .route("/v1/messages", post(messages_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// POST /chat/completions - OpenAI-compatible passthrough
async fn chat_completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    tracing::debug!(bytes = body.len(), "proxying chat completions request");
    let response = forward_upstream(&state, CHAT_COMPLETIONS_URL, &headers, body).await?;
    passthrough_response(response)
}

/// POST /embeddings - OpenAI-compatible passthrough
async fn embeddings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    tracing::debug!(bytes = body.len(), "proxying embeddings request");
    let response = forward_upstream(&state, EMBEDDINGS_URL, &headers, body).await?;
    passthrough_response(response)
}

/// POST /messages - Anthropic-compatible endpoint
///
/// Translates the Anthropic request into the OpenAI shape, forwards it to
/// Copilot, and translates the response back - streaming when the upstream
/// answers with an event stream, in one piece otherwise.
async fn messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("invalid JSON body: {}", e)))?;

    let converted = convert_anthropic_request(&payload);
    tracing::debug!(
        stream = converted.get("stream").and_then(|v| v.as_bool()).unwrap_or(false),
        "translated messages request"
    );
    let outbound = serde_json::to_vec(&converted)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("encode upstream body: {}", e)))?;

    let response =
        forward_upstream(&state, CHAT_COMPLETIONS_URL, &headers, Bytes::from(outbound)).await?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("text/event-stream") {
        let status = response.status().as_u16();
        let byte_stream = stream_openai_to_anthropic(response).map(|result| {
            result
                .map(Bytes::from)
                .map_err(|e| std::io::Error::other(e.to_string()))
        });

        return Response::builder()
            .status(status)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(Body::from_stream(byte_stream))
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("build response: {}", e)));
    }

    let status = response.status().as_u16();
    let upstream_body = response
        .bytes()
        .await
        .map_err(|e| ApiError::Upstream(format!("read upstream body: {}", e)))?;
    let upstream_json: Value = serde_json::from_slice(&upstream_body)
        .map_err(|e| ApiError::Upstream(format!("invalid upstream JSON: {}", e)))?;
    let translated = convert_openai_response(&upstream_json)?;

    let encoded = serde_json::to_vec(&translated)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("encode response: {}", e)))?;
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(encoded))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("build response: {}", e)))
}

/// Sends a request body to the Copilot API with the client headers filtered
/// and the Copilot auth headers applied.
async fn forward_upstream(
    state: &AppState,
    target: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, ApiError> {
    let bearer = state
        .auth
        .bearer_token()
        .await
        .ok_or_else(|| ApiError::Upstream("copilot token unavailable".to_string()))?;

    let mut request = state.client.post(target);
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str())
            || lower == "host"
            || lower == "authorization"
            || lower == "content-length"
        {
            continue;
        }
        request = request.header(name.as_str(), value.as_bytes());
    }

    request = request
        .header("Authorization", format!("Bearer {}", bearer))
        .header("Copilot-Integration-Id", "vscode-chat")
        .header("Editor-Version", "Neovim/0.9.0");
    if has_vision_content(&body) {
        request = request.header("Copilot-Vision-Request", "true");
    }

    request
        .body(body)
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("proxy request failed: {}", e)))
}

/// Streams an upstream response back to the client unmodified.
fn passthrough_response(response: reqwest::Response) -> Result<Response, ApiError> {
    let status = response.status().as_u16();
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        // The body is re-chunked by the local server
        if lower == "content-length" || lower == "transfer-encoding" || lower == "connection" {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    builder
        .body(Body::from_stream(byte_stream))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("build response: {}", e)))
}

/// Checks for image content parts in an OpenAI-style request body.
fn has_vision_content(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }
    let Ok(payload) = serde_json::from_slice::<Value>(body) else {
        return false;
    };
    to_slice(payload.get("messages")).iter().any(|message| {
        to_slice(message.get("content")).iter().any(|part| {
            part.get("image_url").is_some()
                || to_str(part.get("type")).eq_ignore_ascii_case("image_url")
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_vision_content_detects_image_parts() {
        let body = serde_json::to_vec(&serde_json::json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AA"}},
                ],
            }],
        }))
        .unwrap();
        assert!(has_vision_content(&body));
    }

    #[test]
    fn test_has_vision_content_ignores_text_only() {
        let body = serde_json::to_vec(&serde_json::json!({
            "messages": [
                {"role": "user", "content": "just text"},
                {"role": "user", "content": [{"type": "text", "text": "more"}]},
            ],
        }))
        .unwrap();
        assert!(!has_vision_content(&body));
    }

    #[test]
    fn test_has_vision_content_tolerates_garbage() {
        assert!(!has_vision_content(b""));
        assert!(!has_vision_content(b"not json"));
        assert!(!has_vision_content(b"{\"messages\": \"nope\"}"));
    }

    #[test]
    fn test_hop_by_hop_header_list_is_lowercase() {
        for header in HOP_BY_HOP_HEADERS {
            assert_eq!(*header, header.to_ascii_lowercase());
        }
    }
}
