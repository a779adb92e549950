// OpenAI to Anthropic response converter
//
// Converts a complete (non-streaming) OpenAI chat completion into an
// Anthropic Messages API response. Streaming responses go through the
// streaming module instead.

use serde_json::{json, Value};

use crate::error::TranslateError;

use super::core::{generate_server_tool_id, map_stop_reason, to_int, to_slice, to_str};

/// Converts an OpenAI chat completion into an Anthropic message.
///
/// Content block order: web-search annotation blocks first, then the
/// assistant text, then one tool_use block per tool call.
pub fn convert_openai_response(body: &Value) -> Result<Value, TranslateError> {
    let choices = to_slice(body.get("choices"));
    let choice = choices.first().ok_or(TranslateError::NoChoices)?;
    if !choice.is_object() {
        return Err(TranslateError::BadChoice);
    }

    let mut content: Vec<Value> = Vec::new();
    if let Some(message) = choice.get("message").filter(|m| m.is_object()) {
        let annotations = to_slice(message.get("annotations"));
        if !annotations.is_empty() {
            // The upstream annotations never carry the original query text
            let id = generate_server_tool_id();
            content.push(json!({
                "type": "server_tool_use",
                "id": id,
                "name": "web_search",
                "input": {"query": ""},
            }));
            let results: Vec<Value> = annotations
                .iter()
                .filter(|annotation| annotation.is_object())
                .map(|annotation| {
                    json!({
                        "type": "web_search_result",
                        "url": to_str(annotation.pointer("/url_citation/url")),
                        "title": to_str(annotation.pointer("/url_citation/title")),
                    })
                })
                .collect();
            content.push(json!({
                "type": "web_search_tool_result",
                "tool_use_id": id,
                "content": results,
            }));
        }

        let text = to_str(message.get("content"));
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }

        for call in to_slice(message.get("tool_calls")) {
            if !call.is_object() {
                continue;
            }
            let function = call.get("function");
            let arguments = match function.and_then(|f| f.get("arguments")) {
                Some(Value::String(args)) if !args.is_empty() => args.clone(),
                Some(args @ (Value::Object(_) | Value::Array(_))) => args.to_string(),
                _ => "{}".to_string(),
            };
            content.push(json!({
                "type": "tool_use",
                "id": to_str(call.get("id")),
                "name": to_str(function.and_then(|f| f.get("name"))),
                "input": {"arguments": arguments},
            }));
        }
    }

    let usage = body.get("usage").filter(|u| u.is_object());

    Ok(json!({
        "id": to_str(body.get("id")),
        "type": "message",
        "role": "assistant",
        "model": to_str(body.get("model")),
        "content": content,
        "stop_reason": map_stop_reason(&to_str(choice.get("finish_reason"))),
        "stop_sequence": null,
        "usage": {
            "input_tokens": to_int(usage.and_then(|u| u.get("prompt_tokens"))),
            "output_tokens": to_int(usage.and_then(|u| u.get("completion_tokens"))),
            "cache_read_input_tokens": to_int(usage.and_then(|u| u.get("cache_read_input_tokens"))),
        },
    }))
}
