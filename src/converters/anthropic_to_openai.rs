// Anthropic to OpenAI request converter
//
// Maps an Anthropic Messages API request onto the OpenAI chat-completions
// shape the Copilot API expects. Pure and infallible: messages with unknown
// roles or malformed parts are dropped so newly introduced fields never
// break the proxy.

use serde_json::{json, Map, Value};

use super::core::{to_slice, to_str};

/// Converts an Anthropic messages request into an OpenAI chat-completions request.
pub fn convert_anthropic_request(body: &Value) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    match body.get("system") {
        Some(Value::String(system)) if !system.is_empty() => {
            messages.push(json!({"role": "system", "content": system}));
        }
        Some(Value::Array(parts)) => {
            let texts: Vec<Value> = parts
                .iter()
                .filter(|part| part.is_object())
                .filter_map(|part| {
                    let text = to_str(part.get("text"));
                    (!text.is_empty()).then(|| json!({"type": "text", "text": text}))
                })
                .collect();
            if !texts.is_empty() {
                messages.push(json!({"role": "system", "content": texts}));
            }
        }
        _ => {}
    }

    for message in to_slice(body.get("messages")) {
        if !message.is_object() {
            continue;
        }
        let role = to_str(message.get("role"));
        if role != "user" && role != "assistant" {
            continue;
        }
        match message.get("content") {
            Some(Value::String(content)) => {
                messages.push(json!({"role": role, "content": content}));
            }
            Some(Value::Array(parts)) if role == "user" => {
                convert_user_parts(parts, &mut messages);
            }
            Some(Value::Array(parts)) => {
                convert_assistant_parts(parts, &mut messages);
            }
            _ => {}
        }
    }

    let tools: Vec<Value> = to_slice(body.get("tools"))
        .iter()
        .filter_map(convert_tool)
        .collect();

    let mut result = Map::new();
    result.insert("messages".to_string(), Value::Array(messages));
    for key in ["model", "max_tokens", "temperature", "stream"] {
        result.insert(key.to_string(), body.get(key).cloned().unwrap_or(Value::Null));
    }
    if !tools.is_empty() {
        result.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(tool_choice) = body.get("tool_choice") {
        result.insert("tool_choice".to_string(), tool_choice.clone());
    }
    Value::Object(result)
}

/// Tool results become their own role:"tool" messages, emitted before the
/// single user message built from the remaining parts.
fn convert_user_parts(parts: &[Value], messages: &mut Vec<Value>) {
    for part in parts {
        if to_str(part.get("type")) != "tool_result" {
            continue;
        }
        let tool_use_id = to_str(part.get("tool_use_id"));
        if tool_use_id.is_empty() {
            continue;
        }
        // OpenAI tool messages carry string content only
        let payload = match part.get("content") {
            Some(Value::String(content)) if !content.is_empty() => content.clone(),
            Some(content @ (Value::Array(_) | Value::Object(_))) => content.to_string(),
            _ => "{}".to_string(),
        };
        messages.push(json!({
            "role": "tool",
            "content": payload,
            "tool_call_id": tool_use_id,
        }));
    }

    let mut content: Vec<Value> = Vec::new();
    for part in parts {
        match to_str(part.get("type")).as_str() {
            "text" => {
                let text = to_str(part.get("text"));
                if !text.is_empty() {
                    content.push(json!({"type": "text", "text": text}));
                }
            }
            "image" => {
                let Some(source) = part.get("source").filter(|s| s.is_object()) else {
                    continue;
                };
                let mut url = to_str(source.get("url"));
                if url.is_empty() {
                    url = to_str(source.get("data"));
                }
                if url.is_empty() {
                    continue;
                }
                let mut image = Map::new();
                image.insert("type".to_string(), json!("image_url"));
                image.insert("image_url".to_string(), json!({"url": url}));
                let media_type = to_str(source.get("media_type"));
                if !media_type.is_empty() {
                    image.insert("media_type".to_string(), Value::String(media_type));
                }
                content.push(Value::Object(image));
            }
            _ => {}
        }
    }
    if !content.is_empty() {
        messages.push(json!({"role": "user", "content": content}));
    }
}

/// Text parts join into one content string; tool_use parts become tool_calls.
/// The message is emitted only when it carries either.
fn convert_assistant_parts(parts: &[Value], messages: &mut Vec<Value>) {
    let texts: Vec<String> = parts
        .iter()
        .filter(|part| to_str(part.get("type")) == "text")
        .map(|part| to_str(part.get("text")))
        .filter(|text| !text.is_empty())
        .collect();

    let mut tool_calls: Vec<Value> = Vec::new();
    for part in parts {
        if to_str(part.get("type")) != "tool_use" {
            continue;
        }
        let name = to_str(part.get("name"));
        if name.is_empty() {
            continue;
        }
        let arguments = match part.get("input") {
            None | Some(Value::Null) => "{}".to_string(),
            Some(input) => input.to_string(),
        };
        tool_calls.push(json!({
            "id": to_str(part.get("id")),
            "type": "function",
            "function": {"name": name, "arguments": arguments},
        }));
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    if !texts.is_empty() {
        message.insert("content".to_string(), Value::String(texts.join("\n")));
    }
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    if message.len() > 1 {
        messages.push(Value::Object(message));
    }
}

fn convert_tool(tool: &Value) -> Option<Value> {
    let name = to_str(tool.get("name"));
    if name.is_empty() {
        return None;
    }
    Some(json!({
        "type": "function",
        "function": {
            "name": name,
            "description": to_str(tool.get("description")),
            "parameters": tool.get("input_schema").cloned().unwrap_or(Value::Null),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_string_becomes_system_message() {
        let body = json!({
            "system": "You are helpful.",
            "messages": [],
            "model": "gpt-4o",
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are helpful.");
    }

    #[test]
    fn test_system_parts_collect_into_one_message() {
        let body = json!({
            "system": [
                {"type": "text", "text": "First."},
                {"type": "text", "text": ""},
                "not an object",
                {"type": "text", "text": "Second."},
            ],
            "messages": [],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 1);
        let parts = messages[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "First.");
        assert_eq!(parts[1]["text"], "Second.");
    }

    #[test]
    fn test_empty_system_omitted() {
        let body = json!({"system": "", "messages": []});
        let result = convert_anthropic_request(&body);
        assert!(result["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_user_string_passthrough() {
        let body = json!({
            "messages": [{"role": "user", "content": "Hello"}],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], json!({"role": "user", "content": "Hello"}));
    }

    #[test]
    fn test_unknown_roles_dropped() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "sneaky"},
                {"role": "tool", "content": "nope"},
                {"role": "user", "content": "Hi"},
            ],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "Hi");
    }

    #[test]
    fn test_tool_results_precede_user_message() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Here is the result"},
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"},
                ],
            }],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["tool_call_id"], "toolu_1");
        assert_eq!(messages[0]["content"], "42");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"][0]["text"], "Here is the result");
    }

    #[test]
    fn test_tool_result_content_kinds() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "a", "content": [{"type": "text", "text": "x"}]},
                    {"type": "tool_result", "tool_use_id": "b"},
                    {"type": "tool_result", "tool_use_id": "c", "content": ""},
                    {"type": "tool_result"},
                ],
            }],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        // The tool_result without an id is dropped, and the parts produce no
        // user message.
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0]["content"],
            "[{\"text\":\"x\",\"type\":\"text\"}]"
        );
        assert_eq!(messages[1]["content"], "{}");
        assert_eq!(messages[2]["content"], "{}");
    }

    #[test]
    fn test_image_parts_use_url_then_data() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"url": "https://example.com/cat.png"}},
                    {"type": "image", "source": {"data": "data:image/png;base64,AAAA", "media_type": "image/png"}},
                    {"type": "image", "source": {}},
                ],
            }],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();
        let parts = messages[0]["content"].as_array().unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["url"], "https://example.com/cat.png");
        assert!(parts[0].get("media_type").is_none());
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(parts[1]["media_type"], "image/png");
    }

    #[test]
    fn test_empty_user_parts_omit_message() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": ""}],
            }],
        });

        let result = convert_anthropic_request(&body);
        assert!(result["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_assistant_text_parts_join_with_newline() {
        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "one"},
                    {"type": "text", "text": "two"},
                ],
            }],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "one\ntwo");
        assert!(messages[0].get("tool_calls").is_none());
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "Seoul"}},
                    {"type": "tool_use", "name": ""},
                ],
            }],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();
        let calls = messages[0]["tool_calls"].as_array().unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "toolu_9");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "get_weather");
        assert_eq!(calls[0]["function"]["arguments"], "{\"city\":\"Seoul\"}");
    }

    #[test]
    fn test_assistant_tool_use_without_input_gets_empty_object() {
        let body = json!({
            "messages": [{
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "t", "name": "noop"}],
            }],
        });

        let result = convert_anthropic_request(&body);
        let calls = result["messages"][0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["function"]["arguments"], "{}");
    }

    #[test]
    fn test_assistant_with_nothing_is_omitted() {
        let body = json!({
            "messages": [{"role": "assistant", "content": []}],
        });

        let result = convert_anthropic_request(&body);
        assert!(result["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_tools_mapping_and_empty_names_skipped() {
        let body = json!({
            "messages": [],
            "tools": [
                {"name": "search", "description": "Find things", "input_schema": {"type": "object"}},
                {"name": "", "input_schema": {}},
                {"name": "bare"},
            ],
        });

        let result = convert_anthropic_request(&body);
        let tools = result["tools"].as_array().unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "search");
        assert_eq!(tools[0]["function"]["description"], "Find things");
        assert_eq!(tools[0]["function"]["parameters"], json!({"type": "object"}));
        assert_eq!(tools[1]["function"]["description"], "");
    }

    #[test]
    fn test_no_tools_key_without_named_tools() {
        let body = json!({"messages": [], "tools": [{"name": ""}]});
        let result = convert_anthropic_request(&body);
        assert!(result.get("tools").is_none());
    }

    #[test]
    fn test_tool_choice_copied_through() {
        let body = json!({
            "messages": [],
            "tool_choice": {"type": "tool", "name": "search"},
        });

        let result = convert_anthropic_request(&body);
        assert_eq!(result["tool_choice"], json!({"type": "tool", "name": "search"}));
    }

    #[test]
    fn test_top_level_passthrough() {
        let body = json!({
            "messages": [],
            "model": "gpt-4o",
            "max_tokens": 1024,
            "temperature": 0.5,
            "stream": true,
        });

        let result = convert_anthropic_request(&body);
        assert_eq!(result["model"], "gpt-4o");
        assert_eq!(result["max_tokens"], 1024);
        assert_eq!(result["temperature"], 0.5);
        assert_eq!(result["stream"], true);
    }

    #[test]
    fn test_message_order_preserved() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "q1"},
                {"role": "assistant", "content": "a1"},
                {"role": "user", "content": "q2"},
            ],
        });

        let result = convert_anthropic_request(&body);
        let messages = result["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
    }
}
