// Shared conversion helpers
//
// Everything here is lenient on purpose: both vendors keep growing their
// schemas, so a value of an unexpected kind coerces to an empty default
// rather than failing the request.

use serde_json::Value;
use uuid::Uuid;

/// Maps an OpenAI finish_reason onto the Anthropic stop_reason vocabulary.
///
/// Unknown or missing values map to "end_turn".
pub fn map_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Converts a JSON value into its string representation.
///
/// Strings pass through, numbers keep integer exactness, null and missing
/// values become the empty string, everything else serializes to JSON.
pub fn to_str(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Converts a value that can be interpreted as an integer into an i64.
pub fn to_int(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Borrows a value as a sequence; non-sequences yield an empty slice.
pub fn to_slice(v: Option<&Value>) -> &[Value] {
    v.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Generates a unique message ID in Anthropic format.
pub fn generate_message_id() -> String {
    format!("msg_{}", &Uuid::new_v4().simple().to_string()[..24])
}

/// Generates an ID for a server_tool_use block.
pub fn generate_server_tool_id() -> String {
    format!("srvtoolu_{}", Uuid::new_v4())
}
