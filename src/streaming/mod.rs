// OpenAI SSE to Anthropic SSE translation
//
// The Copilot API streams OpenAI-style chat completion chunks. This module
// re-frames that stream into the Anthropic Messages event sequence: exactly
// one message_start, content_block_start/delta/stop triples per logical
// content block, then message_delta and message_stop. Block indices are
// assigned strictly monotonically per stream, starting at 0.

use std::collections::{BTreeSet, HashMap};

use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};

use crate::converters::core::{generate_message_id, map_stop_reason, to_int, to_slice, to_str};
use crate::error::ApiError;

/// Hard cap on a single buffered SSE frame.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ==================================================================================================
// Frame Scanning
// ==================================================================================================

/// Splits an SSE byte stream into frames separated by blank lines.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buffer: Vec<u8>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the scanner and extract complete frames.
    ///
    /// Fails when the pending frame outgrows MAX_FRAME_BYTES.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ApiError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = find_double_newline(&self.buffer) {
            let frame = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
            self.buffer.drain(..pos + 2);
            frames.push(frame);
        }

        if self.buffer.len() > MAX_FRAME_BYTES {
            return Err(ApiError::FrameTooLarge(MAX_FRAME_BYTES));
        }
        Ok(frames)
    }

    /// Returns whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(rest)
    }
}

fn find_double_newline(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|window| window == b"\n\n")
}

/// Extracts the data payload from an SSE frame.
///
/// Returns None when no line carries a `data: ` prefix, which happens when a
/// JSON payload was split across frames mid-value.
fn data_payload(frame: &str) -> Option<&str> {
    frame.lines().find_map(|line| line.strip_prefix("data: "))
}

// ==================================================================================================
// Stream State Machine
// ==================================================================================================

/// Tracking state for one tool-use block during streaming.
#[derive(Debug)]
struct ToolCallState {
    id: String,
    name: String,
    /// Raw argument fragments in arrival order
    arguments: String,
    /// Anthropic content block index assigned to this call
    block_index: i64,
}

/// Stateful translator for one upstream text/event-stream.
///
/// Owned by the request task that reads the upstream body; all mutation
/// happens through process_frame/finish on that task, so no locking.
pub struct SseConverter {
    /// Accumulator for a JSON payload split across frames
    previous_chunk: String,
    message_started: bool,
    /// Pending message_delta payload carrying accumulated usage and the
    /// finish-mapped stop reason; emitted on [DONE]
    stop_reason: Option<Value>,
    /// Index of the block currently open, -1 when none
    current_block_index: i64,
    /// Next fresh index for text/thinking blocks
    content_index: i64,
    thinking_started: bool,
    text_started: bool,
    /// Counts tool blocks to derive fresh indices above content_index
    tool_call_chunks: i64,
    /// Keyed by the upstream delta's positional index
    tool_calls_by_index: HashMap<usize, ToolCallState>,
    /// Indices of blocks started but not yet stopped
    open_blocks: BTreeSet<i64>,
    done: bool,
}

impl Default for SseConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SseConverter {
    pub fn new() -> Self {
        Self {
            previous_chunk: String::new(),
            message_started: false,
            stop_reason: None,
            current_block_index: -1,
            content_index: 0,
            thinking_started: false,
            text_started: false,
            tool_call_chunks: 0,
            tool_calls_by_index: HashMap::new(),
            open_blocks: BTreeSet::new(),
            done: false,
        }
    }

    /// True once [DONE] (or a synthesized end of stream) has been processed.
    pub fn finished(&self) -> bool {
        self.done
    }

    /// Translates one SSE frame into zero or more formatted Anthropic events.
    pub fn process_frame(&mut self, frame: &str) -> Vec<String> {
        let mut events = Vec::new();
        let frame = frame.trim();
        if frame.is_empty() || self.done {
            return events;
        }

        let payload = match data_payload(frame) {
            Some(data) => data.to_string(),
            None if !self.previous_chunk.is_empty() => {
                let joined = format!("{}{}", self.previous_chunk, frame);
                self.previous_chunk.clear();
                tracing::debug!("continuing previous chunk: {}", joined);
                joined
            }
            None => frame.to_string(),
        };

        if payload == "[DONE]" {
            self.emit_final(&mut events);
            return events;
        }

        let body: Value = match serde_json::from_str(&payload) {
            Ok(body) => body,
            Err(_) => {
                // Possibly an incomplete JSON payload; retry once the next
                // frame arrives
                self.previous_chunk.push_str(&payload);
                return events;
            }
        };

        if let Some(error) = body.get("error").filter(|e| e.is_object()) {
            events.push(build_event(
                "error",
                &json!({
                    "type": "error",
                    "message": {"type": "api_error", "message": error.to_string()},
                }),
            ));
            return events;
        }

        if !self.message_started {
            self.message_started = true;
            events.push(message_start_event(&to_str(body.get("model"))));
        }

        if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
            self.fold_usage(usage);
        }

        let Some(choice) = to_slice(body.get("choices")).first() else {
            return events;
        };
        let delta = choice.get("delta");

        // Thinking deltas form their own block and preempt the rest of the
        // chunk
        if let Some(thinking) = delta.and_then(|d| d.get("thinking")).filter(|t| t.is_object()) {
            self.process_thinking(thinking, &mut events);
            return events;
        }
        if self.thinking_started {
            let index = self.current_block_index;
            self.stop_block(&mut events, index);
            self.current_block_index = -1;
            self.thinking_started = false;
            self.content_index += 1;
        }

        let first_part = delta.and_then(|d| d.get("content")).and_then(|c| c.get(0));
        let delta_text = to_str(first_part.and_then(|p| p.get("text")));
        if !delta_text.is_empty() {
            if !self.text_started {
                let index = self.content_index;
                self.start_block(&mut events, index, json!({"type": "text", "text": ""}));
                self.text_started = true;
                self.current_block_index = index;
            }
            events.push(build_event(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": self.current_block_index,
                    "delta": {"type": "text_delta", "text": delta_text},
                }),
            ));
        }

        // Some providers announce tool blocks inside delta.content rather
        // than tool_calls; open a placeholder block for those
        if !to_str(first_part.and_then(|p| p.get("id"))).is_empty() && !self.text_started {
            let index = self.content_index;
            self.start_block(
                &mut events,
                index,
                json!({"type": "tool_use", "id": "", "name": "", "input": {}}),
            );
            self.current_block_index = index;
        }

        for (index, call) in to_slice(delta.and_then(|d| d.get("tool_calls")))
            .iter()
            .enumerate()
        {
            if call.is_object() {
                self.process_tool_call(index, call, &mut events);
            }
        }

        let finish_reason = to_str(choice.get("finish_reason"));
        if !finish_reason.is_empty() {
            if self.current_block_index >= 0 {
                let index = self.current_block_index;
                self.stop_block(&mut events, index);
                self.current_block_index = -1;
            }
            let mapped = map_stop_reason(&finish_reason);
            match self.stop_reason.as_mut() {
                Some(pending) => {
                    pending["delta"]["stop_reason"] = json!(mapped);
                }
                None => {
                    self.stop_reason = Some(message_delta_payload(mapped, 0, 0, 0));
                }
            }
        }

        events
    }

    fn start_block(&mut self, events: &mut Vec<String>, index: i64, content_block: Value) {
        self.open_blocks.insert(index);
        events.push(build_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": content_block,
            }),
        ));
    }

    fn stop_block(&mut self, events: &mut Vec<String>, index: i64) {
        self.open_blocks.remove(&index);
        events.push(block_stop_event(index));
    }

    /// Treats end of stream as [DONE] when the upstream never sent one.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.done {
            self.emit_final(&mut events);
        }
        events
    }

    fn process_thinking(&mut self, thinking: &Value, events: &mut Vec<String>) {
        // Close whatever non-thinking block is open
        if self.current_block_index >= 0 && !self.thinking_started {
            let index = self.current_block_index;
            self.stop_block(events, index);
            self.current_block_index = -1;
        }
        if !self.thinking_started {
            self.thinking_started = true;
            let index = self.content_index;
            self.start_block(events, index, json!({"type": "thinking", "thinking": ""}));
            self.current_block_index = index;
        }
        let signature = to_str(thinking.get("signature"));
        if !signature.is_empty() {
            events.push(build_event(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": self.current_block_index,
                    "delta": {"type": "thinking_delta", "signature": signature},
                }),
            ));
        }
        let reasoning = to_str(thinking.get("reasoning"));
        if !reasoning.is_empty() {
            events.push(build_event(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": self.current_block_index,
                    "delta": {"type": "thinking_delta", "text": reasoning},
                }),
            ));
        }
    }

    fn process_tool_call(&mut self, index: usize, call: &Value, events: &mut Vec<String>) {
        if !self.tool_calls_by_index.contains_key(&index) {
            self.tool_call_chunks += 1;
            let block_index = self.content_index + self.tool_call_chunks;
            let id = to_str(call.get("id"));
            let mut name = to_str(call.pointer("/function/name"));
            if name.is_empty() {
                name = format!("tool_{}", index);
            }
            self.start_block(
                events,
                block_index,
                json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
            );
            self.current_block_index = block_index;
            self.tool_calls_by_index.insert(
                index,
                ToolCallState {
                    id,
                    name,
                    arguments: String::new(),
                    block_index,
                },
            );
        }

        let Some(function) = call.get("function").filter(|f| f.is_object()) else {
            return;
        };
        let Some(state) = self.tool_calls_by_index.get_mut(&index) else {
            return;
        };

        // A later chunk may carry the real id and name; update the stored
        // state without re-announcing the block
        let id = to_str(call.get("id"));
        if !id.is_empty() {
            state.id = id;
            let name = to_str(function.get("name"));
            if !name.is_empty() {
                state.name = name;
            }
        }

        if let Some(Value::String(args)) = function.get("arguments") {
            events.push(build_event(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": state.block_index,
                    "delta": {"type": "input_json_delta", "partial_json": sanitize_argument(args)},
                }),
            ));
            state.arguments.push_str(args);
        }
    }

    /// Folds a usage chunk into the pending message_delta payload, summing
    /// counters across chunks.
    fn fold_usage(&mut self, usage: &Value) {
        let prompt = to_int(usage.get("prompt_tokens"));
        let completion = to_int(usage.get("completion_tokens"));
        let cache_read = to_int(usage.get("cache_read_input_tokens"));

        match self.stop_reason.as_mut() {
            Some(pending) => {
                let current = pending.get("usage").cloned().unwrap_or_default();
                pending["usage"] = json!({
                    "input_tokens": to_int(current.get("input_tokens")) + prompt,
                    "output_tokens": to_int(current.get("output_tokens")) + completion,
                    "cache_read_input_tokens":
                        to_int(current.get("cache_read_input_tokens")) + cache_read,
                });
            }
            None => {
                self.stop_reason = Some(message_delta_payload(
                    "end_turn", prompt, completion, cache_read,
                ));
            }
        }
    }

    fn emit_final(&mut self, events: &mut Vec<String>) {
        self.done = true;
        // Even an empty upstream stream must produce a valid Anthropic
        // sequence
        if !self.message_started {
            self.message_started = true;
            events.push(message_start_event(""));
        }
        if self.current_block_index >= 0 {
            let index = self.current_block_index;
            self.stop_block(&mut *events, index);
            self.current_block_index = -1;
        }
        // Close any block the upstream abandoned without a finish_reason
        for index in std::mem::take(&mut self.open_blocks) {
            events.push(block_stop_event(index));
        }
        for state in self.tool_calls_by_index.values() {
            tracing::debug!(
                tool = %state.name,
                id = %state.id,
                argument_bytes = state.arguments.len(),
                "tool call complete"
            );
        }
        let pending = self
            .stop_reason
            .take()
            .unwrap_or_else(|| message_delta_payload("end_turn", 0, 0, 0));
        events.push(build_event("message_delta", &pending));
        events.push(build_event("message_stop", &json!({"type": "message_stop"})));
    }
}

// ==================================================================================================
// Event Builders
// ==================================================================================================

/// Formats data as an Anthropic SSE event.
///
/// ```text
/// event: {event_type}
/// data: {json_data}
///
/// ```
fn build_event(event_type: &str, data: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event_type, data)
}

fn message_start_event(model: &str) -> String {
    build_event(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": generate_message_id(),
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            },
        }),
    )
}

fn block_stop_event(index: i64) -> String {
    build_event(
        "content_block_stop",
        &json!({"type": "content_block_stop", "index": index}),
    )
}

fn message_delta_payload(
    stop_reason: &str,
    input_tokens: i64,
    output_tokens: i64,
    cache_read_input_tokens: i64,
) -> Value {
    json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason, "stop_sequence": null},
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "cache_read_input_tokens": cache_read_input_tokens,
        },
    })
}

/// Attempts to safely fix malformed JSON fragments.
///
/// Valid JSON passes through untouched; anything else loses C0/C1 control
/// characters and gets backslashes and double quotes escaped.
pub fn sanitize_argument(argument: &str) -> String {
    if serde_json::from_str::<Value>(argument).is_ok() {
        return argument.to_string();
    }
    let mut fixed = String::with_capacity(argument.len());
    for ch in argument.chars() {
        if matches!(ch, '\u{00}'..='\u{1f}' | '\u{7f}'..='\u{9f}') {
            continue;
        }
        match ch {
            '\\' => fixed.push_str("\\\\"),
            '"' => fixed.push_str("\\\""),
            _ => fixed.push(ch),
        }
    }
    fixed
}

// ==================================================================================================
// Stream Plumbing
// ==================================================================================================

/// Converts an upstream streaming response into Anthropic SSE event strings.
///
/// Each yielded item is a fully framed `event:`/`data:` block ready to write.
/// EOF without [DONE] still produces the closing message_delta/message_stop
/// pair so the client always sees a complete Anthropic sequence.
pub fn stream_openai_to_anthropic(
    response: reqwest::Response,
) -> BoxStream<'static, Result<String, ApiError>> {
    struct StreamState {
        upstream: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
        scanner: FrameScanner,
        converter: SseConverter,
        finished: bool,
    }

    let state = StreamState {
        upstream: response.bytes_stream().boxed(),
        scanner: FrameScanner::new(),
        converter: SseConverter::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let frames = match state.scanner.push(&chunk) {
                        Ok(frames) => frames,
                        Err(e) => {
                            state.finished = true;
                            return Some((vec![Err(e)], state));
                        }
                    };
                    let mut out: Vec<Result<String, ApiError>> = Vec::new();
                    for frame in frames {
                        out.extend(state.converter.process_frame(&frame).into_iter().map(Ok));
                    }
                    if state.converter.finished() {
                        state.finished = true;
                    }
                    if out.is_empty() {
                        continue;
                    }
                    return Some((out, state));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let err = ApiError::Upstream(format!("stream read failed: {}", e));
                    return Some((vec![Err(err)], state));
                }
                None => {
                    state.finished = true;
                    let mut out: Vec<Result<String, ApiError>> = Vec::new();
                    if let Some(rest) = state.scanner.finish() {
                        out.extend(state.converter.process_frame(&rest).into_iter().map(Ok));
                    }
                    out.extend(state.converter.finish().into_iter().map(Ok));
                    if out.is_empty() {
                        return None;
                    }
                    return Some((out, state));
                }
            }
        }
    })
    .map(futures::stream::iter)
    .flatten()
    .boxed()
}
