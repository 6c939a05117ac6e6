// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Tests for the tool-use repairing stream
//
// Tests cover:
//  1. Fragmented Read input is released as one corrected start plus stop
//  2. Text blocks and non-tool events pass through unchanged
//  3. Invalid JSON, empty input and missing required keys become text blocks
//  4. message_start model ids are normalized
//  5. Interleaved text and tool_use blocks keep their order
//  6. Lines split across reads are reassembled
//  7. Upstream failure ends the stream with an error event
//  8. Client disconnect stops the worker

use super::*;
use crate::model_id::ModelNormalizer;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio::time::{self, Duration};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct AllowAllValidator;

impl ToolCallValidator for AllowAllValidator {
    fn validate(&self, _tool_name: &str, _input: &Map<String, Value>) -> ValidationResult {
        ValidationResult::Allow
    }
}

/// Records every input it is asked about.
struct RecordingValidator {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingValidator {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolCallValidator for RecordingValidator {
    fn validate(&self, tool_name: &str, input: &Map<String, Value>) -> ValidationResult {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), input.clone()));
        ValidationResult::Allow
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn repairer_with(validator: Arc<dyn ToolCallValidator>) -> ToolUseRepairer {
    ToolUseRepairer::new(Arc::new(ModelNormalizer::default()), validator)
}

fn default_processor() -> StreamProcessor {
    StreamProcessor::new(Box::new(repairer_with(Arc::new(
        RequiredParamsValidator::default(),
    ))))
}

/// One chunk per line, each newline-terminated.
fn sse_stream(
    lines: Vec<&str>,
) -> impl tokio_stream::Stream<Item = Result<Bytes, String>> + Send + 'static {
    let chunks: Vec<Result<Bytes, String>> = lines
        .into_iter()
        .map(|l| Ok(Bytes::from(format!("{l}\n"))))
        .collect();
    tokio_stream::iter(chunks)
}

fn raw_stream(
    data: Vec<&'static [u8]>,
) -> impl tokio_stream::Stream<Item = Result<Bytes, String>> + Send + 'static {
    tokio_stream::iter(data.into_iter().map(|d| Ok(Bytes::from_static(d))))
}

async fn collect_output(stream: impl tokio_stream::Stream<Item = Bytes>) -> String {
    let mut output = String::new();
    tokio::pin!(stream);
    while let Some(chunk) = stream.next().await {
        output.push_str(&String::from_utf8_lossy(&chunk));
    }
    output
}

/// Every `data:` payload in the output, parsed.
fn data_events(output: &str) -> Vec<Value> {
    output
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter_map(|d| serde_json::from_str(d).ok())
        .collect()
}

fn feed(handler: &mut dyn LineHandler, lines: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for line in lines {
        out.extend(handler.handle_line(line));
    }
    out.extend(handler.finish());
    out
}

const READ_START: &str = r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"Read","input":{}}}"#;
const READ_FRAG_1: &str = r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"file_"}}"#;
const READ_FRAG_2: &str = r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"path\":\"a.js\"}"}}"#;
const READ_STOP: &str = r#"data: {"type":"content_block_stop","index":1}"#;

// ---------------------------------------------------------------------------
// Line-level repair
// ---------------------------------------------------------------------------

#[test]
fn fragmented_read_is_released_with_parsed_input() {
    let mut r = repairer_with(Arc::new(RequiredParamsValidator::default()));
    let out = feed(
        &mut r,
        &[
            "event: content_block_start",
            READ_START,
            "",
            "event: content_block_delta",
            READ_FRAG_1,
            "",
            "event: content_block_delta",
            READ_FRAG_2,
            "",
            "event: content_block_stop",
            READ_STOP,
            "",
        ],
    );

    assert_eq!(out.len(), 6, "unexpected output: {out:?}");
    assert_eq!(out[0], "event: content_block_start");
    let start: Value = serde_json::from_str(data_payload(&out[1]).unwrap()).unwrap();
    assert_eq!(start["content_block"]["id"], "toolu_01");
    assert_eq!(start["content_block"]["name"], "Read");
    assert_eq!(start["content_block"]["input"]["file_path"], "a.js");
    assert_eq!(out[2], "");
    assert_eq!(out[3], "event: content_block_stop");
    assert_eq!(out[4], READ_STOP);
    assert_eq!(out[5], "");
    assert_eq!(r.released(), 1);
    assert_eq!(r.open_buffers(), 0);
}

#[test]
fn no_input_json_delta_reaches_the_client() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &[READ_START, READ_FRAG_1, READ_FRAG_2, READ_STOP]);
    assert!(out.iter().all(|l| !l.contains("input_json_delta")));
    assert_eq!(out.len(), 3);
}

#[test]
fn validator_sees_tool_name_and_parsed_input() {
    let recorder = Arc::new(RecordingValidator::new());
    let mut r = repairer_with(recorder.clone());
    feed(&mut r, &[READ_START, READ_FRAG_1, READ_FRAG_2, READ_STOP]);
    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "Read");
    assert_eq!(calls[0].1["file_path"], "a.js");
}

#[test]
fn text_block_passes_through_byte_for_byte() {
    let lines = [
        "event: content_block_start",
        r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        "",
        "event: content_block_delta",
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        "",
        "event: content_block_stop",
        r#"data: {"type":"content_block_stop","index":0}"#,
        "",
        "event: ping",
        r#"data: {"type":"ping"}"#,
        "",
    ];
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &lines);
    assert_eq!(out, lines.iter().map(|s| s.to_string()).collect::<Vec<_>>());
}

#[test]
fn message_delta_stop_reason_is_not_rewritten() {
    let line = r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":12}}"#;
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    assert_eq!(feed(&mut r, &[line]), vec![line.to_string()]);
}

#[test]
fn truncated_json_becomes_text_block() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &[READ_START, READ_FRAG_1, READ_STOP]);
    let events: Vec<Value> = out
        .iter()
        .filter_map(|l| data_payload(l))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "content_block_start");
    assert_eq!(events[0]["index"], 1);
    assert_eq!(events[0]["content_block"]["type"], "text");
    let text = events[0]["content_block"]["text"].as_str().unwrap();
    assert!(text.contains("\"Read\""), "{text}");
    assert!(text.contains("not valid JSON"), "{text}");
    assert_eq!(events[1]["type"], "content_block_stop");
    assert_eq!(r.rejected(), 1);
}

#[test]
fn empty_input_becomes_text_block() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &[READ_START, READ_STOP]);
    let start: Value = serde_json::from_str(data_payload(&out[0]).unwrap()).unwrap();
    assert_eq!(start["content_block"]["type"], "text");
    assert!(start["content_block"]["text"]
        .as_str()
        .unwrap()
        .contains("empty"));
}

#[test]
fn empty_input_is_rejected_for_every_tool() {
    let tools = ["Read", "Edit", "Write", "Glob", "Grep", "Bash", "Task", "WebFetch"];
    let mut r = repairer_with(Arc::new(RequiredParamsValidator::default()));

    for (i, tool) in tools.iter().enumerate() {
        let start = format!(
            r#"data: {{"type":"content_block_start","index":{i},"content_block":{{"type":"tool_use","id":"toolu_{i}","name":"{tool}","input":{{}}}}}}"#
        );
        let stop = format!(r#"data: {{"type":"content_block_stop","index":{i}}}"#);
        // No delta at all on even indices, a bare `{}` fragment on odd ones.
        let delta = format!(
            r#"data: {{"type":"content_block_delta","index":{i},"delta":{{"type":"input_json_delta","partial_json":"{{}}"}}}}"#
        );
        let lines: Vec<&str> = if i % 2 == 0 {
            vec![start.as_str(), stop.as_str()]
        } else {
            vec![start.as_str(), delta.as_str(), stop.as_str()]
        };

        let out = feed(&mut r, &lines);
        let block: Value = serde_json::from_str(data_payload(&out[0]).unwrap()).unwrap();
        assert_eq!(block["content_block"]["type"], "text", "{tool}");
        let text = block["content_block"]["text"].as_str().unwrap();
        assert!(text.contains(&format!("\"{tool}\"")), "{tool}: {text}");
        assert!(text.contains("empty"), "{tool}: {text}");
        assert_eq!(r.rejected(), i + 1);
    }
    assert_eq!(r.released(), 0);
}

#[test]
fn missing_required_param_becomes_text_block() {
    let mut r = repairer_with(Arc::new(RequiredParamsValidator::default()));
    let frag = r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":\"a.js\"}"}}"#;
    let out = feed(&mut r, &[READ_START, frag, READ_STOP]);
    let start: Value = serde_json::from_str(data_payload(&out[0]).unwrap()).unwrap();
    assert_eq!(start["content_block"]["type"], "text");
    assert!(start["content_block"]["text"]
        .as_str()
        .unwrap()
        .contains("missing required parameter(s): file_path"));
    assert!(out.iter().all(|l| !l.contains("tool_use")));
}

#[test]
fn replacement_keeps_event_lines_when_stream_uses_them() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(
        &mut r,
        &[
            "event: content_block_start",
            READ_START,
            "",
            "event: content_block_stop",
            READ_STOP,
            "",
        ],
    );
    assert_eq!(out[0], "event: content_block_start");
    assert!(out[1].starts_with("data: "));
    assert_eq!(out[2], "");
    assert_eq!(out[3], "event: content_block_stop");
}

#[test]
fn message_start_model_is_normalized() {
    let line = r#"data: {"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"anthropic.claude-3-5-sonnet-20241022-v2:0","content":[]}}"#;
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &["event: message_start", line]);
    assert_eq!(out[0], "event: message_start");
    let ev: Value = serde_json::from_str(data_payload(&out[1]).unwrap()).unwrap();
    assert_eq!(ev["message"]["model"], "claude-3-5-sonnet-20241022");
    assert_eq!(ev["message"]["id"], "msg_1");
}

#[test]
fn canonical_model_is_left_byte_identical() {
    let line = r#"data: {"type":"message_start","message":{"model":"claude-sonnet-4-20250514"}}"#;
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    assert_eq!(feed(&mut r, &[line]), vec![line.to_string()]);
}

#[test]
fn unparseable_data_passes_through_with_its_event_line() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &["event: weird", "data: not json", ": comment"]);
    assert_eq!(out, vec!["event: weird", "data: not json", ": comment"]);
}

#[test]
fn unterminated_tool_block_is_dropped_at_end() {
    let mut r = repairer_with(Arc::new(AllowAllValidator));
    let out = feed(&mut r, &[READ_START, READ_FRAG_1, "event: message_stop"]);
    assert_eq!(out, vec!["event: message_stop"]);
    assert_eq!(r.open_buffers(), 0);
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processor_repairs_interleaved_blocks_in_order() {
    let input = sse_stream(vec![
        r#"data: {"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet-4-20250514"}}"#,
        r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Reading"}}"#,
        r#"data: {"type":"content_block_stop","index":0}"#,
        READ_START,
        READ_FRAG_1,
        READ_FRAG_2,
        READ_STOP,
        r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        r#"data: {"type":"message_stop"}"#,
    ]);

    let output = collect_output(default_processor().process(input)).await;
    let events = data_events(&output);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(events[4]["content_block"]["input"]["file_path"], "a.js");
    assert_eq!(events[6]["delta"]["stop_reason"], "tool_use");
}

#[tokio::test]
async fn processor_reassembles_lines_split_across_reads() {
    let input = raw_stream(vec![
        b"data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t\",\"na",
        b"me\":\"Read\"}}\n\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"file_path\\\":\\\"b.rs\\\"}\"}}\n",
        b"\ndata: {\"type\":\"content_block_stop\",\"index\":1}",
    ]);

    let output = collect_output(default_processor().process(input)).await;
    let events = data_events(&output);
    assert_eq!(events.len(), 2, "{output}");
    assert_eq!(events[0]["content_block"]["input"]["file_path"], "b.rs");
    assert_eq!(events[1]["type"], "content_block_stop");
}

#[tokio::test]
async fn processor_emits_error_event_on_upstream_failure() {
    let chunks: Vec<Result<Bytes, String>> = vec![
        Ok(Bytes::from(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n",
        )),
        Err("connection reset".to_string()),
        Ok(Bytes::from("data: {\"type\":\"message_stop\"}\n")),
    ];

    let output = collect_output(default_processor().process(tokio_stream::iter(chunks))).await;
    assert!(output.contains("\"text\":\"par\""));
    assert!(output.contains("event: error"));
    assert!(output.contains("connection reset"));
    assert!(!output.contains("message_stop"));
}

#[tokio::test]
async fn slow_consumer_does_not_break_stream() {
    let mut chunks: Vec<Result<Bytes, String>> = Vec::new();
    for i in 0..100 {
        chunks.push(Ok(Bytes::from(format!(
            r#"data: {{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"chunk{i}"}}}}"#,
        ))));
        chunks.push(Ok(Bytes::from("\n")));
    }

    let mut output = String::new();
    let mut stream = Box::pin(default_processor().process(tokio_stream::iter(chunks)));
    while let Some(chunk) = stream.next().await {
        output.push_str(&String::from_utf8_lossy(&chunk));
        time::sleep(Duration::from_millis(1)).await;
    }

    assert!(output.contains("chunk0"));
    assert!(output.contains("chunk99"));
}

#[tokio::test]
async fn client_disconnect_stops_processing() {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, String>>(16);
    let mut output_stream = Box::pin(default_processor().process(ReceiverStream::new(rx)));

    let _ = tx
        .send(Ok(Bytes::from("data: {\"type\":\"ping\"}\n")))
        .await;
    let _ = output_stream.next().await;

    drop(output_stream);

    let _ = tx
        .send(Ok(Bytes::from("data: {\"type\":\"ping\"}\n")))
        .await;
    tokio::task::yield_now().await;

    let closed = time::timeout(Duration::from_secs(1), tx.closed()).await;
    assert!(closed.is_ok(), "processor should stop when client disconnects");
}
