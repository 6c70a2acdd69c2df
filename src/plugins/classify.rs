// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Transcript line classification
//!
//! Turns one JSONL transcript record into zero or more status observations
//! plus the token usage it reports. Lines that are not JSON, or whose type is
//! not recognised, classify to nothing.

use std::path::Path;

use serde_json::{json, Value};

use crate::core::{Details, Status};
use crate::middleware::TokenUsage;

/// Prefix of MCP tool names: `mcp__<server>__<tool>`
const MCP_TOOL_PREFIX: &str = "mcp__";

/// Transient API errors that do not flip the status to error
const IGNORABLE_ERRORS: &[&str] = &[
    "overloaded_error",
    "rate_limit_error",
    "timeout_error",
    "connection_error",
    "service_unavailable",
];

const CRITICAL_ERRORS: &[&str] = &[
    "invalid_request_error",
    "authentication_error",
    "permission_error",
    "not_found_error",
    "api_error",
];

/// One inferred status with its evidence
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: Status,
    pub confidence: f64,
    pub details: Details,
}

impl Observation {
    fn new(status: Status, confidence: f64, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Details::new(),
        };
        Self {
            status,
            confidence,
            details,
        }
    }
}

/// Result of classifying a single line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub observations: Vec<Observation>,
    pub usage: TokenUsage,
}

/// Line classifier options
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    /// Treat every API error, including transient ones, as an error status
    pub show_all_errors: bool,
}

impl Classifier {
    pub fn new(show_all_errors: bool) -> Self {
        Self { show_all_errors }
    }

    pub fn classify_line(&self, line: &str) -> Classified {
        let line = line.trim();
        if line.is_empty() {
            return Classified::default();
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => self.classify(&record),
            Err(_) => Classified::default(),
        }
    }

    pub fn classify(&self, record: &Value) -> Classified {
        let mut out = Classified::default();
        match record.get("type").and_then(Value::as_str) {
            Some("assistant") => self.assistant(record, &mut out),
            Some("user") => out.observations.push(Observation::new(
                Status::Running,
                0.95,
                json!({ "event": "user_input" }),
            )),
            Some("summary") => summary(record, &mut out),
            Some("progress") => progress(record, &mut out),
            Some("system") => self.system(record, &mut out),
            Some("file-history-snapshot") => out.observations.push(Observation::new(
                Status::Idle,
                0.90,
                json!({
                    "event": "session_start",
                    "message_id": record.get("messageId").and_then(Value::as_str).unwrap_or("unknown"),
                }),
            )),
            _ => {}
        }
        out
    }

    fn assistant(&self, record: &Value, out: &mut Classified) {
        let message = record.get("message").unwrap_or(&Value::Null);
        let empty = Vec::new();
        let content = message
            .get("content")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        if let Some(usage) = message.get("usage") {
            out.usage = TokenUsage::from_api_usage(usage);
        }

        match message.get("stop_reason").and_then(Value::as_str) {
            Some("end_turn") => {
                out.observations.push(Observation::new(
                    Status::Idle,
                    0.95,
                    json!({ "event": "end_turn" }),
                ));
                return;
            }
            Some("stop_sequence") => {
                out.observations.push(Observation::new(
                    Status::Idle,
                    0.90,
                    json!({ "event": "stop_sequence" }),
                ));
                return;
            }
            // waiting on the tool result, status unchanged
            Some("tool_use") => return,
            _ => {}
        }

        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("thinking") => out.observations.push(Observation::new(
                    Status::Thinking,
                    0.95,
                    json!({ "event": "thinking" }),
                )),
                Some("tool_use") => out.observations.push(tool_use(block)),
                Some("text") => out.observations.push(Observation::new(
                    Status::Working,
                    0.80,
                    json!({ "event": "text" }),
                )),
                _ => {}
            }
        }

        let has_tool_use = content
            .iter()
            .any(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"));
        let asks_question = content.iter().any(|b| {
            b.get("type").and_then(Value::as_str) == Some("text")
                && b.get("text")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.contains('?') || t.contains('？'))
        });
        if !out.usage.is_empty() && !has_tool_use && asks_question {
            out.observations.push(Observation::new(
                Status::Idle,
                0.85,
                json!({ "event": "question_asked" }),
            ));
        }
    }

    fn system(&self, record: &Value, out: &mut Classified) {
        match record.get("subtype").and_then(Value::as_str) {
            Some("turn_duration") => out.observations.push(Observation::new(
                Status::Idle,
                0.95,
                json!({
                    "event": "turn_complete",
                    "duration_ms": record.get("durationMs").and_then(Value::as_u64).unwrap_or(0),
                }),
            )),
            Some("api_error") => {
                let error = record.pointer("/error/error").unwrap_or(&Value::Null);
                let error_type = error.get("type").and_then(Value::as_str).unwrap_or("unknown");
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");

                if !self.show_all_errors && IGNORABLE_ERRORS.contains(&error_type) {
                    return;
                }
                if self.show_all_errors || CRITICAL_ERRORS.contains(&error_type) {
                    out.observations.push(Observation::new(
                        Status::Error,
                        0.95,
                        json!({
                            "event": "api_error",
                            "error_type": error_type,
                            "error": message,
                        }),
                    ));
                }
            }
            Some("local_command") => {
                let command = record.get("command").and_then(Value::as_str).unwrap_or("unknown");
                out.observations.push(Observation::new(
                    Status::Executing,
                    0.90,
                    json!({
                        "event": "local_command",
                        "command": file_name(command),
                    }),
                ));
            }
            _ => {}
        }
    }
}

/// Status a tool call implies
pub fn tool_status(tool: &str) -> Status {
    match tool {
        "Bash" | "KillShell" => Status::Executing,
        "AskUserQuestion" => Status::Idle,
        "Read" => Status::Reading,
        "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => Status::Writing,
        "thinking" => Status::Thinking,
        _ => Status::Working,
    }
}

fn tool_use(block: &Value) -> Observation {
    let name = block.get("name").and_then(Value::as_str).unwrap_or("");
    let input = block.get("input").unwrap_or(&Value::Null);

    let mut details = json!({
        "event": "tool_use",
        "tool": name,
        "context": safe_context(input),
    });

    if let Some(rest) = name.strip_prefix(MCP_TOOL_PREFIX) {
        let (server, tool) = match rest.split_once("__") {
            Some((server, tool)) => (server, tool),
            None => ("unknown", rest),
        };
        details["mcp"] = json!({ "server": server, "tool": tool });
    }

    Observation::new(tool_status(name), 0.90, details)
}

/// Metadata-only view of tool input; content never leaves the plugin.
fn safe_context(input: &Value) -> Value {
    let mut context = Details::new();
    if let Some(path) = input.get("file_path").and_then(Value::as_str) {
        context.insert("file".into(), file_name(path).into());
    }
    if let Some(path) = input.get("notebook_path").and_then(Value::as_str) {
        context.insert("file".into(), file_name(path).into());
    }
    for key in ["pattern", "method"] {
        if let Some(value) = input.get(key) {
            context.insert(key.into(), value.clone());
        }
    }
    Value::Object(context)
}

fn summary(record: &Value, out: &mut Classified) {
    match record.get("usage") {
        Some(usage) if usage.is_object() => {
            out.usage = TokenUsage::from_api_usage(usage);
            out.observations.push(Observation::new(
                Status::Idle,
                0.85,
                json!({
                    "event": "summary",
                    "total_tokens": out.usage.sum(),
                }),
            ));
        }
        _ => out.observations.push(Observation::new(
            Status::Idle,
            0.80,
            json!({
                "event": "project_summary",
                "summary": record.get("summary").and_then(Value::as_str).unwrap_or(""),
                "leaf_uuid": record.get("leafUuid").and_then(Value::as_str).unwrap_or(""),
            }),
        )),
    }
}

fn progress(record: &Value, out: &mut Classified) {
    let data = record.get("data").unwrap_or(&Value::Null);
    let state = data.get("status").and_then(Value::as_str);
    let elapsed_ms = data.get("elapsedTimeMs").and_then(Value::as_u64).unwrap_or(0);

    match data.get("type").and_then(Value::as_str) {
        Some("mcp_progress") => {
            let mcp = json!({
                "server": data.get("serverName").and_then(Value::as_str).unwrap_or("unknown"),
                "tool": data.get("toolName").and_then(Value::as_str).unwrap_or("unknown"),
            });
            match state {
                Some("started") => out.observations.push(Observation::new(
                    Status::Working,
                    0.85,
                    json!({ "event": "mcp_progress", "status": "started", "mcp": mcp }),
                )),
                Some("completed") => out.observations.push(Observation::new(
                    Status::Working,
                    0.80,
                    json!({
                        "event": "mcp_progress",
                        "status": "completed",
                        "elapsed_ms": elapsed_ms,
                        "mcp": mcp,
                    }),
                )),
                _ => {}
            }
        }
        Some("bash_progress") => {
            let command = file_name(data.get("command").and_then(Value::as_str).unwrap_or("unknown"));
            match state {
                Some("started") => out.observations.push(Observation::new(
                    Status::Executing,
                    0.90,
                    json!({ "event": "bash_progress", "status": "started", "command": command }),
                )),
                Some("completed") => {
                    let exit_code = data.get("exitCode").and_then(Value::as_i64).unwrap_or(0);
                    // success keeps the current status
                    if exit_code != 0 {
                        out.observations.push(Observation::new(
                            Status::Error,
                            0.90,
                            json!({
                                "event": "bash_progress",
                                "status": "failed",
                                "command": command,
                                "exit_code": exit_code,
                                "elapsed_ms": elapsed_ms,
                            }),
                        ));
                    }
                }
                _ => {}
            }
        }
        Some("hook_progress") if state == Some("started") => {
            out.observations.push(Observation::new(
                Status::Executing,
                0.85,
                json!({
                    "event": "hook_progress",
                    "status": "started",
                    "hook": data.get("hookName").and_then(Value::as_str).unwrap_or("unknown"),
                }),
            ));
        }
        _ => {}
    }
}

/// Final component of a `/` or `\` separated path.
pub fn file_name(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .to_string()
}

/// Identity of a transcript derived from its location under the projects root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptInfo {
    pub project: String,
    pub session_id: String,
    pub agent_id: Option<String>,
}

/// Parse `<project>/<session>.jsonl` or `<project>/<session>/subagents/<agent>.jsonl`.
pub fn parse_transcript_path(path: &Path) -> Option<TranscriptInfo> {
    let stem = path.file_stem()?.to_string_lossy().to_string();
    let parent = path.parent()?;

    if parent.file_name().is_some_and(|n| n == "subagents") {
        let session_dir = parent.parent()?;
        let project = session_dir.parent()?.file_name()?;
        Some(TranscriptInfo {
            project: project.to_string_lossy().to_string(),
            session_id: session_dir.file_name()?.to_string_lossy().to_string(),
            agent_id: Some(stem),
        })
    } else {
        Some(TranscriptInfo {
            project: parent.file_name()?.to_string_lossy().to_string(),
            session_id: stem,
            agent_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(classified: &Classified) -> Vec<Status> {
        classified.observations.iter().map(|o| o.status).collect()
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify_line("not json {"), Classified::default());
        assert_eq!(classifier.classify_line(""), Classified::default());
        assert_eq!(classifier.classify_line(r#"{"type":"mystery"}"#), Classified::default());
    }

    #[test]
    fn test_summary_with_huge_usage() {
        let line = r#"{"type":"summary","usage":{"input_tokens":18446744073709551615,"output_tokens":5}}"#;
        let classified = Classifier::default().classify_line(line);
        assert_eq!(statuses(&classified), vec![Status::Idle]);
        assert_eq!(classified.observations[0].details["total_tokens"], json!(u64::MAX));
    }

    #[test]
    fn test_assistant_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"thinking","thinking":"hmm"},
            {"type":"tool_use","name":"Bash","input":{"command":"cargo test"}}
        ],"usage":{"input_tokens":10,"output_tokens":4,"cache_read_input_tokens":100}}}"#
            .replace('\n', "");
        let classified = Classifier::default().classify_line(&line);

        assert_eq!(statuses(&classified), vec![Status::Thinking, Status::Executing]);
        assert_eq!(classified.usage.input, 10);
        assert_eq!(classified.usage.output, 4);
        assert_eq!(classified.usage.cache_read, 100);
        // tool input content never appears in the details
        let tool = &classified.observations[1].details;
        assert_eq!(tool["tool"], json!("Bash"));
        assert_eq!(tool["context"], json!({}));
    }

    #[test]
    fn test_tool_context_and_mcp() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/home/u/src/main.rs"}},{"type":"tool_use","name":"mcp__context7__query-docs","input":{}}]}}"#;
        let classified = Classifier::default().classify_line(line);

        assert_eq!(statuses(&classified), vec![Status::Reading, Status::Working]);
        assert_eq!(classified.observations[0].details["context"]["file"], json!("main.rs"));
        assert_eq!(
            classified.observations[1].details["mcp"],
            json!({ "server": "context7", "tool": "query-docs" })
        );
    }

    #[test]
    fn test_stop_reasons() {
        let classifier = Classifier::default();
        let end = classifier.classify_line(
            r#"{"type":"assistant","message":{"stop_reason":"end_turn","content":[{"type":"text","text":"done"}]}}"#,
        );
        assert_eq!(statuses(&end), vec![Status::Idle]);

        let tool = classifier.classify_line(
            r#"{"type":"assistant","message":{"stop_reason":"tool_use","content":[{"type":"tool_use","name":"Bash"}]}}"#,
        );
        assert!(tool.observations.is_empty());
    }

    #[test]
    fn test_question_means_waiting() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Shall I continue?"}],"usage":{"output_tokens":7}}}"#;
        let classified = Classifier::default().classify_line(line);
        assert_eq!(statuses(&classified), vec![Status::Working, Status::Idle]);
    }

    #[test]
    fn test_api_error_filtering() {
        let transient = r#"{"type":"system","subtype":"api_error","error":{"error":{"type":"overloaded_error","message":"busy"}}}"#;
        let critical = r#"{"type":"system","subtype":"api_error","error":{"error":{"type":"authentication_error","message":"bad key"}}}"#;

        assert!(Classifier::new(false).classify_line(transient).observations.is_empty());
        assert_eq!(statuses(&Classifier::new(true).classify_line(transient)), vec![Status::Error]);
        assert_eq!(statuses(&Classifier::new(false).classify_line(critical)), vec![Status::Error]);
    }

    #[test]
    fn test_progress_events() {
        let classifier = Classifier::default();
        let failed = classifier.classify_line(
            r#"{"type":"progress","data":{"type":"bash_progress","status":"completed","command":"/usr/bin/make","exitCode":2}}"#,
        );
        assert_eq!(statuses(&failed), vec![Status::Error]);
        assert_eq!(failed.observations[0].details["command"], json!("make"));

        let ok = classifier.classify_line(
            r#"{"type":"progress","data":{"type":"bash_progress","status":"completed","command":"make","exitCode":0}}"#,
        );
        assert!(ok.observations.is_empty());
    }

    #[test]
    fn test_transcript_paths() {
        let main = parse_transcript_path(Path::new("/p/my-app/abc123.jsonl")).unwrap();
        assert_eq!(main.project, "my-app");
        assert_eq!(main.session_id, "abc123");
        assert_eq!(main.agent_id, None);

        let sub = parse_transcript_path(Path::new("/p/my-app/abc123/subagents/agent-7.jsonl")).unwrap();
        assert_eq!(sub.project, "my-app");
        assert_eq!(sub.session_id, "abc123");
        assert_eq!(sub.agent_id.as_deref(), Some("agent-7"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name(r"C:\work\notes.md"), "notes.md");
        assert_eq!(file_name("plain"), "plain");
    }
}
