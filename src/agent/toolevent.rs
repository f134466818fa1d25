//! Parsing of line-delimited tool-call records from an agent
//! subprocess's stdout (spec §4.3).
//!
//! Tolerates both a flat `{name, arguments}` shape and a nested
//! `{tool_call: {<kind>ToolCall: {args}}}` shape, mapping either onto a
//! small canonical set of tool kinds. Malformed lines are skipped, never
//! fatal — a partial line is buffered by the caller until a newline
//! completes it.

use serde::Deserialize;

/// Canonical tool kind, independent of how the agent subprocess names
/// its own tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Read,
    Write,
    Edit,
    Shell,
    Grep,
    Search,
    Delete,
    Web,
    Glob,
    Todo,
    Other,
}

impl ToolKind {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "read" | "readtoolcall" | "cat" => ToolKind::Read,
            "write" | "writetoolcall" => ToolKind::Write,
            "edit" | "edittoolcall" | "patch" => ToolKind::Edit,
            "shell" | "shelltoolcall" | "bash" | "exec" => ToolKind::Shell,
            "grep" | "greptoolcall" => ToolKind::Grep,
            "search" | "searchtoolcall" => ToolKind::Search,
            "delete" | "deletetoolcall" | "rm" => ToolKind::Delete,
            "web" | "webtoolcall" | "fetch" => ToolKind::Web,
            "glob" | "globtoolcall" | "find" => ToolKind::Glob,
            "todo" | "todotoolcall" | "todowrite" => ToolKind::Todo,
            _ => ToolKind::Other,
        }
    }
}

/// A parsed `tool_call` event, start or end, with its call id.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub call_id: String,
    pub kind: ToolKind,
    /// Free-form attribute the observer/trace layer surfaces verbatim
    /// (command text, file path, or query, depending on `kind`).
    pub detail: Option<String>,
    pub is_start: bool,
}

#[derive(Debug, Deserialize)]
struct FlatRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    subtype: Option<String>,
    id: Option<String>,
    name: Option<String>,
    arguments: Option<serde_json::Value>,
    tool_call: Option<serde_json::Value>,
}

/// Parse one line of agent stdout into a `ToolEvent`, or `None` if the
/// line isn't a recognized `tool_call` record (including plain
/// non-JSON chatter, which is common and not an error).
pub fn parse_line(line: &str) -> Option<ToolEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let record: FlatRecord = serde_json::from_str(line).ok()?;
    if record.record_type.as_deref() != Some("tool_call") {
        return None;
    }
    let is_start = match record.subtype.as_deref() {
        Some("started") => true,
        Some("completed") => false,
        _ => return None,
    };
    let call_id = record.id?;

    if let Some(name) = &record.name {
        let detail = record
            .arguments
            .as_ref()
            .and_then(summarize_arguments);
        return Some(ToolEvent {
            call_id,
            kind: ToolKind::from_name(name),
            detail,
            is_start,
        });
    }

    if let Some(nested) = &record.tool_call {
        if let serde_json::Value::Object(map) = nested {
            if let Some((kind_name, args)) = map.iter().next() {
                let kind_name = kind_name.strip_suffix("ToolCall").unwrap_or(kind_name);
                let detail = summarize_arguments(args);
                return Some(ToolEvent {
                    call_id,
                    kind: ToolKind::from_name(kind_name),
                    detail,
                    is_start,
                });
            }
        }
    }

    None
}

fn summarize_arguments(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            for key in ["command", "file_path", "path", "query", "pattern", "url"] {
                if let Some(v) = map.get(key).and_then(|v| v.as_str()) {
                    return Some(v.to_string());
                }
            }
            None
        }
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_started_record() {
        let line = r#"{"type":"tool_call","subtype":"started","id":"c1","name":"shell","arguments":{"command":"ls -la"}}"#;
        let ev = parse_line(line).unwrap();
        assert_eq!(ev.call_id, "c1");
        assert!(ev.is_start);
        assert_eq!(ev.kind, ToolKind::Shell);
        assert_eq!(ev.detail.as_deref(), Some("ls -la"));
    }

    #[test]
    fn parses_flat_completed_record() {
        let line = r#"{"type":"tool_call","subtype":"completed","id":"c1","name":"shell"}"#;
        let ev = parse_line(line).unwrap();
        assert!(!ev.is_start);
    }

    #[test]
    fn parses_nested_shape() {
        let line = r#"{"type":"tool_call","subtype":"started","id":"c2","tool_call":{"ReadToolCall":{"file_path":"src/main.rs"}}}"#;
        let ev = parse_line(line).unwrap();
        assert_eq!(ev.kind, ToolKind::Read);
        assert_eq!(ev.detail.as_deref(), Some("src/main.rs"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert!(parse_line("not json at all").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line(r#"{"type":"chat","text":"hi"}"#).is_none());
        assert!(parse_line(r#"{"type":"tool_call","subtype":"unknown","id":"c1"}"#).is_none());
    }

    #[test]
    fn unknown_tool_name_maps_to_other() {
        let line = r#"{"type":"tool_call","subtype":"started","id":"c1","name":"frobnicate"}"#;
        let ev = parse_line(line).unwrap();
        assert_eq!(ev.kind, ToolKind::Other);
    }
}
