//! Newline-delimited JSON events emitted by the agent CLI on its stdout.
//!
//! The schema is unversioned and the agent may add fields at any time, so
//! every struct here tolerates unknown keys and a line that fails to parse
//! at all is passed through to the log rather than treated as fatal.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    System(SystemEvent),
    Assistant(MessageEvent),
    User(MessageEvent),
    Result(ResultEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    pub session_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default, rename = "input_tokens")]
    pub input_tokens: u64,
    #[serde(default, rename = "cache_creation_input_tokens")]
    pub cache_creation_5m_tokens: u64,
    #[serde(default)]
    pub cache_creation: Option<CacheCreationDetail>,
    #[serde(default, rename = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
    #[serde(default, rename = "output_tokens")]
    pub output_tokens: u64,
    #[serde(default, rename = "server_tool_use")]
    pub server_tool_use: Option<ServerToolUse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheCreationDetail {
    #[serde(default, rename = "ephemeral_5m_input_tokens")]
    pub ephemeral_5m_input_tokens: u64,
    #[serde(default, rename = "ephemeral_1h_input_tokens")]
    pub ephemeral_1h_input_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerToolUse {
    #[serde(default, rename = "web_search_requests")]
    pub web_search_requests: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    pub session_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
}

/// Parse one line of the agent's stdout. `Ok(None)` means the line did not
/// parse as a recognised event and should be treated as opaque log output,
/// not as an error — the agent's own diagnostics and tool chatter share the
/// same stream.
pub fn parse_line(line: &str) -> Option<AgentEvent> {
    let line = line.trim();
    if line.is_empty() || !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Whether a parsed result event reports the agent hit a usage limit.
pub fn is_limit_reached(event: &ResultEvent) -> bool {
    event
        .subtype
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("limit_reached") || s.contains("limit"))
}

/// Whether a line (pre-parse) looks like an `Overloaded` envelope emitted
/// by the agent's transport layer rather than a structured event.
pub fn is_overloaded_line(line: &str) -> bool {
    line.contains("\"type\":\"error\"") && line.to_ascii_lowercase().contains("overloaded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_event_with_session_id() {
        let line = r#"{"type":"system","session_id":"sess-123","subtype":"init"}"#;
        let event = parse_line(line).unwrap();
        match event {
            AgentEvent::System(s) => assert_eq!(s.session_id.as_deref(), Some("sess-123")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_json_line_is_not_an_event() {
        assert!(parse_line("plain log chatter").is_none());
    }

    #[test]
    fn unknown_event_type_does_not_fail_parsing() {
        let line = r#"{"type":"brand_new_thing","foo":"bar"}"#;
        let event = parse_line(line).unwrap();
        assert!(matches!(event, AgentEvent::Unknown));
    }

    #[test]
    fn assistant_event_carries_usage() {
        let line = r#"{"type":"assistant","session_id":"s1","message":{"model":"claude-x","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#;
        let event = parse_line(line).unwrap();
        match event {
            AgentEvent::Assistant(m) => {
                let usage = m.message.unwrap().usage.unwrap();
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn detects_overloaded_envelope() {
        let line = r#"{"type":"error","error":{"message":"Overloaded"}}"#;
        assert!(is_overloaded_line(line));
    }

    #[test]
    fn result_event_limit_reached() {
        let line = r#"{"type":"result","session_id":"s1","subtype":"limit_reached","is_error":false}"#;
        let event = parse_line(line).unwrap();
        match event {
            AgentEvent::Result(r) => assert!(is_limit_reached(&r)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
