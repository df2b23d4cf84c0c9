use std::ops::Range;

use serde_json::Value;

use crate::errors::{OpgError, Result};

pub mod fs;

pub use fs::execute;

const TOOL_FENCE_OPEN: &str = "```tool";
const TOOL_FENCE_CLOSE: &str = "```";

/// A tool request parsed out of assistant output. Created and consumed
/// within a single turn, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub operation: String,
    pub arguments: Value,
    /// Byte range of the fenced block within the source text.
    pub span: Range<usize>,
}

/// Scans assistant text for the first fenced tool block, a code fence with
/// the `tool` info string holding
/// `{"tool": "read_file", "arguments": {"path": "notes.txt"}}`.
///
/// Pure; returns `None` for text containing no well-formed invocation.
pub fn extract(text: &str) -> Option<ToolInvocation> {
    let mut search_from = 0;
    while let Some(rel_open) = text[search_from..].find(TOOL_FENCE_OPEN) {
        let open = search_from + rel_open;
        let body_start = open + TOOL_FENCE_OPEN.len();
        let Some(rel_close) = text[body_start..].find(TOOL_FENCE_CLOSE) else {
            return None;
        };
        let body_end = body_start + rel_close;
        let span_end = body_end + TOOL_FENCE_CLOSE.len();

        if let Some(invocation) = parse_body(text[body_start..body_end].trim(), open..span_end) {
            return Some(invocation);
        }
        // Malformed block; keep scanning past it.
        search_from = span_end;
    }
    None
}

fn parse_body(body: &str, span: Range<usize>) -> Option<ToolInvocation> {
    let value: Value = serde_json::from_str(body).ok()?;
    let operation = value.get("tool")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ToolInvocation {
        operation,
        arguments,
        span,
    })
}

/// System-prompt fragment advertising the tool protocol, appended when
/// filesystem access is enabled.
pub fn instructions() -> String {
    let mut s = String::new();
    s.push_str("\n\n## Filesystem Tools\n\n");
    s.push_str("You can operate on files inside the workspace. To use a tool, reply with a fenced block:\n\n");
    s.push_str("```tool\n{\"tool\": \"read_file\", \"arguments\": {\"path\": \"notes.txt\"}}\n```\n\n");
    s.push_str("Available operations:\n");
    s.push_str("- read_file: {\"path\": \"relative/path\"}\n");
    s.push_str("- list_directory: {\"path\": \"relative/path\"}\n");
    s.push_str("- write_file: {\"path\": \"relative/path\", \"content\": \"...\"}\n\n");
    s.push_str("Paths are relative to the workspace root; anything outside it is refused. ");
    s.push_str("Results come back as [tool result] messages. ");
    s.push_str("Reply with plain text once you have what you need.\n");
    s
}

pub(crate) fn arg_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| OpgError::Tool(format!("missing '{key}' argument")))
}

pub(crate) fn arg_str_opt(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_yields_none() {
        assert_eq!(extract("Just a normal reply."), None);
        assert_eq!(extract("Some ``` code ``` but no tool."), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn well_formed_block_is_parsed_with_span() {
        let text = "Let me check.\n```tool\n{\"tool\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n```\nDone.";
        let invocation = extract(text).unwrap();
        assert_eq!(invocation.operation, "read_file");
        assert_eq!(invocation.arguments["path"], "a.txt");
        assert_eq!(&text[invocation.span.clone()],
            "```tool\n{\"tool\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n```");
    }

    #[test]
    fn malformed_json_is_skipped() {
        let text = "```tool\nnot json\n```";
        assert_eq!(extract(text), None);
    }

    #[test]
    fn first_valid_block_wins() {
        let text = "```tool\nbroken\n```\n```tool\n{\"tool\": \"list_directory\"}\n```";
        let invocation = extract(text).unwrap();
        assert_eq!(invocation.operation, "list_directory");
        assert!(invocation.arguments.is_object());
    }

    #[test]
    fn unterminated_fence_yields_none() {
        assert_eq!(extract("```tool\n{\"tool\": \"read_file\"}"), None);
    }
}
