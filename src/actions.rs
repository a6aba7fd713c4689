//! Tool-action extraction from free-text model output.
//!
//! Agents request side effects by appending a fenced ```actions block to
//! their output, a JSON array of file operations. Extraction never fails:
//! malformed content is dropped with a logged parse failure and callers see
//! an empty list, meaning "no changes requested".
//!
//! When no actions block is present, a fallback scan looks for code fences
//! preceded by a filename-comment line and turns each into a file creation.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A structured directive embedded in an agent's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    CreateFile { path: String, content: String },
    UpdateFile { path: String, content: String },
    DeleteFile { path: String },
    Build,
    Preview { framework: String },
}

impl ActionRequest {
    /// Short human-readable description for logs and tool_call messages.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateFile { path, .. } => format!("create {}", path),
            Self::UpdateFile { path, .. } => format!("update {}", path),
            Self::DeleteFile { path } => format!("delete {}", path),
            Self::Build => "build".to_string(),
            Self::Preview { framework } => format!("preview ({})", framework),
        }
    }
}

/// Extract tool actions from model output.
///
/// Strategy order:
/// 1. A single trailing ```actions fenced block (preferred).
/// 2. Fallback scan for filename-comment + code-fence pairs.
///
/// No match yields an empty vec, which callers treat as "no changes
/// requested", not an error.
pub fn extract(text: &str) -> Vec<ActionRequest> {
    if let Some(block) = trailing_action_block(text) {
        match parse_action_block(block) {
            Ok(actions) => return actions,
            Err(e) => {
                tracing::warn!("Dropping malformed action block: {}", e);
                return Vec::new();
            }
        }
    }

    scan_file_fences(text)
}

/// Locate the trailing ```actions fenced block, if any.
///
/// Only a block that closes after all other content counts; an actions
/// fence in the middle of the text is an agent quoting the format, not
/// requesting work.
fn trailing_action_block(text: &str) -> Option<&str> {
    let open = text.rfind("```actions")?;
    let after_open = &text[open + "```actions".len()..];
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    // Anything but whitespace after the closing fence disqualifies the block.
    if !body[close + 3..].trim().is_empty() {
        return None;
    }
    Some(&body[..close])
}

/// Parse the JSON payload of an actions block.
///
/// The payload is a JSON array of objects tagged by `action`. Unknown or
/// malformed entries are dropped individually with a logged warning; a
/// payload that is not valid JSON at all is a parse error.
pub fn parse_action_block(payload: &str) -> Result<Vec<ActionRequest>, String> {
    let value: serde_json::Value = serde_json::from_str(payload.trim())
        .map_err(|e| format!("invalid JSON in actions block: {}", e))?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        other => {
            return Err(format!(
                "actions block must be a JSON array, got {}",
                json_type_name(&other)
            ))
        }
    };

    let mut actions = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<ActionRequest>(entry.clone()) {
            Ok(action) => actions.push(action),
            Err(e) => {
                tracing::warn!(entry = %entry, "Dropping unrecognized action entry: {}", e);
            }
        }
    }
    Ok(actions)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Fallback: code fences preceded by a filename-comment line.
///
/// Recognizes `// path`, `# path`, and `<!-- path -->` comment forms on the
/// line immediately before the fence. Each hit yields a file creation.
fn scan_file_fences(text: &str) -> Vec<ActionRequest> {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^(?://|#|<!--)\s*([\w./\-]+\.\w+)\s*(?:-->)?\s*\r?\n```[\w+-]*\r?\n",
        )
        .expect("fence regex is valid")
    });

    let mut actions = Vec::new();
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always present");
        let path = caps[1].to_string();
        let body_start = whole.end();
        let Some(close) = text[body_start..].find("\n```") else {
            continue;
        };
        let content = text[body_start..body_start + close].to_string();
        actions.push(ActionRequest::CreateFile { path, content });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_block_yields_matching_actions() {
        let text = r#"Here is the plan.

```actions
[
  {"action": "create_file", "path": "src/app.js", "content": "console.log(1)"},
  {"action": "update_file", "path": "index.html", "content": "<html></html>"},
  {"action": "delete_file", "path": "old.js"},
  {"action": "build"}
]
```"#;
        let actions = extract(text);
        assert_eq!(actions.len(), 4);
        assert_eq!(
            actions[0],
            ActionRequest::CreateFile {
                path: "src/app.js".into(),
                content: "console.log(1)".into()
            }
        );
        assert_eq!(actions[3], ActionRequest::Build);
    }

    #[test]
    fn test_n_file_block_yields_n_creates() {
        let files: Vec<(String, String)> = (0..5)
            .map(|i| (format!("src/file{}.js", i), format!("content {}", i)))
            .collect();
        let entries: Vec<String> = files
            .iter()
            .map(|(path, content)| {
                format!(
                    "{{\"action\": \"create_file\", \"path\": \"{}\", \"content\": \"{}\"}}",
                    path, content
                )
            })
            .collect();
        let text = format!("All files below.\n\n```actions\n[{}]\n```", entries.join(",\n"));

        let actions = extract(&text);
        assert_eq!(actions.len(), files.len());
        for (action, (path, content)) in actions.iter().zip(&files) {
            assert_eq!(
                action,
                &ActionRequest::CreateFile {
                    path: path.clone(),
                    content: content.clone()
                }
            );
        }
    }

    #[test]
    fn test_malformed_json_yields_zero_actions_without_raising() {
        let text = "Some output\n```actions\n[{\"action\": \"create_file\", oops]\n```";
        assert!(extract(text).is_empty());
        assert!(parse_action_block("[{oops").is_err());
    }

    #[test]
    fn test_unknown_entries_dropped_individually() {
        let payload = r#"[
            {"action": "create_file", "path": "a.txt", "content": "x"},
            {"action": "launch_missiles"},
            {"action": "preview", "framework": "react"}
        ]"#;
        let actions = parse_action_block(payload).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[1],
            ActionRequest::Preview {
                framework: "react".into()
            }
        );
    }

    #[test]
    fn test_mid_text_actions_fence_is_not_a_request() {
        let text = "```actions\n[]\n```\ntrailing prose disqualifies the block";
        assert!(extract(text).is_empty());
    }

    #[test]
    fn test_fallback_fence_scan() {
        let text = "Files below.\n\n// src/index.js\n```js\nconst a = 1;\n```\n\n# styles/main.css\n```css\nbody {}\n```\n";
        let actions = extract(text);
        assert_eq!(
            actions,
            vec![
                ActionRequest::CreateFile {
                    path: "src/index.js".into(),
                    content: "const a = 1;".into()
                },
                ActionRequest::CreateFile {
                    path: "styles/main.css".into(),
                    content: "body {}".into()
                },
            ]
        );
    }

    #[test]
    fn test_html_comment_filename() {
        let text = "<!-- public/index.html -->\n```html\n<p>hi</p>\n```\n";
        let actions = extract(text);
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0],
            ActionRequest::CreateFile {
                path: "public/index.html".into(),
                content: "<p>hi</p>".into()
            }
        );
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        assert!(extract("plain prose with no fences").is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn test_action_block_preferred_over_fences() {
        let text = "// a.js\n```js\nx\n```\n\n```actions\n[{\"action\": \"delete_file\", \"path\": \"b.js\"}]\n```";
        let actions = extract(text);
        assert_eq!(actions, vec![ActionRequest::DeleteFile { path: "b.js".into() }]);
    }
}
