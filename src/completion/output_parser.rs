//! Pull structured data out of model output
//!
//! Models wrap JSON in prose or markdown fences more often than not.

use serde_json::Value;

/// Find the first JSON object or array in `text`
///
/// Tried in order: fenced code blocks (any language tag), the whole text,
/// then the first position from which a complete object or array parses.
pub fn extract_json(text: &str) -> Option<Value> {
    fenced_blocks(text)
        .into_iter()
        .find_map(parse_structured)
        .or_else(|| parse_structured(text.trim()))
        .or_else(|| scan_for_json(text))
}

/// Bodies of ``` fenced blocks, in order of appearance
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        // Skip the language tag up to the end of the line
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(body[..close].trim());
        rest = &body[close + 3..];
    }

    blocks
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Try every `{` or `[` and keep the first that starts a complete value
fn scan_for_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(i, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => Some(value),
                _ => None,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_json_fence() {
        let text = r#"
Here is the analysis:

```json
{"summary": "Adds retry", "impact": "minor"}
```

Let me know if you need more.
"#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["summary"], "Adds retry");
        assert_eq!(json["impact"], "minor");
    }

    #[test]
    fn test_extract_from_untagged_fence() {
        let text = "```\n{\"title\": \"A quiet day\"}\n```";
        assert_eq!(extract_json(text).unwrap()["title"], "A quiet day");
    }

    #[test]
    fn test_skips_fence_without_json() {
        let text = "```rust\nfn main() {}\n```\n\n```json\n{\"ok\": true}\n```";
        assert_eq!(extract_json(text).unwrap()["ok"], true);
    }

    #[test]
    fn test_extract_direct() {
        assert_eq!(extract_json(r#"  {"key": "value"}  "#).unwrap()["key"], "value");
    }

    #[test]
    fn test_extract_embedded_object() {
        let text = r#"The result is: {"category": "bugfix", "files": ["main.rs"]} and that's it."#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["category"], "bugfix");
        assert_eq!(json["files"][0], "main.rs");
    }

    #[test]
    fn test_extract_embedded_with_braces_in_strings() {
        let text = r#"Sure! {"summary": "Fix {weird} [brackets]", "n": 2} Done."#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["summary"], "Fix {weird} [brackets]");
    }

    #[test]
    fn test_skips_broken_candidates() {
        let text = r#"Set {x} first, then read ["a", "b"]"#;
        let json = extract_json(text).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1], "b");
    }

    #[test]
    fn test_scalars_are_not_structured() {
        assert!(extract_json("42").is_none());
        assert!(extract_json("\"just a string\"").is_none());
        assert!(extract_json("This is plain text with no JSON").is_none());
    }
}
