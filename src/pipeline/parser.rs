use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::records::Record;

static FENCED_ARRAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```[A-Za-z0-9_-]*\s*(\[[\s\S]*?\])\s*```").expect("fenced array regex")
});

/// Extracts the translated array from a model reply.
///
/// Accepted shapes, tried in order: an array inside a code fence (any language tag), the whole
/// reply as JSON, and finally the first complete array found after commentary. Content is never
/// modified.
pub fn parse_translation(raw: &str) -> Result<Vec<Record>> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PipelineError::MalformedResponse("empty reply".to_string()));
    }

    if let Some(body) = FENCED_ARRAY_RE.captures(text).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str::<Value>(body.as_str()) {
            return into_array(v);
        }
    }

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return into_array(v);
    }

    if let Some(items) = first_embedded_array(text) {
        return Ok(items);
    }

    let head: String = text.chars().take(120).collect();
    Err(PipelineError::MalformedResponse(format!(
        "no JSON array found in reply: {head:?}"
    )))
}

fn into_array(v: Value) -> Result<Vec<Record>> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(PipelineError::MalformedResponse(format!(
            "reply is not a JSON array (got {})",
            json_kind(&other)
        ))),
    }
}

/// Outermost array only: a `[` inside a candidate that failed to parse is never tried, and a
/// candidate cut off by the end of the reply ends the search.
fn first_embedded_array(text: &str) -> Option<Vec<Record>> {
    let mut from = 0;
    while let Some(pos) = text[from..].find('[') {
        let start = from + pos;
        let candidate = &text[start..];
        let mut de = serde_json::Deserializer::from_str(candidate);
        match Value::deserialize(&mut de) {
            Ok(Value::Array(items)) => return Some(items),
            Ok(_) => from = start + 1,
            Err(err) if err.is_eof() => return None,
            Err(err) => from = start + error_offset(candidate, err.line(), err.column()).max(1),
        }
    }
    None
}

/// Byte offset of a 1-based `line` / byte `column` position reported by serde_json.
fn error_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let mut offset = (line_start + column).min(text.len());
    while !text.is_char_boundary(offset) {
        offset += 1;
    }
    offset
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_reply() {
        let raw = "```json\n[{\"text\":\"你好\"}]\n```";
        assert_eq!(parse_translation(raw).expect("parse"), vec![json!({"text":"你好"})]);
    }

    #[test]
    fn bare_and_wrapped_replies_parse_identically() {
        let bare = r#"[{"id":1,"text":"你好"},{"id":2,"text":"再见","tags":["a","b"]}]"#;
        let expected = parse_translation(bare).expect("bare");
        let wrapped = [
            format!("```json\n{bare}\n```"),
            format!("```\n{bare}\n```"),
            format!("Here is the translation:\n```json\n{bare}\n```\nLet me know if you need changes."),
            format!("Sure! {bare} Hope this helps."),
            format!("[Note] output follows:\n{bare}"),
        ];
        for w in wrapped {
            assert_eq!(parse_translation(&w).expect("wrapped"), expected, "reply: {w}");
        }
    }

    #[test]
    fn nested_arrays_survive_fence_extraction() {
        let raw = "```json\n[[\"a\",\"b\"],[\"c\"]]\n```";
        assert_eq!(parse_translation(raw).expect("parse"), vec![json!(["a", "b"]), json!(["c"])]);
    }

    #[test]
    fn non_array_json_is_malformed() {
        let err = parse_translation(r#"{"text":"你好"}"#).expect_err("object");
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn truncated_reply_never_yields_a_nested_array() {
        let cut_off = r#"[{"speaker":"甲","lines":["你好","再见"]},{"speaker":"乙","lines":["嗨","拜"#;
        for raw in [
            cut_off.to_string(),
            format!("Here you go:\n{cut_off}"),
            format!("```json\n{cut_off}"),
        ] {
            let err = parse_translation(&raw).expect_err("truncated");
            assert!(matches!(err, PipelineError::MalformedResponse(_)), "reply: {raw}");
        }
    }

    #[test]
    fn broken_outer_array_skips_its_inner_arrays() {
        let raw = r#"Draft: [{"lines":["a","b"]}, oops] Final: ["x","y"]"#;
        assert_eq!(parse_translation(raw).expect("parse"), vec![json!("x"), json!("y")]);
    }

    #[test]
    fn prose_without_array_is_malformed() {
        for raw in ["", "   ", "I cannot translate this.", "```json\n[{\"text\": \n```"] {
            let err = parse_translation(raw).expect_err(raw);
            assert!(matches!(err, PipelineError::MalformedResponse(_)), "reply: {raw}");
        }
    }
}
