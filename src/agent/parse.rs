//! Lenient JSON extraction from model output.
//!
//! Models wrap JSON in code fences or surround it with prose even in JSON
//! mode. Extraction tries, in order: the whole text, the first fenced
//! block, and the span from the first `{` to the last `}`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

#[allow(clippy::expect_used)]
static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fenced-block regex")
});

/// Extracts a JSON object from `content`.
///
/// # Errors
///
/// Returns a human-readable reason when no JSON object can be found. The
/// reason is fed back to the model on re-prompt.
pub fn extract_json_object(content: &str) -> Result<Value, String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("response was empty".to_string());
    }

    let mut candidates: Vec<&str> = vec![trimmed];
    if let Some(inner) = FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str().trim());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        candidates.push(&trimmed[start..=end]);
    }

    let mut last_error = String::new();
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => return Ok(value),
            Ok(_) => last_error = "top-level JSON value is not an object".to_string(),
            Err(e) => last_error = format!("invalid JSON: {e}"),
        }
    }
    Err(last_error)
}

/// Checks that every field in `required` is present and not null.
///
/// # Errors
///
/// Returns the list of missing fields.
pub fn require_fields(value: &Value, required: &[&str]) -> Result<(), String> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|f| value.get(f).is_none_or(Value::is_null))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing required fields: {}", missing.join(", ")))
    }
}

/// Reads `value[key]` as a string, accepting numbers and booleans.
#[must_use]
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads `value[key]` as a list of strings.
///
/// A single string becomes a one-element list; objects inside the list
/// contribute their `criterion`, `text` or `name` field.
#[must_use]
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    let item_text = |item: &Value| -> Option<String> {
        match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(_) => ["criterion", "text", "name"]
                .iter()
                .find_map(|k| str_field(item, k)),
            _ => None,
        }
    };
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(item_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Reads `value[key]` as an array, or an empty slice.
#[must_use]
pub fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let v = extract_json_object(r#"{"themes": []}"#).unwrap_or_default();
        assert_eq!(v, json!({"themes": []}));
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let content = "Here is the analysis:\n```json\n{\"a\": 1}\n```\nLet me know.";
        assert_eq!(extract_json_object(content).unwrap_or_default(), json!({"a": 1}));
    }

    #[test]
    fn test_braces_with_prose() {
        let content = "Sure! {\"a\": {\"b\": 2}} Hope that helps.";
        assert_eq!(
            extract_json_object(content).unwrap_or_default(),
            json!({"a": {"b": 2}})
        );
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(extract_json_object("[1, 2]").is_err());
        assert!(extract_json_object("   ").is_err());
        assert!(extract_json_object("no json here").is_err());
    }

    #[test]
    fn test_require_fields() {
        let v = json!({"cohorts": [], "handoff": null});
        assert!(require_fields(&v, &["cohorts"]).is_ok());
        let err = require_fields(&v, &["cohorts", "handoff", "entities"])
            .err()
            .unwrap_or_default();
        assert_eq!(err, "missing required fields: handoff, entities");
    }

    #[test]
    fn test_string_list_shapes() {
        let v = json!({
            "a": ["x", " ", {"criterion": "LDL-C ≥190mg/dL"}, 3],
            "b": "single",
            "c": 7
        });
        assert_eq!(string_list(&v, "a"), vec!["x", "LDL-C ≥190mg/dL", "3"]);
        assert_eq!(string_list(&v, "b"), vec!["single"]);
        assert!(string_list(&v, "c").is_empty());
        assert!(string_list(&v, "missing").is_empty());
    }
}
