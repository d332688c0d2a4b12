//! Guideline document loading.
//!
//! Two formats are accepted: plain text, and the guideline JSON format
//! `{"title": ..., "contents": ...}` where `contents` is a string, a list of
//! strings, or an object mapping section names to (possibly nested) text.
//! Sections are flattened in file order with their names as headings.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::core::text::clean_text;
use crate::error::LoadError;

/// A guideline ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Identifier used for artifact directories (the file stem).
    pub id: String,
    /// Guideline title.
    pub title: String,
    /// Cleaned guideline text.
    pub text: String,
}

/// Loads a guideline from `path`.
///
/// Files with a `.json` extension must use the guideline JSON format;
/// anything else is read as plain text.
///
/// # Errors
///
/// Returns [`LoadError`] when the file cannot be read, the JSON does not
/// match the expected shape, or no text remains after cleaning.
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let id = path
        .file_stem()
        .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().into_owned());
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let doc = parse_document(&id, &raw, is_json).map_err(|reason| match reason {
        ParseFailure::Json(message) => LoadError::InvalidJson {
            path: path.to_path_buf(),
            message,
        },
        ParseFailure::Empty => LoadError::Empty {
            path: path.to_path_buf(),
        },
    })?;
    debug!(id = %doc.id, title = %doc.title, chars = doc.text.len(), "document loaded");
    Ok(doc)
}

/// Why [`parse_document`] rejected its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The JSON was unreadable or had the wrong shape.
    Json(String),
    /// No text remained after cleaning.
    Empty,
}

/// Builds a [`Document`] from raw file contents.
pub fn parse_document(id: &str, raw: &str, is_json: bool) -> Result<Document, ParseFailure> {
    let (title, body) = if is_json {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParseFailure::Json(e.to_string()))?;
        let Some(obj) = value.as_object() else {
            return Err(ParseFailure::Json("expected a JSON object".to_string()));
        };
        let contents = obj
            .get("contents")
            .ok_or_else(|| ParseFailure::Json("missing field 'contents'".to_string()))?;
        let mut body = String::new();
        flatten(contents, &mut body)?;
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);
        (title, body)
    } else {
        (None, raw.to_string())
    };

    let text = clean_text(&body);
    if text.is_empty() {
        return Err(ParseFailure::Empty);
    }
    Ok(Document {
        id: id.to_string(),
        title: title.unwrap_or_else(|| id.to_string()),
        text,
    })
}

fn flatten(value: &Value, out: &mut String) -> Result<(), ParseFailure> {
    match value {
        Value::String(s) => push_paragraph(out, s),
        Value::Array(items) => {
            for item in items {
                flatten(item, out)?;
            }
        }
        Value::Object(sections) => {
            for (heading, section) in sections {
                push_paragraph(out, heading);
                flatten(section, out)?;
            }
        }
        Value::Null => {}
        other => {
            return Err(ParseFailure::Json(format!(
                "unsupported content value: {other}"
            )));
        }
    }
    Ok(())
}

fn push_paragraph(out: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_plain_text() {
        let raw = "  Statins lower LDL-C.\r\n\n\n\nReassess\tafter 4 weeks. ";
        let doc = parse_document("ldl", raw, false).unwrap();
        assert_eq!(doc.id, "ldl");
        assert_eq!(doc.title, "ldl");
        assert_eq!(doc.text, "Statins lower LDL-C.\n\nReassess after 4 weeks.");
    }

    #[test]
    fn test_sections_are_flattened_in_order() {
        let raw = r#"{
            "title": "Dyslipidemia",
            "contents": {
                "Recommendations": "Patients with LDL-C ≥190mg/dL should receive high-intensity statin therapy.",
                "Monitoring": {"Lipids": ["Reassess lipids after 4-12 weeks."]}
            }
        }"#;
        let doc = parse_document("g1", raw, true).unwrap();
        assert_eq!(doc.title, "Dyslipidemia");
        let rec = doc.text.find("high-intensity").unwrap();
        let mon = doc.text.find("Monitoring").unwrap();
        assert!(doc.text.starts_with("Recommendations\n\n"));
        assert!(rec < mon);
        assert!(doc.text.ends_with("Reassess lipids after 4-12 weeks."));
    }

    #[test]
    fn test_string_contents() {
        let doc = parse_document("g", r#"{"contents": "One sentence."}"#, true).unwrap();
        assert_eq!(doc.text, "One sentence.");
        assert_eq!(doc.title, "g");
    }

    #[test]
    fn test_bad_json_shapes() {
        assert!(matches!(
            parse_document("g", "[1, 2]", true),
            Err(ParseFailure::Json(_))
        ));
        assert!(matches!(
            parse_document("g", r#"{"title": "x"}"#, true),
            Err(ParseFailure::Json(_))
        ));
        assert!(matches!(
            parse_document("g", r#"{"contents": {"a": 3}}"#, true),
            Err(ParseFailure::Json(_))
        ));
        assert_eq!(
            parse_document("g", r#"{"contents": {}}"#, true),
            Err(ParseFailure::Empty)
        );
    }

    #[test]
    fn test_load_document_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"title": "T", "contents": "Text."}}"#).unwrap();
        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.title, "T");
        assert_eq!(doc.text, "Text.");

        let empty = NamedTempFile::new().unwrap();
        assert!(matches!(
            load_document(empty.path()),
            Err(LoadError::Empty { .. })
        ));

        let missing = load_document(Path::new("/nonexistent/guideline.txt"));
        assert!(matches!(missing, Err(LoadError::Read { .. })));
    }
}
