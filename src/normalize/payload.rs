//! Acceptance check for a normalization reply.
//!
//! The reply is untrusted text. Models wrap JSON in ```` ```json ```` fences,
//! prefix it with "Here is the JSON:", or stop mid-object when they hit the
//! output limit. [`accept_payload`] extracts the JSON object, parses it, and
//! requires a `documentos` array before anything is written to disk.

use super::schema::value_as_u64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").unwrap());

/// A reply that passed the acceptance check.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedPayload {
    pub json: Value,
    /// Length of the `documentos` array.
    pub documents: usize,
    /// Σ `control_calidad.total_items_extraidos`.
    pub items: u64,
    /// Set when `documents` differs from the batch's record count.
    pub warning: Option<String>,
}

/// The JSON object inside `reply`, without fences or surrounding prose.
pub fn extract_json_text(reply: &str) -> Option<&str> {
    let text = match RE_JSON_FENCE.captures(reply) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => reply,
    };
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Validate `reply` against the batch it answers.
///
/// `expected_documents` is the number of records in the batch file. A
/// different `documentos` length is accepted with a warning; the model
/// sometimes merges an index page into its neighbour, and dropping the whole
/// batch for that would lose every other document in it.
pub fn accept_payload(reply: &str, expected_documents: usize) -> Result<AcceptedPayload, String> {
    let text = extract_json_text(reply).ok_or_else(|| {
        let preview: String = reply.chars().take(120).collect();
        format!("no JSON object in response: {preview:?}")
    })?;
    let json: Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;

    let docs = json
        .as_object()
        .ok_or("response is not a JSON object")?
        .get("documentos")
        .ok_or("JSON has no 'documentos' field")?
        .as_array()
        .ok_or("'documentos' is not an array")?;

    let documents = docs.len();
    let items = docs
        .iter()
        .filter_map(|d| d.get("control_calidad")?.get("total_items_extraidos"))
        .map(value_as_u64)
        .sum();
    let warning = (documents != expected_documents).then(|| {
        format!("documentos: {documents} recibidos, {expected_documents} esperados")
    });

    Ok(AcceptedPayload {
        json,
        documents,
        items,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"batch_metadata": {}, "documentos": [
        {"archivo": "a.md", "control_calidad": {"total_items_extraidos": 4}},
        {"archivo": "b.md", "control_calidad": {"total_items_extraidos": "3"}}
    ], "resumen_batch": {}}"#;

    #[test]
    fn fenced_reply_with_prose() {
        let reply = format!("Here is the normalized JSON:\n```json\n{BODY}\n```\nLet me know!");
        let p = accept_payload(&reply, 2).unwrap();
        assert_eq!(p.documents, 2);
        assert_eq!(p.items, 7);
        assert!(p.warning.is_none());
    }

    #[test]
    fn bare_reply() {
        assert_eq!(accept_payload(BODY, 2).unwrap().documents, 2);
    }

    #[test]
    fn count_mismatch_is_a_warning() {
        let p = accept_payload(BODY, 3).unwrap();
        assert_eq!(p.warning.as_deref(), Some("documentos: 2 recibidos, 3 esperados"));
    }

    #[test]
    fn rejections() {
        assert!(accept_payload("I cannot help with that.", 1)
            .unwrap_err()
            .contains("no JSON object"));
        assert!(accept_payload(r#"{"items": []}"#, 1)
            .unwrap_err()
            .contains("documentos"));
        assert!(accept_payload(r#"{"documentos": {}}"#, 1)
            .unwrap_err()
            .contains("not an array"));
        // Truncated at the output limit.
        assert!(accept_payload(r#"{"documentos": [{"archivo": "a.md"}, {"arch"#, 1)
            .unwrap_err()
            .contains("invalid JSON"));
    }
}
