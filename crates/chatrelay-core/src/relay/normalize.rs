//! Reply unwrapping for the workflow engine's chat responses.
//!
//! The engine serializes its structured output twice, so the useful text is
//! usually a JSON string nested inside one of several envelope fields. The
//! field order below is part of the upstream contract and must not change.

use serde_json::Value;

/// Shown when no layer of the reply yields usable text.
pub const FALLBACK_REPLY: &str = "Thanks for your message! Our team will follow up shortly.";

/// Envelope fields checked for a JSON-encoded payload, in priority order.
const ENVELOPE_FIELDS: &[&str] = &["output", "data", "message", "responseContent", "result"];

/// Fields read from the decoded inner payload, in priority order.
const INNER_FIELDS: &[&str] = &["output", "response", "message", "answer"];

/// Plain-text envelope fields accepted when nothing decodes.
const PLAIN_FIELDS: &[&str] = &["output", "data", "message"];

/// Extract the human-readable reply from an upstream response body.
pub fn extract_reply(body: &Value) -> String {
    try_extract_reply(body).unwrap_or_else(|| FALLBACK_REPLY.to_string())
}

/// Like [`extract_reply`], but reports "nothing found" instead of falling back.
pub fn try_extract_reply(body: &Value) -> Option<String> {
    let body = match body {
        // The engine answers with an item list; the first item carries the reply.
        Value::Array(items) => items.first()?,
        Value::String(s) => return non_empty(s).map(str::to_string),
        other => other,
    };

    if let Some(encoded) = first_json_looking(body) {
        if let Ok(inner) = serde_json::from_str::<Value>(encoded.trim()) {
            if let Some(text) = first_string(&inner, INNER_FIELDS) {
                return Some(text.to_string());
            }
        }
    }

    PLAIN_FIELDS
        .iter()
        .filter_map(|field| body.get(*field).and_then(Value::as_str))
        .find(|s| !looks_like_json_object(s) && non_empty(s).is_some())
        .or_else(|| first_string(body, &["response"]))
        .or_else(|| first_string(body, &["answer"]))
        .map(str::to_string)
}

fn first_json_looking(body: &Value) -> Option<&str> {
    ENVELOPE_FIELDS
        .iter()
        .filter_map(|field| body.get(*field).and_then(Value::as_str))
        .find(|s| looks_like_json_object(s))
}

fn first_string<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| value.get(*field).and_then(Value::as_str))
        .find_map(non_empty)
}

fn looks_like_json_object(s: &str) -> bool {
    s.trim_start().starts_with('{')
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_double_encoded_output() {
        let body = json!({ "output": "{\"output\":\"Hi\"}" });
        assert_eq!(extract_reply(&body), "Hi");
    }

    #[test]
    fn test_plain_message() {
        let body = json!({ "message": "Hello" });
        assert_eq!(extract_reply(&body), "Hello");
    }

    #[test]
    fn test_nothing_extractable_falls_back() {
        assert_eq!(extract_reply(&json!({})), FALLBACK_REPLY);
        assert_eq!(extract_reply(&json!({ "status": 200 })), FALLBACK_REPLY);
        assert_eq!(extract_reply(&json!({ "output": "   " })), FALLBACK_REPLY);
        assert_eq!(extract_reply(&json!([])), FALLBACK_REPLY);
    }

    #[test]
    fn test_envelope_priority() {
        // `data` outranks `message` when both carry encoded payloads
        let body = json!({
            "message": "{\"output\":\"from message\"}",
            "data": "{\"output\":\"from data\"}"
        });
        assert_eq!(extract_reply(&body), "from data");

        // responseContent and result are checked after the first three
        let body = json!({ "result": "{\"answer\":\"from result\"}" });
        assert_eq!(extract_reply(&body), "from result");
    }

    #[test]
    fn test_inner_priority() {
        let body = json!({
            "output": "{\"answer\":\"a\",\"message\":\"m\",\"response\":\"r\"}"
        });
        assert_eq!(extract_reply(&body), "r");

        let body = json!({ "output": "{\"answer\":\"only answer\"}" });
        assert_eq!(extract_reply(&body), "only answer");
    }

    #[test]
    fn test_encoded_payload_without_known_fields_uses_plain_chain() {
        let body = json!({
            "output": "{\"unrelated\":true}",
            "message": "Plain text wins"
        });
        assert_eq!(extract_reply(&body), "Plain text wins");
    }

    #[test]
    fn test_malformed_encoded_payload_uses_plain_chain() {
        let body = json!({ "output": "{not json", "response": "Direct response" });
        assert_eq!(extract_reply(&body), "Direct response");
    }

    #[test]
    fn test_plain_fields_skip_json_looking_strings() {
        let body = json!({ "output": "{broken", "data": "usable" });
        assert_eq!(extract_reply(&body), "usable");
    }

    #[test]
    fn test_response_then_answer() {
        assert_eq!(extract_reply(&json!({ "response": "R", "answer": "A" })), "R");
        assert_eq!(extract_reply(&json!({ "answer": "A" })), "A");
    }

    #[test]
    fn test_item_list_uses_first_item() {
        let body = json!([{ "output": "{\"output\":\"first\"}" }, { "output": "second" }]);
        assert_eq!(extract_reply(&body), "first");
    }

    #[test]
    fn test_non_string_fields_ignored() {
        let body = json!({ "output": { "output": "nested object" }, "message": "text" });
        assert_eq!(extract_reply(&body), "text");
    }

    #[test]
    fn test_raw_text_body() {
        assert_eq!(extract_reply(&json!("Just text")), "Just text");
        assert_eq!(extract_reply(&json!("")), FALLBACK_REPLY);
    }
}
