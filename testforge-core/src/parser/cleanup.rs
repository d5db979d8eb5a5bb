//! Recovering a JSON object from raw model text.
//!
//! Models wrap JSON in markdown fences, add prose around it, leave trailing
//! commas, or emit typographic quotes. Repairs are applied in increasing
//! order of invasiveness, and the text is re-parsed after each one so a valid
//! document is never altered.

use crate::error::ExtractionError;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[\]}])").unwrap());
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap());

/// Body of the first fenced block, or the whole text when unfenced
pub fn strip_code_fences(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) if body.as_str().contains('{') => body.as_str(),
        _ => raw,
    }
}

/// Slice from the first `{` to the last `}`
pub fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn drop_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

fn drop_control_chars(text: &str) -> String {
    CONTROL_CHARS.replace_all(text, "").into_owned()
}

fn ascii_quotes(text: &str) -> String {
    text.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Parse the model's reply into a JSON value, repairing common damage
pub fn parse_lenient(raw: &str) -> Result<Value, ExtractionError> {
    let candidate = outermost_object(strip_code_fences(raw))
        .ok_or_else(|| ExtractionError::malformed("no JSON object found in model output"))?;

    let first_error = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    debug!(error = %first_error, "model JSON invalid as-is, applying repairs");

    let repaired = drop_control_chars(&drop_trailing_commas(candidate));
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        return Ok(value);
    }

    serde_json::from_str::<Value>(&ascii_quotes(&repaired)).map_err(|_| {
        ExtractionError::malformed(format!(
            "model output is not valid JSON (line {}, column {}): {first_error}",
            first_error.line(),
            first_error.column()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_with_prose() {
        let raw = "Here are the cases:\n```json\n{\"modules\": [1, 2]}\n```\nLet me know!";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"modules": [1, 2]}));
    }

    #[test]
    fn trailing_commas_and_control_chars() {
        let raw = "{\"a\": [1, 2,], \"b\": \"x\u{0007}y\",}";
        assert_eq!(parse_lenient(raw).unwrap(), json!({"a": [1, 2], "b": "xy"}));
    }

    #[test]
    fn typographic_quotes_only_as_last_resort() {
        // curly quotes inside a valid string survive untouched
        let valid = "{\"t\": \"click \u{201C}Save\u{201D}\"}";
        assert_eq!(parse_lenient(valid).unwrap()["t"], "click \u{201C}Save\u{201D}");

        let broken = "{\u{201C}t\u{201D}: \u{201C}v\u{201D}}";
        assert_eq!(parse_lenient(broken).unwrap(), json!({"t": "v"}));
    }

    #[test]
    fn no_object_is_malformed() {
        assert!(parse_lenient("I cannot help with that.").is_err());
        assert!(parse_lenient("} {").is_err());
        assert!(parse_lenient("{ not json at all }").is_err());
    }
}
