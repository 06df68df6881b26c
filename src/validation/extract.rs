use super::ParseError;
use regex::Regex;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?[ \t]*\r?\n?([\s\S]*?)\r?\n?```").expect("valid fence regex")
    })
}

/// Locates the JSON document inside free-form model output
///
/// Tries, in order: the first fenced block (```json or bare ```), the whole
/// text, and finally the outermost `{...}` span.
pub fn extract_structured_block(response: &str) -> Result<String, ParseError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(block) = fenced_block(trimmed) {
        return Ok(block.to_string());
    }

    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(trimmed[start..=end].to_string());
        }
    }

    Err(ParseError::InvalidJson(format!(
        "no JSON document found in response: {}",
        preview(trimmed)
    )))
}

fn fenced_block(text: &str) -> Option<&str> {
    fence_regex()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
        .find(|block| !block.is_empty())
}

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
