//! Prompt construction and response parsing for generative title extraction.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::ExtractionResult;

static RESPONSE_SCHEMA_JSON: Lazy<Option<Value>> = Lazy::new(|| {
    match serde_json::from_str(include_str!("../../../../schemas/title_extraction.v1.json")) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Title extraction schema is not valid JSON: {}", e);
            None
        }
    }
});

static RESPONSE_SCHEMA: Lazy<Option<JSONSchema>> = Lazy::new(|| {
    let schema = RESPONSE_SCHEMA_JSON.as_ref()?;
    match JSONSchema::options().compile(schema) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            warn!("Failed to compile title extraction schema: {}", e);
            None
        }
    }
});

/// The fields a provider is asked to return
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedTitle {
    pub title: String,
    #[serde(default)]
    pub canonical: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    pub confidence: GeneratedConfidence,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GeneratedConfidence {
    Score(f64),
    Label(String),
}

impl GeneratedConfidence {
    pub fn score(&self) -> f64 {
        match self {
            GeneratedConfidence::Score(s) => s.clamp(0.0, 1.0),
            GeneratedConfidence::Label(label) => match label.to_ascii_lowercase().as_str() {
                "high" => 0.9,
                "medium" => 0.7,
                _ => 0.4,
            },
        }
    }
}

pub fn build_prompt(raw_title: &str, description: Option<&str>, pattern: &ExtractionResult) -> String {
    let mut prompt = String::from(
        "You clean up cinema listing titles. Given a raw listing, return the title of the film \
         being screened, without event names, series names, formats, ratings, Q&A notes or years.\n\
         Respond with a single JSON object and nothing else:\n\
         {\"title\": string, \"canonical\": string, \"version\": string|null, \"event\": string|null, \
         \"confidence\": number between 0 and 1}\n\
         - \"title\" keeps cut/edition names such as \"Final Cut\"; \"canonical\" removes them.\n\
         - \"version\" is the cut/edition name if present.\n\
         - \"event\" is the series, festival or event wrapper if present.\n\n",
    );
    prompt.push_str(&format!("Raw listing: {}\n", raw_title.trim()));
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        let snippet: String = description.chars().take(400).collect();
        prompt.push_str(&format!("Listing description: {}\n", snippet));
    }
    prompt.push_str(&format!("Rule-based guess: {}\n", pattern.extracted_title));
    prompt
}

/// Parse a provider response into a [`GeneratedTitle`], tolerating code fences
/// and prose around the JSON object. Returns `None` for anything that does not
/// satisfy the response schema.
pub fn parse_response(text: &str) -> Option<GeneratedTitle> {
    let body = extract_json_object(text)?;
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!("Inference response is not JSON: {}", e);
            return None;
        }
    };
    if let Some(schema) = RESPONSE_SCHEMA.as_ref() {
        if !schema.is_valid(&value) {
            debug!("Inference response failed schema validation: {}", body);
            return None;
        }
    }
    let parsed: GeneratedTitle = serde_json::from_value(value).ok()?;
    if parsed.title.trim().is_empty() {
        return None;
    }
    Some(parsed)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::title;

    #[test]
    fn schema_is_available() {
        assert!(RESPONSE_SCHEMA.is_some());
    }

    #[test]
    fn parses_fenced_json() {
        let text = "```json\n{\"title\": \"Possession\", \"canonical\": \"Possession\", \"version\": null, \"event\": \"Cigarette Burns\", \"confidence\": 0.92}\n```";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.title, "Possession");
        assert_eq!(parsed.event.as_deref(), Some("Cigarette Burns"));
        assert_eq!(parsed.confidence.score(), 0.92);
    }

    #[test]
    fn accepts_labelled_confidence() {
        let parsed = parse_response(r#"{"title": "Stalker", "confidence": "medium"}"#).unwrap();
        assert_eq!(parsed.confidence.score(), 0.7);
    }

    #[test]
    fn rejects_invalid_responses() {
        assert!(parse_response("I'm sorry, I can't help with that").is_none());
        assert!(parse_response(r#"{"title": "", "confidence": 0.5}"#).is_none());
        assert!(parse_response(r#"{"title": "Alien", "confidence": 7}"#).is_none());
        assert!(parse_response(r#"{"canonical": "Alien", "confidence": 0.5}"#).is_none());
        assert!(parse_response(r#"{"title": "Alien", "confidence": "certain"}"#).is_none());
    }

    #[test]
    fn prompt_mentions_listing_and_guess() {
        let pattern = title::extract("Late Shows: Possession (1981)");
        let prompt = build_prompt("Late Shows: Possession (1981)", Some("Andrzej Zulawski"), &pattern);
        assert!(prompt.contains("Raw listing: Late Shows: Possession (1981)"));
        assert!(prompt.contains("Listing description: Andrzej Zulawski"));
        assert!(prompt.contains("Rule-based guess:"));
    }
}
