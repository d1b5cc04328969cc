//! Prompt construction and response parsing.
//!
//! Both providers receive the same instructions. OpenRouter gets them as a
//! system/user pair; Gemini gets a single combined turn.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::models::{Entry, EntryDraft, HONORIFIC, INPUT_MARKER, ProviderError};

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Single-turn rendering for providers without a system role.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// Prompt asking for one new entry grounded in the PRD.
pub fn generation_prompt(prd: &str) -> Prompt {
    let system = "You are an expert in generating humanized datasets. You will be given a \
Product Requirements Document. Your task is to generate a single, unique, and creative \
dataset entry in JSON format with \"context\", \"input\", and \"output\" fields."
        .to_string();

    let user = format!(
        r#"Product Requirements Document:
"{prd}"

Instructions for generation:
1.  Create a short, one-sentence scenario or background for the 'context' field.
2.  Create a user command for the 'input' field based on the context. This command MUST start with the word "{INPUT_MARKER}".
3.  Create a response for the 'output' field. This response MUST address the user as "{HONORIFIC}".
4.  Ensure the entry is consistent with the PRD.
5.  Do not repeat examples. Be creative.

Return ONLY the raw JSON object."#
    );

    Prompt { system, user }
}

/// Prompt asking for a revised version of an existing entry.
pub fn modification_prompt(entry: &Entry, instruction: &str) -> Prompt {
    let system = format!(
        "You are an AI assistant that modifies dataset entries. You will be given a dataset \
entry with an 'id', 'context', 'input', and 'output'. You will also be given an instruction. \
Your task is to modify the 'context', 'input', and/or 'output' fields of the entry according \
to the instruction. You MUST maintain the original 'id'. The modified 'input' must still start \
with '{INPUT_MARKER}'. The modified 'output' must still address the user as '{HONORIFIC}'. You \
must return only a raw JSON object for the modified entry."
    );

    let user = format!(
        r#"Original Entry:
- ID: {}
- Context: {}
- Input: {}
- Output: {}

Modification Instruction:
"{instruction}""#,
        entry.id, entry.context, entry.input, entry.output
    );

    Prompt { system, user }
}

/// Prompt asking for a creativity temperature suited to the PRD.
pub fn temperature_prompt(prd: &str) -> Prompt {
    let system = "You are an expert in analyzing Product Requirements Documents (PRDs) and \
determining the optimal temperature value for generating high-quality, relevant datasets. \
Respond with a raw JSON object of the form {\"temperature\": number, \"reasoning\": string}."
        .to_string();

    let user = format!(
        r#"Given the following PRD, analyze its complexity, required creativity, and potential for diverse data points.
Based on this analysis, determine an appropriate temperature value between 0 and 1.

A lower temperature (e.g., 0.2) is suitable for PRDs that require precise, factual data with minimal variation.
A higher temperature (e.g., 0.8) is suitable for PRDs that benefit from creative, diverse, and exploratory data generation.

PRD: {prd}

Return the temperature value and a brief explanation of your reasoning."#
    );

    Prompt { system, user }
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("code fence pattern is a valid regex")
});

/// Strip markdown fences and surrounding prose, leaving the JSON object.
pub fn extract_json(content: &str) -> &str {
    let content = match CODE_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    };

    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    }
}

/// Parse a JSON payload out of model output.
pub fn parse_json_payload<T: DeserializeOwned>(content: &str) -> Result<T, ProviderError> {
    serde_json::from_str(extract_json(content))
        .map_err(|e| ProviderError::InvalidResponse(format!("Model returned malformed JSON: {e}")))
}

/// Parse and shape-check a freshly generated entry.
pub fn parse_entry_draft(content: &str) -> Result<EntryDraft, ProviderError> {
    let draft: EntryDraft = parse_json_payload(content)?;
    draft.validate()?;
    Ok(draft)
}

#[derive(Debug, Deserialize)]
struct ModifiedPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<u64>,
    context: String,
    input: String,
    output: String,
}

/// Models occasionally quote the id; accept both forms.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(n)) => Ok(Some(n)),
        Some(RawId::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse and shape-check a revised entry.
///
/// A missing id is filled with `requested_id`; a different id is kept as-is
/// so the caller can reject it.
pub fn parse_modified_entry(content: &str, requested_id: u64) -> Result<Entry, ProviderError> {
    let payload: ModifiedPayload = parse_json_payload(content)?;
    let entry = Entry {
        id: payload.id.unwrap_or(requested_id),
        context: payload.context,
        input: payload.input,
        output: payload.output,
    };
    entry.validate()?;
    Ok(entry)
}

/// Suggested creativity temperature with the model's explanation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemperatureSuggestion {
    pub temperature: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Parse a temperature suggestion, clamping the value into [0, 1].
pub fn parse_temperature(content: &str) -> Result<TemperatureSuggestion, ProviderError> {
    let mut suggestion: TemperatureSuggestion = parse_json_payload(content)?;
    if !suggestion.temperature.is_finite() {
        return Err(ProviderError::InvalidResponse(
            "temperature is not a finite number".to_string(),
        ));
    }
    suggestion.temperature = suggestion.temperature.clamp(0.0, 1.0);
    Ok(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry {
            id: 7,
            context: "Morning routine".into(),
            input: "ryha, start the coffee".into(),
            output: "Brewing now, boss.".into(),
        }
    }

    #[test]
    fn generation_prompt_carries_prd_and_rules() {
        let prompt = generation_prompt("A smart home assistant");
        assert!(prompt.user.contains("\"A smart home assistant\""));
        assert!(prompt.user.contains("MUST start with the word \"ryha\""));
        assert!(prompt.user.contains("address the user as \"boss\""));
        assert!(prompt.combined().starts_with("You are an expert"));
    }

    #[test]
    fn modification_prompt_lists_original_fields() {
        let prompt = modification_prompt(&entry(), "make it formal");
        assert!(prompt.user.contains("- ID: 7"));
        assert!(prompt.user.contains("- Input: ryha, start the coffee"));
        assert!(prompt.user.ends_with("\"make it formal\""));
        assert!(prompt.system.contains("MUST maintain the original 'id'"));
    }

    #[test]
    fn extracts_fenced_json() {
        let content = "Here you go:\n```json\n{\"context\": \"c\"}\n```\nEnjoy";
        assert_eq!(extract_json(content), "{\"context\": \"c\"}");
        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(extract_json("Sure! {\"a\": 1} done"), "{\"a\": 1}");
    }

    #[test]
    fn draft_must_follow_shape_rules() {
        let ok = r#"{"context": "c", "input": "ryha open the door", "output": "Done, boss."}"#;
        assert_eq!(parse_entry_draft(ok).unwrap().input, "ryha open the door");

        let bad = r#"{"context": "c", "input": "open the door", "output": "Done, boss."}"#;
        assert!(matches!(
            parse_entry_draft(bad),
            Err(ProviderError::InvalidEntry(_))
        ));

        assert!(matches!(
            parse_entry_draft("not json"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn off_shape_reply_about_quotas_is_transient() {
        let content = r#"{"context": "Billing page", "input": "ryha show my quota", "output": "You have used 80% of your quota."}"#;
        let err = crate::models::DatagenError::from(parse_entry_draft(content).unwrap_err());
        assert_eq!(
            err.failure_class(),
            crate::models::FailureClass::Transient
        );
    }

    #[test]
    fn modified_entry_id_handling() {
        let quoted = r#"{"id": "7", "context": "c", "input": "ryha hi", "output": "Hello boss"}"#;
        assert_eq!(parse_modified_entry(quoted, 7).unwrap().id, 7);

        let missing = r#"{"context": "c", "input": "ryha hi", "output": "Hello boss"}"#;
        assert_eq!(parse_modified_entry(missing, 7).unwrap().id, 7);

        let other = r#"{"id": 8, "context": "c", "input": "ryha hi", "output": "Hello boss"}"#;
        assert_eq!(parse_modified_entry(other, 7).unwrap().id, 8);
    }

    #[test]
    fn temperature_is_clamped() {
        let s = parse_temperature(r#"{"temperature": 1.4, "reasoning": "very creative"}"#).unwrap();
        assert_eq!(s.temperature, 1.0);
        assert_eq!(s.reasoning, "very creative");

        let s = parse_temperature(r#"{"temperature": 0.35}"#).unwrap();
        assert_eq!(s.temperature, 0.35);
        assert!(s.reasoning.is_empty());
    }
}
