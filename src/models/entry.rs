//! Dataset entry types.
//!
//! An entry's id is owned by the store: providers return an id-less
//! [`EntryDraft`] and the id is assigned at append time.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ProviderError;

/// Every generated `input` must open with this command word.
pub const INPUT_MARKER: &str = "ryha";

/// Every generated `output` must address the recipient with this word.
pub const HONORIFIC: &str = "boss";

static HONORIFIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b{HONORIFIC}\b")).expect("honorific pattern is a valid regex")
});

/// One dataset record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// 1-based position in insertion order
    pub id: u64,

    /// Short one-sentence scenario
    pub context: String,

    /// User command, starts with [`INPUT_MARKER`]
    pub input: String,

    /// Response, addresses the user with [`HONORIFIC`]
    pub output: String,
}

impl Entry {
    /// Check the shape rules on this entry's fields.
    pub fn validate(&self) -> Result<(), ProviderError> {
        validate_fields(&self.input, &self.output)
    }
}

/// Entry payload as produced by a generation call, before id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub context: String,
    pub input: String,
    pub output: String,
}

impl EntryDraft {
    /// Attach the store-assigned id.
    pub fn into_entry(self, id: u64) -> Entry {
        Entry {
            id,
            context: self.context,
            input: self.input,
            output: self.output,
        }
    }

    /// Check the shape rules: marker prefix on `input`, honorific in `output`.
    pub fn validate(&self) -> Result<(), ProviderError> {
        validate_fields(&self.input, &self.output)
    }
}

fn validate_fields(input: &str, output: &str) -> Result<(), ProviderError> {
    let opening = input.trim_start();
    let has_marker = opening
        .get(..INPUT_MARKER.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(INPUT_MARKER));
    if !has_marker {
        return Err(ProviderError::InvalidEntry(format!(
            "input must start with '{INPUT_MARKER}': {input:?}"
        )));
    }
    if !HONORIFIC_PATTERN.is_match(output) {
        return Err(ProviderError::InvalidEntry(format!(
            "output must address the user as '{HONORIFIC}': {output:?}"
        )));
    }
    Ok(())
}
