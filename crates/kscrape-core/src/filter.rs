//! Record filter.

use crate::Result;
use regex::Regex;

/// A compiled pattern that must match a whole key or value.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    pattern: String,
    regex: Regex,
}

impl RecordFilter {
    /// Compile `pattern`, anchored at both ends.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as given by the user.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `text` matches in full.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Whether either the key or the value matches. Absent parts never match.
    pub fn matches_record(&self, key: Option<&str>, value: Option<&str>) -> bool {
        key.is_some_and(|k| self.is_match(k)) || value.is_some_and(|v| self.is_match(v))
    }
}
