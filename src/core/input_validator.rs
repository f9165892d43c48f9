//! Validation and sanitization of untrusted strings.
//!
//! Threat detection always runs on the string as received (minus control
//! characters), before any markup is stripped, so payloads hidden inside
//! tags are still reported.

use std::sync::Arc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::core::threat_patterns::{ThreatCategory, ThreatDetector};

pub const NULL_INPUT_ERROR: &str = "Input cannot be null or undefined";
pub const INVALID_EMAIL_ERROR: &str = "Invalid email format";
pub const INVALID_URL_ERROR: &str = "Invalid URL format";

/// Maximum length for text, email and URL inputs
pub const MAX_TEXT_LENGTH: usize = 1000;
/// Maximum length for HTML inputs
pub const MAX_HTML_LENGTH: usize = 10_000;

/// Expected shape of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Text,
    Email,
    Url,
    Html,
}

impl InputKind {
    pub fn max_length(&self) -> usize {
        match self {
            InputKind::Html => MAX_HTML_LENGTH,
            _ => MAX_TEXT_LENGTH,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::Email => "email",
            InputKind::Url => "url",
            InputKind::Html => "html",
        }
    }
}

/// Outcome of validating one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub sanitized: String,
    pub errors: Vec<String>,
    /// Threat categories found, empty for clean or merely malformed input
    #[serde(skip)]
    pub threats: Vec<ThreatCategory>,
}

impl ValidationResult {
    fn rejected(error: &str) -> Self {
        Self {
            valid: false,
            sanitized: String::new(),
            errors: vec![error.to_string()],
            threats: Vec::new(),
        }
    }
}

/// Input validator
pub struct InputValidator {
    detector: Arc<ThreatDetector>,
    email: Regex,
    script_block: Regex,
    iframe_block: Regex,
    javascript_uri: Regex,
    any_tag: Regex,
}

impl InputValidator {
    pub fn new(detector: Arc<ThreatDetector>) -> Self {
        Self {
            detector,
            email: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"),
            script_block: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid script pattern"),
            iframe_block: Regex::new(r"(?is)<iframe\b[^>]*>.*?</iframe\s*>").expect("valid iframe pattern"),
            javascript_uri: Regex::new(r"(?i)javascript\s*:").expect("valid uri pattern"),
            any_tag: Regex::new(r"<[a-zA-Z/!][^>]*>").expect("valid tag pattern"),
        }
    }

    /// Validate `input` as `kind`
    ///
    /// # Returns
    ///
    /// * `valid` is true when no error was found
    /// * `sanitized` is the input with control characters (and, for markup, tags) removed
    /// * `errors` lists one message per failed check
    pub fn validate(&self, input: Option<&str>, kind: InputKind) -> ValidationResult {
        let raw = match input {
            Some(raw) => raw,
            None => return ValidationResult::rejected(NULL_INPUT_ERROR),
        };

        let cleaned = strip_control_chars(raw);
        let threats = self.detector.detect(&cleaned);
        let mut errors: Vec<String> = threats.iter().map(|t| t.message().to_string()).collect();

        match kind {
            InputKind::Email if !self.email.is_match(&cleaned) => {
                errors.push(INVALID_EMAIL_ERROR.to_string());
            }
            InputKind::Url if Url::parse(&cleaned).is_err() => {
                errors.push(INVALID_URL_ERROR.to_string());
            }
            _ => {}
        }

        let mut sanitized = match kind {
            InputKind::Html => self.strip_html(&cleaned),
            InputKind::Text if self.any_tag.is_match(&cleaned) => self.strip_tags(&cleaned),
            _ => cleaned,
        };

        let max = kind.max_length();
        if sanitized.chars().count() > max {
            sanitized = sanitized.chars().take(max).collect();
            errors.push(format!("Input exceeds maximum length of {} characters", max));
        }

        ValidationResult {
            valid: errors.is_empty(),
            sanitized,
            errors,
            threats,
        }
    }

    fn strip_tags(&self, value: &str) -> String {
        let value = self.script_block.replace_all(value, "");
        let value = self.iframe_block.replace_all(&value, "");
        self.any_tag.replace_all(&value, "").into_owned()
    }

    fn strip_html(&self, value: &str) -> String {
        let value = self.strip_tags(value);
        self.javascript_uri.replace_all(&value, "").into_owned()
    }
}

/// Remove null bytes and control characters, keeping tab and line breaks
pub fn strip_control_chars(value: &str) -> String {
    value
        .chars()
        .filter(|&c| !c.is_control() || c == '\t' || c == '\n' || c == '\r')
        .collect()
}
