//! Signature table for injection detection.
//!
//! Every rule maps one regular expression to a threat category. Detection
//! reports each category at most once, no matter how many of its rules match,
//! so new signatures can be added to the table without touching callers.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of a detected injection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    SqlInjection,
    CommandInjection,
    Xss,
    PathTraversal,
    LdapInjection,
}

impl ThreatCategory {
    /// Report order
    pub const ALL: [ThreatCategory; 5] = [
        ThreatCategory::SqlInjection,
        ThreatCategory::CommandInjection,
        ThreatCategory::Xss,
        ThreatCategory::PathTraversal,
        ThreatCategory::LdapInjection,
    ];

    /// Validation error reported for this category
    pub fn message(&self) -> &'static str {
        match self {
            ThreatCategory::SqlInjection => "SQL injection detected",
            ThreatCategory::CommandInjection => "Command injection detected",
            ThreatCategory::Xss => "XSS detected",
            ThreatCategory::PathTraversal => "Path traversal detected",
            ThreatCategory::LdapInjection => "LDAP injection detected",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ThreatCategory::SqlInjection => "SQL injection",
            ThreatCategory::CommandInjection => "command injection",
            ThreatCategory::Xss => "XSS",
            ThreatCategory::PathTraversal => "path traversal",
            ThreatCategory::LdapInjection => "LDAP injection",
        }
    }
}

/// Built-in signatures
pub const DEFAULT_RULES: &[(ThreatCategory, &str)] = &[
    // SQL statements
    (ThreatCategory::SqlInjection, r"(?i)\bunion\b(?:\s+all)?\s+select\b"),
    (ThreatCategory::SqlInjection, r"(?i)\bselect\s+[\w\*,\s]+?\s+from\s+\w+"),
    (ThreatCategory::SqlInjection, r"(?i)\binsert\s+into\b"),
    (ThreatCategory::SqlInjection, r"(?i)\bdelete\s+from\b"),
    (ThreatCategory::SqlInjection, r"(?i)\bupdate\s+\w+\s+set\b"),
    (ThreatCategory::SqlInjection, r"(?i)\b(?:drop|create|alter)\s+(?:table|database|schema|index|view|user|procedure)\b"),
    (ThreatCategory::SqlInjection, r"(?i)\bexec(?:ute)?\s*\(|\bexec(?:ute)?\s+(?:sp|xp)_\w+"),
    // SQL comments
    (ThreatCategory::SqlInjection, r"--\s*$|'\s*--|/\*|\*/|'\s*#"),
    // Boolean tautologies
    (ThreatCategory::SqlInjection, r#"(?i)\b(?:or|and)\s+['"]?\d+['"]?\s*(?:=|<>|!=|<=|>=|<|>)\s*['"]?\d+"#),
    // Shell substitution and chaining
    (ThreatCategory::CommandInjection, r"\$\([^)]*\)"),
    (ThreatCategory::CommandInjection, r"`[^`]+`"),
    (ThreatCategory::CommandInjection, r"&&|\|\|"),
    (ThreatCategory::CommandInjection, r"(?i)[;|]\s*(?:rm|cat|ls|curl|wget|nc|ncat|netcat|telnet|ssh|scp|bash|sh|zsh|chmod|chown|whoami|id|uname|ping|python|perl|ruby|node|php|powershell|cmd|tee|kill|killall|reboot|shutdown|halt|poweroff|sudo|su|mv|cp|dd|mkfs|nohup|xargs|eval|exec|base64)\b"),
    // Chained command given by path, or any word followed by a flag or path argument
    (ThreatCategory::CommandInjection, r"[;|]\s*(?:~|\.{0,2})/[\w.-]+"),
    (ThreatCategory::CommandInjection, r"(?i)[;|]\s*[a-z][\w-]*\s+(?:-{1,2}\w|[~.]?/)"),
    // Script injection
    (ThreatCategory::Xss, r"(?i)<\s*script"),
    (ThreatCategory::Xss, r"(?i)javascript\s*:"),
    (ThreatCategory::Xss, r"(?i)<[^>]*\bon\w+\s*="),
    // Directory escape
    (ThreatCategory::PathTraversal, r"\.\./|\.\.\\"),
    (ThreatCategory::PathTraversal, r"(?i)%2e%2e(?:%2f|%5c|/|\\)"),
    // Filter injection
    (ThreatCategory::LdapInjection, r"\*\)\s*\(\s*[|&!]?\s*\(?\s*\w+\s*=\s*\*"),
];

/// Compiled rule table
pub struct ThreatDetector {
    rules: Vec<(ThreatCategory, Regex)>,
}

impl ThreatDetector {
    /// Detector over the built-in signatures
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES)
    }

    /// Detector over a custom rule table; patterns that fail to compile are skipped
    pub fn with_rules(rules: &[(ThreatCategory, &str)]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|(category, pattern)| {
                match Regex::new(pattern) {
                    Ok(regex) => Some((*category, regex)),
                    Err(e) => {
                        log::error!("Skipping invalid threat pattern {:?}: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// Categories matched by `value`, each once, in report order
    pub fn detect(&self, value: &str) -> Vec<ThreatCategory> {
        self.detect_in(value, &ThreatCategory::ALL)
    }

    /// Like `detect`, restricted to `categories`
    pub fn detect_in(&self, value: &str, categories: &[ThreatCategory]) -> Vec<ThreatCategory> {
        ThreatCategory::ALL
            .iter()
            .copied()
            .filter(|category| categories.contains(category))
            .filter(|category| {
                self.rules
                    .iter()
                    .any(|(rule_category, regex)| rule_category == category && regex.is_match(value))
            })
            .collect()
    }

    #[cfg(test)]
    fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for ThreatDetector {
    fn default() -> Self {
        Self::new()
    }
}
