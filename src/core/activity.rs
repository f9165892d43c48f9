//! Suspicious-activity heuristics.
//!
//! Combines payload signatures, short-term request frequency and the
//! cumulative count of failed input validations into a risk level.

use std::collections::VecDeque;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::core::threat_patterns::{ThreatCategory, ThreatDetector};

/// Span of the request-frequency buffer in milliseconds
pub const FREQUENCY_WINDOW_MS: i64 = 1000;
/// Requests within the frequency window above which activity is suspicious
pub const HIGH_FREQUENCY_THRESHOLD: usize = 20;
/// Failed validations at which activity is suspicious
pub const VIOLATION_THRESHOLD: u64 = 5;

pub const HIGH_FREQUENCY_REASON: &str = "High request frequency";
pub const VIOLATIONS_REASON: &str = "Multiple security violations";

/// Categories scanned in activity payloads
const PAYLOAD_CATEGORIES: [ThreatCategory; 4] = [
    ThreatCategory::SqlInjection,
    ThreatCategory::Xss,
    ThreatCategory::PathTraversal,
    ThreatCategory::CommandInjection,
];

/// Risk level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Outcome of an activity assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResult {
    pub suspicious: bool,
    pub risk: RiskLevel,
    pub reasons: Vec<String>,
}

/// Frequency buffer and failure counter feeding the heuristics
pub struct ActivityMonitor {
    detector: Arc<ThreatDetector>,
    recent_requests: VecDeque<DateTime<Utc>>,
    failed_validations: u64,
}

impl ActivityMonitor {
    pub fn new(detector: Arc<ThreatDetector>) -> Self {
        Self {
            detector,
            recent_requests: VecDeque::new(),
            failed_validations: 0,
        }
    }

    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.recent_requests.push_back(now);
        self.prune(now);
    }

    pub fn record_failed_validation(&mut self) {
        self.failed_validations += 1;
    }

    /// Requests seen within the frequency window ending at `now`
    pub fn recent_request_count(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.recent_requests.len()
    }

    /// Assess the current activity, scanning `payload` when given
    pub fn assess(&mut self, payload: Option<&serde_json::Value>, now: DateTime<Utc>) -> ActivityResult {
        let mut reasons = Vec::new();
        let mut risk = RiskLevel::Low;

        if let Some(payload) = payload {
            let serialized = payload.to_string();
            for category in self.detector.detect_in(&serialized, &PAYLOAD_CATEGORIES) {
                reasons.push(format!("Potential {} in payload", category.label()));
                risk = risk.max(RiskLevel::High);
            }
        }

        if self.recent_request_count(now) > HIGH_FREQUENCY_THRESHOLD {
            reasons.push(HIGH_FREQUENCY_REASON.to_string());
            risk = if risk == RiskLevel::High {
                RiskLevel::Critical
            } else {
                risk.max(RiskLevel::Medium)
            };
        }

        if self.failed_validations >= VIOLATION_THRESHOLD {
            reasons.push(VIOLATIONS_REASON.to_string());
            risk = risk.max(RiskLevel::High);
        }

        ActivityResult {
            suspicious: !reasons.is_empty(),
            risk,
            reasons,
        }
    }

    pub fn clear(&mut self) {
        self.recent_requests.clear();
        self.failed_validations = 0;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::milliseconds(FREQUENCY_WINDOW_MS);
        while matches!(self.recent_requests.front(), Some(ts) if *ts <= cutoff) {
            self.recent_requests.pop_front();
        }
    }
}
