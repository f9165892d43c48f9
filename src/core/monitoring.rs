//! Security event log and counters.
//!
//! Events are kept in a bounded FIFO buffer and mirrored to the `log`
//! facade; counters are mirrored to the `metrics` facade.

use std::collections::{HashMap, VecDeque};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of events retained
pub const EVENT_LOG_CAPACITY: usize = 1000;

/// Default number of events returned by `recent`
pub const DEFAULT_RECENT_EVENTS: usize = 100;

/// Event severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "info",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Critical => "critical",
        }
    }
}

/// Security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event ID
    pub id: Uuid,
    /// Event severity
    pub kind: EventKind,
    /// Human-readable description
    pub message: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Originating component
    pub source: String,
    /// Free-form payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

/// Running security counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub suspicious_activities: u64,
    /// Timestamp of the most recent error event
    pub last_incident: Option<DateTime<Utc>>,
}

/// Bounded event log plus counters
#[derive(Debug)]
pub struct Monitor {
    events: VecDeque<SecurityEvent>,
    capacity: usize,
    metrics: SecurityMetrics,
}

impl Monitor {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(EVENT_LOG_CAPACITY)),
            capacity,
            metrics: SecurityMetrics::default(),
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn log_event(
        &mut self,
        kind: EventKind,
        message: impl Into<String>,
        source: impl Into<String>,
        details: Option<HashMap<String, serde_json::Value>>,
        now: DateTime<Utc>,
    ) {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: now,
            source: source.into(),
            details,
        };

        match kind {
            EventKind::Info => info!("[{}] {}", event.source, event.message),
            EventKind::Warning => warn!("[{}] {}", event.source, event.message),
            EventKind::Error => error!("[{}] {}", event.source, event.message),
            EventKind::Critical => error!("CRITICAL [{}] {}", event.source, event.message),
        }
        increment_counter!("security_events_total", "kind" => kind.as_str());

        if kind == EventKind::Error {
            self.metrics.last_incident = Some(now);
        }

        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn record_request(&mut self) {
        self.metrics.total_requests += 1;
        increment_counter!("security_requests_total");
    }

    pub fn record_blocked(&mut self) {
        self.metrics.blocked_requests += 1;
        increment_counter!("security_blocked_requests_total");
    }

    pub fn record_suspicious(&mut self) {
        self.metrics.suspicious_activities += 1;
        increment_counter!("security_suspicious_activities_total");
    }

    pub fn metrics(&self) -> SecurityMetrics {
        self.metrics.clone()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.metrics = SecurityMetrics::default();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}
