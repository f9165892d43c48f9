//! The shared security middleware instance.
//!
//! One `SecurityMiddleware` is built at startup and handed to every request
//! handler behind an `Arc`. All mutable state sits behind a single mutex so
//! that a rate-limit check is one atomic read-modify-write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use log::{debug, info};
use metrics::increment_counter;
use serde_json::{json, Value};
use tokio::time;
use crate::config::SettingsSource;
use crate::core::activity::{ActivityMonitor, ActivityResult};
use crate::core::file_validator::{validate_file, FileDescriptor, FileValidationResult};
use crate::core::input_validator::{InputKind, InputValidator, ValidationResult};
use crate::core::monitoring::{EventKind, Monitor, SecurityEvent, SecurityMetrics};
use crate::core::rate_limiter::{BlockedEntry, RateLimitDecision, RateLimitKey, RateLimitResult, RateLimiter};
use crate::core::threat_patterns::ThreatDetector;
use crate::utils::{format_rate_limit_key, Clock, SystemClock};

struct SecurityState {
    limiter: RateLimiter,
    monitor: Monitor,
    activity: ActivityMonitor,
}

/// Security middleware
pub struct SecurityMiddleware {
    settings: Box<dyn SettingsSource>,
    clock: Arc<dyn Clock>,
    input_validator: InputValidator,
    state: Mutex<SecurityState>,
}

impl SecurityMiddleware {
    /// Create a middleware on the system clock
    pub fn new(settings: impl SettingsSource + 'static) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: impl SettingsSource + 'static, clock: Arc<dyn Clock>) -> Self {
        let detector = Arc::new(ThreatDetector::new());
        Self {
            settings: Box::new(settings),
            clock,
            input_validator: InputValidator::new(detector.clone()),
            state: Mutex::new(SecurityState {
                limiter: RateLimiter::new(),
                monitor: Monitor::new(),
                activity: ActivityMonitor::new(detector),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SecurityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and sanitize an untrusted string
    pub fn validate_input(&self, input: Option<&str>, kind: InputKind) -> ValidationResult {
        let result = self.input_validator.validate(input, kind);
        if result.valid {
            return result;
        }

        increment_counter!("security_failed_validations_total");
        let now = self.clock.now();
        let mut state = self.state();
        state.activity.record_failed_validation();
        if !result.threats.is_empty() {
            let categories: Vec<&str> = result.threats.iter().map(|t| t.label()).collect();
            state.monitor.log_event(
                EventKind::Warning,
                format!("Malicious input detected: {}", categories.join(", ")),
                "input_validator",
                Some(details([
                    ("type", json!(kind.as_str())),
                    ("threats", json!(result.threats)),
                ])),
                now,
            );
        }
        result
    }

    /// Validate upload metadata before the file is accepted
    pub fn validate_file_upload<F: FileDescriptor + ?Sized>(&self, file: &F) -> FileValidationResult {
        let max_size = self.settings.snapshot().api.max_request_size;
        let result = validate_file(file, max_size);
        if !result.valid {
            let now = self.clock.now();
            self.state().monitor.log_event(
                EventKind::Warning,
                format!("File upload rejected: {}", file.name()),
                "file_validator",
                Some(details([
                    ("name", json!(file.name())),
                    ("type", json!(file.mime_type())),
                    ("size", json!(file.size())),
                    ("errors", json!(result.errors)),
                ])),
                now,
            );
        }
        result
    }

    /// Count one request for `(identifier, action)` and decide whether it may proceed
    pub fn check_rate_limit(&self, identifier: &str, action: &str) -> RateLimitResult {
        let settings = self.settings.snapshot();
        let now = self.clock.now();
        let key = RateLimitKey::new(identifier, action);

        let mut state = self.state();
        state.monitor.record_request();
        state.activity.record_request(now);

        let decision = state.limiter.check(&key, now, &settings.rate_limit);
        match &decision {
            RateLimitDecision::Allowed => {}
            RateLimitDecision::Denied { .. } => state.monitor.record_blocked(),
            RateLimitDecision::Blocked { retry_after, reason } => {
                state.monitor.record_blocked();
                state.monitor.log_event(
                    EventKind::Warning,
                    format!("Rate limit exceeded for {}", format_rate_limit_key(identifier, action)),
                    "rate_limiter",
                    Some(details([
                        ("identifier", json!(identifier)),
                        ("action", json!(action)),
                        ("retry_after", json!(retry_after)),
                        ("reason", json!(reason)),
                    ])),
                    now,
                );
            }
        }
        decision.to_result()
    }

    /// Score current activity, scanning `payload` when given
    pub fn detect_suspicious_activity(&self, payload: Option<&Value>, context: Option<&str>) -> ActivityResult {
        let now = self.clock.now();
        let mut state = self.state();
        let result = state.activity.assess(payload, now);

        if result.suspicious {
            state.monitor.record_suspicious();
            state.monitor.log_event(
                EventKind::Warning,
                "Suspicious activity detected",
                context.unwrap_or("activity_monitor"),
                Some(details([
                    ("risk", json!(result.risk)),
                    ("reasons", json!(result.reasons)),
                ])),
                now,
            );
        }
        result
    }

    /// Append an event to the security log
    pub fn log_security_event(
        &self,
        kind: EventKind,
        message: &str,
        source: &str,
        details: Option<HashMap<String, Value>>,
    ) {
        let now = self.clock.now();
        self.state().monitor.log_event(kind, message, source, details, now);
    }

    pub fn get_metrics(&self) -> SecurityMetrics {
        self.state().monitor.metrics()
    }

    /// Up to `limit` most recent events, newest last
    pub fn get_recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.state().monitor.recent(limit)
    }

    /// Keys currently blocked
    pub fn get_blocked_identifiers(&self) -> Vec<BlockedEntry> {
        let now = self.clock.now();
        self.state().limiter.blocked(now)
    }

    /// Reset counters, events, rate-limit state and the frequency buffer
    pub fn clear_data(&self) {
        let mut state = self.state();
        state.limiter.clear();
        state.monitor.clear();
        state.activity.clear();
    }

    /// Remove expired windows and blocks, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        self.state().limiter.cleanup_expired(now)
    }

    /// Live (windows, blocks) entry counts
    pub fn tracked_entry_counts(&self) -> (usize, usize) {
        self.state().limiter.entry_counts()
    }

    /// Sweep expired entries every `period`, forever
    pub async fn run_cleanup_loop(self: Arc<Self>, period: Duration) {
        info!("Starting rate-limit cleanup every {:?}", period);
        let mut interval = time::interval(period.max(Duration::from_millis(1)));

        loop {
            interval.tick().await;
            let removed = self.cleanup_expired();
            if removed > 0 {
                debug!("Removed {} expired rate-limit entries", removed);
            }
        }
    }
}

fn details<const N: usize>(pairs: [(&str, Value); N]) -> HashMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockSettingsSource, SharedSettings};
    use crate::core::activity::{RiskLevel, VIOLATIONS_REASON, HIGH_FREQUENCY_REASON};
    use crate::core::file_validator::{UploadedFile, DOUBLE_EXTENSION_ERROR, SUSPICIOUS_FILENAME_ERROR};
    use crate::core::input_validator::NULL_INPUT_ERROR;
    use crate::core::monitoring::EVENT_LOG_CAPACITY;
    use crate::models::{Profile, SecuritySettings};
    use crate::utils::ManualClock;

    fn test_middleware() -> (SecurityMiddleware, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let middleware = SecurityMiddleware::with_clock(SecuritySettings::for_profile(Profile::Test), clock.clone());
        (middleware, clock)
    }

    #[test]
    fn test_clean_input_round_trips() {
        let (middleware, _) = test_middleware();
        let input = "Audit logs are retained for 90 days.";
        let result = middleware.validate_input(Some(input), InputKind::Text);
        assert!(result.valid);
        assert_eq!(result.sanitized, input);
        assert!(middleware.get_recent_events(10).is_empty());
    }

    #[test]
    fn test_null_input() {
        let (middleware, _) = test_middleware();
        let result = middleware.validate_input(None, InputKind::Email);
        assert!(!result.valid);
        assert_eq!(result.errors, vec![NULL_INPUT_ERROR.to_string()]);
    }

    #[test]
    fn test_malicious_input_logs_event() {
        let (middleware, _) = test_middleware();
        let result = middleware.validate_input(Some("'; DROP TABLE users; --"), InputKind::Text);
        assert!(result.errors.contains(&"SQL injection detected".to_string()));

        let events = middleware.get_recent_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Warning);
        assert_eq!(events[0].source, "input_validator");
    }

    #[test]
    fn test_failed_validations_feed_activity() {
        let (middleware, _) = test_middleware();
        for _ in 0..4 {
            middleware.validate_input(None, InputKind::Text);
        }
        assert!(!middleware.detect_suspicious_activity(None, None).suspicious);

        middleware.validate_input(Some("<script>alert(1)</script>"), InputKind::Text);
        let result = middleware.detect_suspicious_activity(None, Some("assessment_form"));
        assert!(result.suspicious);
        assert_eq!(result.risk, RiskLevel::High);
        assert_eq!(result.reasons, vec![VIOLATIONS_REASON.to_string()]);
        assert_eq!(middleware.get_metrics().suspicious_activities, 1);

        let last = middleware.get_recent_events(1);
        assert_eq!(last[0].source, "assessment_form");
    }

    #[test]
    fn test_rate_limit_threshold() {
        let (middleware, _) = test_middleware();
        let max = SecuritySettings::for_profile(Profile::Test).rate_limit.max_attempts;

        for _ in 0..max {
            assert!(middleware.check_rate_limit("user-1", "login").allowed);
        }
        let denied = middleware.check_rate_limit("user-1", "login");
        assert!(!denied.allowed);
        assert!(denied.retry_after.unwrap_or(0) > 0);

        let metrics = middleware.get_metrics();
        assert_eq!(metrics.total_requests, max as u64 + 1);
        assert_eq!(metrics.blocked_requests, 1);

        let events = middleware.get_recent_events(10);
        assert_eq!(events.last().map(|e| e.source.as_str()), Some("rate_limiter"));
    }

    #[test]
    fn test_rate_limit_isolation() {
        let (middleware, _) = test_middleware();
        for _ in 0..10 {
            middleware.check_rate_limit("id1", "actionA");
        }
        assert!(middleware.check_rate_limit("id2", "actionA").allowed);
        assert!(middleware.check_rate_limit("id1", "actionB").allowed);
    }

    #[test]
    fn test_block_expiry() {
        let (middleware, clock) = test_middleware();
        for _ in 0..4 {
            middleware.check_rate_limit("user-1", "login");
        }
        let blocked = middleware.get_blocked_identifiers();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].identifier, "user-1");
        assert_eq!(blocked[0].action, "login");

        clock.advance(chrono::Duration::milliseconds(1000));
        let still_blocked = middleware.check_rate_limit("user-1", "login");
        assert_eq!(still_blocked.retry_after, Some(1));

        clock.advance(chrono::Duration::milliseconds(1000));
        assert!(middleware.check_rate_limit("user-1", "login").allowed);
        assert!(middleware.get_blocked_identifiers().is_empty());
    }

    #[test]
    fn test_total_requests_monotonic() {
        let (middleware, _) = test_middleware();
        let mut previous = 0;
        for i in 0..10 {
            middleware.check_rate_limit("user-1", if i % 2 == 0 { "a" } else { "b" });
            let total = middleware.get_metrics().total_requests;
            assert_eq!(total, previous + 1);
            previous = total;
        }
    }

    #[test]
    fn test_clear_data_full_reset() {
        let (middleware, _) = test_middleware();
        for _ in 0..4 {
            middleware.check_rate_limit("user-1", "login");
        }
        middleware.log_security_event(EventKind::Error, "boom", "test", None);
        middleware.detect_suspicious_activity(Some(&json!("../../etc/passwd")), None);

        middleware.clear_data();

        assert_eq!(middleware.get_metrics(), SecurityMetrics::default());
        assert!(middleware.get_blocked_identifiers().is_empty());
        assert!(middleware.get_recent_events(EVENT_LOG_CAPACITY).is_empty());
        assert!(middleware.check_rate_limit("user-1", "login").allowed);
    }

    #[test]
    fn test_event_log_bound() {
        let (middleware, _) = test_middleware();
        for i in 0..(EVENT_LOG_CAPACITY + 50) {
            middleware.log_security_event(EventKind::Info, &format!("event {}", i), "test", None);
        }
        let events = middleware.get_recent_events(EVENT_LOG_CAPACITY);
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert_eq!(events[0].message, "event 50");
    }

    #[test]
    fn test_error_event_sets_last_incident() {
        let (middleware, clock) = test_middleware();
        middleware.log_security_event(EventKind::Critical, "critical", "test", None);
        assert_eq!(middleware.get_metrics().last_incident, None);

        middleware.log_security_event(EventKind::Error, "error", "test", None);
        assert_eq!(middleware.get_metrics().last_incident, Some(clock.now()));
    }

    #[test]
    fn test_file_validation() {
        let (middleware, _) = test_middleware();
        assert!(middleware.validate_file_upload(&UploadedFile::new("ssp.pdf", "application/pdf", 4096)).valid);

        let exe = middleware.validate_file_upload(&UploadedFile::new("tool.exe", "application/octet-stream", 4096));
        assert!(exe.errors.contains(&"Executable files are not allowed".to_string()));

        let double = middleware.validate_file_upload(&UploadedFile::new("doc.pdf.exe", "application/pdf", 4096));
        assert!(double.errors.contains(&DOUBLE_EXTENSION_ERROR.to_string()));
        assert!(double.errors.contains(&SUSPICIOUS_FILENAME_ERROR.to_string()));

        // Test profile caps uploads at 1 MiB
        let large = middleware.validate_file_upload(&UploadedFile::new("scan.png", "image/png", 2 * 1024 * 1024));
        assert!(!large.valid);

        assert_eq!(middleware.get_recent_events(10).len(), 3);
    }

    #[test]
    fn test_high_request_frequency() {
        let (middleware, clock) = test_middleware();
        for i in 0..21 {
            middleware.check_rate_limit(&format!("user-{}", i), "view");
        }
        let result = middleware.detect_suspicious_activity(None, None);
        assert_eq!(result.risk, RiskLevel::Medium);
        assert_eq!(result.reasons, vec![HIGH_FREQUENCY_REASON.to_string()]);

        clock.advance(chrono::Duration::seconds(2));
        assert!(!middleware.detect_suspicious_activity(None, None).suspicious);
    }

    #[test]
    fn test_settings_read_on_every_check() {
        let mut settings = MockSettingsSource::new();
        settings
            .expect_snapshot()
            .times(3)
            .returning(|| SecuritySettings::for_profile(Profile::Test));

        let middleware = SecurityMiddleware::with_clock(settings, Arc::new(ManualClock::default()));
        for _ in 0..3 {
            assert!(middleware.check_rate_limit("user-1", "login").allowed);
        }
    }

    #[test]
    fn test_settings_changes_take_effect_immediately() {
        let shared = SharedSettings::new(SecuritySettings::for_profile(Profile::Production));
        let middleware = SecurityMiddleware::with_clock(shared.clone(), Arc::new(ManualClock::default()));

        for _ in 0..3 {
            assert!(middleware.check_rate_limit("user-1", "login").allowed);
        }

        let mut tighter = SecuritySettings::for_profile(Profile::Production);
        tighter.rate_limit.max_attempts = 3;
        shared.replace(tighter);
        assert!(!middleware.check_rate_limit("user-1", "login").allowed);
    }

    #[test]
    fn test_cleanup_expired() {
        let (middleware, clock) = test_middleware();
        for _ in 0..4 {
            middleware.check_rate_limit("user-1", "login");
        }
        middleware.check_rate_limit("user-2", "login");
        assert_eq!(middleware.tracked_entry_counts(), (2, 1));

        clock.advance(chrono::Duration::seconds(3));
        assert_eq!(middleware.cleanup_expired(), 3);
        assert_eq!(middleware.tracked_entry_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_cleanup_loop_sweeps_expired_entries() {
        let (middleware, clock) = test_middleware();
        let middleware = Arc::new(middleware);
        middleware.check_rate_limit("user-1", "login");
        clock.advance(chrono::Duration::seconds(5));

        let handle = tokio::spawn(middleware.clone().run_cleanup_loop(Duration::from_millis(10)));
        time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(middleware.tracked_entry_counts(), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_share_one_window() {
        let (middleware, _) = test_middleware();
        let middleware = Arc::new(middleware);
        let max = SecuritySettings::for_profile(Profile::Test).rate_limit.max_attempts as usize;

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let middleware = middleware.clone();
                tokio::spawn(async move { middleware.check_rate_limit("10.0.0.9", "login") })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if tokio_test::assert_ok!(handle.await).allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, max);
        assert_eq!(middleware.get_blocked_identifiers().len(), 1);
        assert_eq!(middleware.get_metrics().total_requests, 32);
    }
}
