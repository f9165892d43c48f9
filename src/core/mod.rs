//! Core functionality for the security middleware.
//!
//! This module contains the input and upload validators, the rate limiter,
//! the event monitor and the activity heuristics, and the middleware that
//! ties them to one shared state.

pub mod activity;
pub mod file_validator;
pub mod input_validator;
pub mod middleware;
pub mod monitoring;
pub mod rate_limiter;
pub mod threat_patterns;

pub use activity::{ActivityResult, RiskLevel};
pub use file_validator::{FileDescriptor, FileValidationResult, UploadedFile};
pub use input_validator::{InputKind, ValidationResult};
pub use middleware::SecurityMiddleware;
pub use monitoring::{EventKind, SecurityEvent, SecurityMetrics};
pub use rate_limiter::{BlockedEntry, RateLimitResult};
pub use threat_patterns::{ThreatCategory, ThreatDetector};
