//! Rate limiting implementation for the security middleware.
//!
//! This module tracks per-(identifier, action) request counts in fixed
//! windows and blocks a key for a configured duration once it exhausts its
//! attempts. A block is always consulted before the window.

use std::collections::HashMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::models::RateLimitSettings;
use crate::utils::seconds_until;

/// Composite key of a rate-limited subject
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub identifier: String,
    pub action: String,
}

impl RateLimitKey {
    pub fn new(identifier: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            action: action.into(),
        }
    }
}

/// Requests seen in the current window
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

/// Active block for a key
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntry {
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
}

/// A blocked key as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedEntry {
    pub identifier: String,
    pub action: String,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
}

/// Result of one rate-limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Seconds until the key is unblocked, present when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Decision taken by the limiter for one request
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    /// Key was already blocked
    Denied { retry_after: u64 },
    /// This request exhausted the window and created a block
    Blocked { retry_after: u64, reason: String },
}

impl RateLimitDecision {
    pub fn to_result(&self) -> RateLimitResult {
        match self {
            RateLimitDecision::Allowed => RateLimitResult {
                allowed: true,
                retry_after: None,
            },
            RateLimitDecision::Denied { retry_after }
            | RateLimitDecision::Blocked { retry_after, .. } => RateLimitResult {
                allowed: false,
                retry_after: Some(*retry_after),
            },
        }
    }
}

/// In-memory rate limiter
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<RateLimitKey, RateLimitEntry>,
    blocks: HashMap<RateLimitKey, BlockEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `key` at `now`
    pub fn check(&mut self, key: &RateLimitKey, now: DateTime<Utc>, settings: &RateLimitSettings) -> RateLimitDecision {
        if let Some(block) = self.blocks.get(key) {
            if now < block.blocked_until {
                return RateLimitDecision::Denied {
                    retry_after: seconds_until(now, block.blocked_until),
                };
            }
            // Block lifted: the key starts over with a fresh window
            self.blocks.remove(key);
            self.windows.remove(key);
        }

        match self.windows.get_mut(key) {
            Some(entry) if now < entry.reset_time => {
                if entry.count >= settings.max_attempts {
                    let blocked_until = now + Duration::milliseconds(settings.block_duration_ms as i64);
                    let reason = format!(
                        "Exceeded {} attempts within {} seconds",
                        settings.max_attempts,
                        settings.window_ms / 1000
                    );
                    self.blocks.insert(
                        key.clone(),
                        BlockEntry {
                            blocked_until,
                            reason: reason.clone(),
                        },
                    );
                    return RateLimitDecision::Blocked {
                        retry_after: seconds_until(now, blocked_until),
                        reason,
                    };
                }
                entry.count += 1;
            }
            _ => {
                self.windows.insert(
                    key.clone(),
                    RateLimitEntry {
                        count: 1,
                        reset_time: now + Duration::milliseconds(settings.window_ms as i64),
                    },
                );
            }
        }

        RateLimitDecision::Allowed
    }

    /// Blocks still in force at `now`
    pub fn blocked(&self, now: DateTime<Utc>) -> Vec<BlockedEntry> {
        let mut entries: Vec<BlockedEntry> = self
            .blocks
            .iter()
            .filter(|(_, block)| now < block.blocked_until)
            .map(|(key, block)| BlockedEntry {
                identifier: key.identifier.clone(),
                action: key.action.clone(),
                blocked_until: block.blocked_until,
                reason: block.reason.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.blocked_until.cmp(&b.blocked_until));
        entries
    }

    #[cfg(test)]
    fn window(&self, key: &RateLimitKey) -> Option<&RateLimitEntry> {
        self.windows.get(key)
    }

    /// Drop expired windows and blocks, returning how many entries were removed
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len() + self.blocks.len();
        self.windows.retain(|_, entry| now < entry.reset_time);
        self.blocks.retain(|_, block| now < block.blocked_until);
        before - (self.windows.len() + self.blocks.len())
    }

    /// Live (windows, blocks) entry counts
    pub fn entry_counts(&self) -> (usize, usize) {
        (self.windows.len(), self.blocks.len())
    }

    pub fn clear(&mut self) {
        self.windows.clear();
        self.blocks.clear();
    }
}
