//! Per-operation suspension windows ("error states").
//!
//! A slot is suspended while `now <= end`. Windows live inside the group
//! document so they survive restarts; callers persist after every `set`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

/// Remote entity lookups (handle or id -> profile).
pub const PROFILE_RESOLUTION: &str = "profile-resolution";

/// Message history requests.
pub const MESSAGE_FETCH: &str = "message-fetch";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cooldowns {
    until: BTreeMap<String, DateTime<Utc>>,
}

impl Cooldowns {
    pub fn from_map(until: BTreeMap<String, DateTime<Utc>>) -> Self {
        Self { until }
    }

    pub fn as_map(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.until
    }

    pub fn is_suspended(&self, slot: &str, now: DateTime<Utc>) -> bool {
        self.until.get(slot).is_some_and(|end| now <= *end)
    }

    /// Suspend `slot` for `seconds` from `now`, replacing any earlier window.
    /// Returns the end of the window.
    pub fn set(&mut self, slot: &str, seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        let end = i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.until.insert(slot.to_string(), end);
        end
    }

    /// Time left on an active window.
    pub fn remaining(&self, slot: &str, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.until
            .get(slot)
            .filter(|end| now <= **end)
            .map(|end| *end - now)
    }

    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}
