use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

/// How long a written entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// 15 minutes.
    #[default]
    Default,
    /// 30 days.
    LongLived,
    /// 1 minute.
    ShortLived,
}

impl ExpiryPolicy {
    /// Resolves a pair of caller flags into a policy.
    ///
    /// Requesting both long-lived and short-lived is rejected with
    /// [`Error::ConflictingPolicy`].
    pub fn from_flags(long_live: bool, short_live: bool) -> Result<Self> {
        match (long_live, short_live) {
            (true, true) => Err(Error::ConflictingPolicy),
            (true, false) => Ok(ExpiryPolicy::LongLived),
            (false, true) => Ok(ExpiryPolicy::ShortLived),
            (false, false) => Ok(ExpiryPolicy::Default),
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            ExpiryPolicy::Default => Duration::minutes(15),
            ExpiryPolicy::LongLived => Duration::days(30),
            ExpiryPolicy::ShortLived => Duration::minutes(1),
        }
    }
}

/// A single stored record.
///
/// Timestamps serialize as RFC 3339 strings and `id` as a hyphenated UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Value,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub expired: DateTime<Utc>,
    pub id: Uuid,
}

impl Entry {
    pub(crate) fn new(key: &str, value: Value, policy: ExpiryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            value,
            created: now,
            updated: now,
            expired: now + policy.ttl(),
            id: Uuid::new_v4(),
        }
    }

    /// Builds the replacement for `self`: same `created`, fresh id, and an
    /// expiry window restarted from `now`.
    pub(crate) fn renewed(&self, value: Value, policy: ExpiryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            key: self.key.clone(),
            value,
            created: self.created,
            updated: now,
            expired: now + policy.ttl(),
            id: Uuid::new_v4(),
        }
    }

    /// An entry is live while its expiry is strictly in the future.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expired > now
    }

    /// Whether the value is an object whose `field` equals `expected`.
    ///
    /// Comparison is by JSON type and value, so `1` never matches `"1"`.
    pub fn matches(&self, field: &str, expected: &Value) -> bool {
        self.value.get(field).is_some_and(|v| v == expected)
    }
}
