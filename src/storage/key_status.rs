// src/storage/key_status.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque credential string. Unique within a pool.
pub type ApiKey = String;

/// Persisted usage and rate-limit state of a single API key.
///
/// Field names are camelCase on the wire so records written by other
/// processes sharing the store stay readable.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub key: ApiKey,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub is_rate_limited: bool,
    #[serde(default, with = "timestamp")]
    pub rate_limited_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl KeyStatus {
    /// Fresh record: unused, available, no timestamps.
    pub fn new(key: impl Into<ApiKey>) -> Self {
        Self {
            key: key.into(),
            usage_count: 0,
            is_rate_limited: false,
            rate_limited_at: None,
            last_used_at: None,
        }
    }

    /// Merge a partial update; fields left as `None` keep their value.
    pub fn apply(&mut self, update: &KeyStatusUpdate) {
        if let Some(usage_count) = update.usage_count {
            self.usage_count = usage_count;
        }
        if let Some(is_rate_limited) = update.is_rate_limited {
            self.is_rate_limited = is_rate_limited;
        }
        if let Some(rate_limited_at) = update.rate_limited_at {
            self.rate_limited_at = rate_limited_at;
        }
        if let Some(last_used_at) = update.last_used_at {
            self.last_used_at = last_used_at;
        }
    }

    /// Whether the key has been rate limited for longer than `cool_down`.
    ///
    /// A limited record without `rate_limited_at` never cools down.
    pub fn is_cooled_down(&self, now: DateTime<Utc>, cool_down: Duration) -> bool {
        match self.rate_limited_at {
            Some(limited_at) => (now - limited_at)
                .to_std()
                .map_or(false, |elapsed| elapsed > cool_down),
            None => false,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.is_rate_limited
    }
}

/// Partial update of a [`KeyStatus`]. The key itself is immutable.
///
/// Timestamp fields are doubly optional: `None` leaves the stored value
/// alone, `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyStatusUpdate {
    pub usage_count: Option<u64>,
    pub is_rate_limited: Option<bool>,
    pub rate_limited_at: Option<Option<DateTime<Utc>>>,
    pub last_used_at: Option<Option<DateTime<Utc>>>,
}

impl KeyStatusUpdate {
    /// Clears usage and rate-limit state; `last_used_at` is kept.
    pub fn cleared() -> Self {
        Self {
            usage_count: Some(0),
            is_rate_limited: Some(false),
            rate_limited_at: Some(None),
            last_used_at: None,
        }
    }

    /// Marks the key limited at `at`.
    pub fn rate_limited(at: DateTime<Utc>) -> Self {
        Self {
            is_rate_limited: Some(true),
            rate_limited_at: Some(Some(at)),
            ..Self::default()
        }
    }

    pub fn with_usage_count(mut self, usage_count: u64) -> Self {
        self.usage_count = Some(usage_count);
        self
    }

    pub fn with_last_used_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_used_at = Some(Some(at));
        self
    }
}

/// Timestamps are written as RFC 3339 and read back from RFC 3339 strings
/// or epoch milliseconds.
mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
        Float(f64),
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(de::Error::custom),
            Some(Raw::Millis(ms)) => from_millis(ms).map(Some),
            Some(Raw::Float(ms)) => from_millis(ms as i64).map(Some),
        }
    }

    fn from_millis<E: de::Error>(ms: i64) -> Result<DateTime<Utc>, E> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}")))
    }
}
