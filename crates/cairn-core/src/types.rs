//! Shared value types

use crate::error::{CoreError, CoreResult};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Storage layout of every datetime column (`2024-01-31 10:00:00.123Z`)
pub const DATETIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

/// UTC timestamp that may be "zero" (unset), stored as text.
///
/// The zero value renders as an empty string, which is also what an empty
/// `TEXT` column decodes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(Option<chrono::DateTime<Utc>>);

impl DateTime {
    /// Current time, truncated to millisecond precision
    pub fn now() -> Self {
        let now = Utc::now();
        let millis = now.timestamp_millis();
        Self(Utc.timestamp_millis_opt(millis).single())
    }

    /// Parse any of the accepted layouts. Empty input yields the zero value.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }

        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
            return Ok(Self(Some(dt.with_timezone(&Utc))));
        }

        for layout in [
            "%Y-%m-%d %H:%M:%S%.fZ",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%SZ",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S%.f",
        ] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
                return Ok(Self(Some(naive.and_utc())));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self(Some(naive.and_utc())));
            }
        }

        Err(CoreError::InvalidDateTime(value.to_string()))
    }

    /// Whether the value is unset
    pub fn is_zero(&self) -> bool {
        self.0.is_none()
    }

    /// Underlying chrono value, if set
    pub fn inner(&self) -> Option<chrono::DateTime<Utc>> {
        self.0
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        Self(Some(value))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(dt) => write!(f, "{}", dt.format(DATETIME_LAYOUT)),
            None => Ok(()),
        }
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(s) => DateTime::parse(&s).map_err(serde::de::Error::custom),
            None => Ok(Self::default()),
        }
    }
}
