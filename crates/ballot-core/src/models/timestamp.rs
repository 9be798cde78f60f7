//! Serde helpers for millisecond timestamps.
//!
//! Rows are stored locally as Unix milliseconds but travel to the remote as
//! RFC 3339 strings (Postgres `timestamptz`). Incoming values may be RFC 3339,
//! a bare `YYYY-MM-DD` date, a naive `YYYY-MM-DD HH:MM:SS` timestamp (read as
//! UTC) or an integer millisecond value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    fn into_millis(self) -> Result<i64, String> {
        match self {
            Self::Millis(millis) => Ok(millis),
            Self::Text(text) => {
                parse_timestamp(&text).ok_or_else(|| format!("invalid timestamp '{text}'"))
            }
        }
    }
}

/// Parse a textual timestamp into Unix milliseconds.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

/// Format Unix milliseconds as an RFC 3339 UTC string.
pub fn format_timestamp(millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|datetime| datetime.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn serialize<S: Serializer>(millis: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    let text = format_timestamp(*millis)
        .ok_or_else(|| S::Error::custom(format!("timestamp out of range: {millis}")))?;
    serializer.serialize_str(&text)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    RawTimestamp::deserialize(deserializer)?
        .into_millis()
        .map_err(D::Error::custom)
}

/// Same conventions for nullable timestamp columns.
pub mod option {
    use super::{format_timestamp, RawTimestamp};
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(millis: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match millis {
            Some(millis) => {
                let text = format_timestamp(*millis)
                    .ok_or_else(|| S::Error::custom(format!("timestamp out of range: {millis}")))?;
                serializer.serialize_some(&text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Option::<RawTimestamp>::deserialize(deserializer)?
            .map(RawTimestamp::into_millis)
            .transpose()
            .map_err(D::Error::custom)
    }
}
