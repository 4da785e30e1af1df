// Message schemas shared by the relay and its clients.
//
// `Report` is what a client sends: its current card message, a color tag, and
// where it is. `ReplyRecord` is what the relay sends back for each nearby
// peer. Field names are the wire names (`msg`, `loc`, `client`, ...) so the
// serde derives double as the schema definition; see `codec.rs` for the
// encode/decode entry points.
//
// Timestamps are written as RFC 3339 UTC. On input we also accept the bare
// `2019-05-01T12:00:00.123` form (no offset) that older mobile clients emit,
// and read it as UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A position on the Earth's surface. Altitude is carried for completeness
/// but never takes part in distance computation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Meters. Optional on the wire.
    #[serde(default)]
    pub altitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
        }
    }
}

/// A client's self-reported state. Only the most recent report per session is
/// ever matched against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub msg: String,
    pub color: String,
    pub loc: Location,
    #[serde(with = "timestamp")]
    pub time: DateTime<Utc>,
}

impl Report {
    /// Build a report stamped with the current time.
    pub fn new(msg: impl Into<String>, color: impl Into<String>, loc: Location) -> Self {
        Self {
            msg: msg.into(),
            color: color.into(),
            loc,
            time: Utc::now(),
        }
    }
}

/// One matched peer, as seen by the session receiving the reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    /// The peer's IP address in text form.
    pub client: String,
    pub msg: String,
    pub color: String,
    /// Great-circle distance between the two reports, in meters.
    pub distance: f64,
}

/// Parse a client timestamp: RFC 3339 with any offset, or a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(rfc_err) => chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
