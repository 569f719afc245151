// A Timestamp is microseconds since the Unix epoch. Segments, sequences,
// audit records and handoff bookkeeping are all ordered by these; the wire
// protocol carries them as a decimal "seconds.micros" string (see
// Timestamp::to_repr) rather than a binary integer, mirroring the original
// system's `repr(timestamp)` / `parse_timestamp_repr` pair.

use crate::{err, Error};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch");
        Self(dur.as_micros() as i64)
    }

    pub fn micros(&self) -> i64 {
        self.0
    }

    /// Decimal-microseconds representation: "{seconds}.{micros:06}". This is
    /// the exact byte sequence the auditor hashes (§4.5a) and the form every
    /// wire message's "*-timestamp-repr" field carries.
    pub fn to_repr(&self) -> String {
        let seconds = self.0.div_euclid(1_000_000);
        let micros = self.0.rem_euclid(1_000_000);
        format!("{}.{:06}", seconds, micros)
    }

    pub fn parse_repr(repr: &str) -> Result<Self, Error> {
        let (secs_str, micros_str) = repr
            .split_once('.')
            .ok_or_else(|| err("malformed timestamp repr: missing '.'"))?;
        let secs: i64 = secs_str
            .parse()
            .map_err(|_| err("malformed timestamp repr: bad seconds"))?;
        let micros: i64 = micros_str
            .parse()
            .map_err(|_| err("malformed timestamp repr: bad micros"))?;
        Ok(Self(secs * 1_000_000 + micros))
    }
}
