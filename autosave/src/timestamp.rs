//! Save timestamps.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Time of a successful local save, serialized as Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SavedAt(DateTime<Utc>);

impl SavedAt {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for SavedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl Serialize for SavedAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for SavedAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        Ok(Self::from_millis(ms))
    }
}

/// Issues strictly increasing save timestamps.
///
/// Wall-clock milliseconds can repeat (fast successive writes) or go
/// backwards (clock adjustments). The clock never hands out a value at or
/// below the last one it issued, nor at or below the previous save of the
/// same key.
#[derive(Debug, Default)]
pub struct SavedAtClock {
    last: i64,
}

impl SavedAtClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp for a key whose previous save was `previous`.
    pub fn next(&mut self, previous: Option<SavedAt>) -> SavedAt {
        let mut ms = SavedAt::now().as_millis().max(self.last + 1);
        if let Some(prev) = previous {
            ms = ms.max(prev.as_millis() + 1);
        }
        self.last = ms;
        SavedAt::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_millis() {
        let ts = SavedAt::from_millis(1705315800000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1705315800000");
        let back: SavedAt = serde_json::from_str("1705315800000").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_clock_strictly_increasing() {
        let mut clock = SavedAtClock::new();
        let mut prev = clock.next(None);
        for _ in 0..1000 {
            let next = clock.next(None);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_clock_respects_previous_save() {
        let mut clock = SavedAtClock::new();
        // A record saved "in the future" (e.g. before a clock rollback).
        let future = SavedAt::from_millis(SavedAt::now().as_millis() + 60_000);
        let next = clock.next(Some(future));
        assert_eq!(next.as_millis(), future.as_millis() + 1);
    }
}
