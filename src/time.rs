//! Integer tick timestamps
//!
//! Every timestamp entering the store is normalized to [`Ticks`], an unsigned
//! tick count. Trace producers sometimes hand timestamps over as decimal text;
//! that text is parsed here, once, at the ingestion boundary. Nothing downstream
//! ever compares timestamps as strings, so `"10"` always sorts after `"9"`.
//!
//! # Example
//!
//! ```
//! use taskscope::time::Ticks;
//!
//! let a: Ticks = "9".parse().unwrap();
//! let b: Ticks = "10".parse().unwrap();
//! assert!(a < b);
//! assert_eq!(a.duration_until(b), Some(1));
//! ```

use crate::error::TraceError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp as a normalized integer tick count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Ticks(pub u64);

impl Ticks {
    /// Raw tick count
    pub fn get(self) -> u64 {
        self.0
    }

    /// Ticks elapsed from `self` until `end`, or `None` if `end` is earlier
    pub fn duration_until(self, end: Ticks) -> Option<u64> {
        end.0.checked_sub(self.0)
    }

    /// Whether `self` lies within the closed range `[start, end]`
    pub fn within(self, start: Ticks, end: Ticks) -> bool {
        start <= self && self <= end
    }
}

impl From<u64> for Ticks {
    fn from(value: u64) -> Self {
        Ticks(value)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ticks {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Ticks)
            .map_err(|_| TraceError::InvalidTimestamp(s.to_string()))
    }
}

// Accepts both integer and decimal-text timestamps
impl<'de> Deserialize<'de> for Ticks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TicksVisitor;

        impl Visitor<'_> for TicksVisitor {
            type Value = Ticks;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned tick count as integer or decimal text")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Ticks, E> {
                Ok(Ticks(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Ticks, E> {
                u64::try_from(v)
                    .map(Ticks)
                    .map_err(|_| E::custom(format!("negative timestamp {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Ticks, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TicksVisitor)
    }
}
