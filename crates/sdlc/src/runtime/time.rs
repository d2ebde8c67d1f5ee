//! Time points and intervals with nanosecond precision.
//!
//! Both types store nanoseconds in a `u64`/`i64` and check all arithmetic,
//! raising `OutOfRange` on overflow. A `Time` is an absolute point (epoch
//! based, never negative); an `Interval` is a signed duration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::error::{RtResult, RuntimeError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Absolute point in time, as nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    nanos: u64,
}

impl Time {
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn from_seconds(secs: u64) -> RtResult<Self> {
        secs.checked_mul(NANOS_PER_SEC)
            .map(|nanos| Self { nanos })
            .ok_or_else(|| RuntimeError::out_of_range(format!("time value {secs}s out of range")))
    }

    pub fn nanos(self) -> u64 {
        self.nanos
    }

    pub fn seconds(self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC as f64
    }

    pub fn add(self, interval: Interval) -> RtResult<Self> {
        let nanos = if interval.nanos >= 0 {
            self.nanos.checked_add(interval.nanos.unsigned_abs())
        } else {
            self.nanos.checked_sub(interval.nanos.unsigned_abs())
        };
        nanos
            .map(|nanos| Self { nanos })
            .ok_or_else(|| RuntimeError::out_of_range("time arithmetic overflow"))
    }

    pub fn sub(self, other: Self) -> RtResult<Interval> {
        let delta = i64::try_from(self.nanos)
            .ok()
            .zip(i64::try_from(other.nanos).ok())
            .and_then(|(a, b)| a.checked_sub(b));
        delta
            .map(Interval::from_nanos)
            .ok_or_else(|| RuntimeError::out_of_range("time difference out of range"))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{secs}.{frac:09}",
            secs = self.nanos / NANOS_PER_SEC,
            frac = self.nanos % NANOS_PER_SEC
        )
    }
}

/// Signed duration, as nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Interval {
    nanos: i64,
}

impl Interval {
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    pub fn from_seconds(secs: i64) -> RtResult<Self> {
        secs.checked_mul(NANOS_PER_SEC as i64)
            .map(|nanos| Self { nanos })
            .ok_or_else(|| RuntimeError::out_of_range(format!("interval {secs}s out of range")))
    }

    pub fn nanos(self) -> i64 {
        self.nanos
    }

    pub fn add(self, other: Self) -> RtResult<Self> {
        self.nanos
            .checked_add(other.nanos)
            .map(Self::from_nanos)
            .ok_or_else(|| RuntimeError::out_of_range("interval arithmetic overflow"))
    }

    pub fn sub(self, other: Self) -> RtResult<Self> {
        self.nanos
            .checked_sub(other.nanos)
            .map(Self::from_nanos)
            .ok_or_else(|| RuntimeError::out_of_range("interval arithmetic overflow"))
    }

    pub fn mul(self, factor: i64) -> RtResult<Self> {
        self.nanos
            .checked_mul(factor)
            .map(Self::from_nanos)
            .ok_or_else(|| RuntimeError::out_of_range("interval arithmetic overflow"))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.nanos < 0 { "-" } else { "" };
        let abs = self.nanos.unsigned_abs();
        write!(
            f,
            "{sign}{secs}.{frac:09}s",
            secs = abs / NANOS_PER_SEC,
            frac = abs % NANOS_PER_SEC
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_plus_interval() {
        let t = Time::from_seconds(10).unwrap();
        let shifted = t.add(Interval::from_seconds(-3).unwrap()).unwrap();
        assert_eq!(shifted, Time::from_seconds(7).unwrap());
    }

    #[test]
    fn time_underflow_raises() {
        let t = Time::from_seconds(1).unwrap();
        assert!(t.add(Interval::from_seconds(-2).unwrap()).is_err());
    }

    #[test]
    fn difference_is_signed() {
        let a = Time::from_seconds(5).unwrap();
        let b = Time::from_seconds(8).unwrap();
        assert_eq!(a.sub(b).unwrap(), Interval::from_seconds(-3).unwrap());
    }

    #[test]
    fn display_uses_nanosecond_fraction() {
        assert_eq!(Time::from_nanos(1_500_000_000).to_string(), "1.500000000");
        assert_eq!(Interval::from_nanos(-500).to_string(), "-0.000000500s");
    }
}
