// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Rational media timestamps.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Nanosecond timescale used for wall-clock derived timestamps.
pub const NANOS_TIMESCALE: u32 = 1_000_000_000;

/// A rational timestamp: `value / timescale` seconds.
///
/// A timescale of zero marks the time as invalid. Invalid times compare
/// below every valid time and never appear as a sample's presentation time
/// inside the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const INVALID: MediaTime = MediaTime {
        value: 0,
        timescale: 0,
    };

    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub const fn zero() -> Self {
        Self::new(0, 1)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(nanos, NANOS_TIMESCALE)
    }

    /// Nearest representation of `seconds` at `timescale`.
    pub fn from_seconds(seconds: f64, timescale: u32) -> Self {
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    pub const fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    pub fn seconds(&self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }
        self.value as f64 / self.timescale as f64
    }

    /// Value expressed in `timescale` units, rounded toward negative infinity.
    pub fn convert_scale(&self, timescale: u32) -> i64 {
        if !self.is_valid() || timescale == 0 {
            return 0;
        }
        if self.timescale == timescale {
            return self.value;
        }
        let scaled = self.value as i128 * timescale as i128;
        scaled.div_euclid(self.timescale as i128) as i64
    }

    /// `self - other`, expressed at the finer of the two timescales.
    pub fn checked_sub(&self, other: &MediaTime) -> Option<MediaTime> {
        if !self.is_valid() || !other.is_valid() {
            return None;
        }
        let timescale = self.timescale.max(other.timescale);
        let a = self.convert_scale(timescale);
        let b = other.convert_scale(timescale);
        a.checked_sub(b).map(|value| MediaTime::new(value, timescale))
    }

    /// `self + other`, expressed at the finer of the two timescales.
    pub fn checked_add(&self, other: &MediaTime) -> Option<MediaTime> {
        if !self.is_valid() || !other.is_valid() {
            return None;
        }
        let timescale = self.timescale.max(other.timescale);
        let a = self.convert_scale(timescale);
        let b = other.convert_scale(timescale);
        a.checked_add(b).map(|value| MediaTime::new(value, timescale))
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::INVALID
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                // Exact rational comparison; i64 * u32 always fits in i128.
                let lhs = self.value as i128 * other.timescale as i128;
                let rhs = other.value as i128 * self.timescale as i128;
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:.3}s", self.seconds())
        } else {
            f.write_str("invalid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_across_timescales() {
        let half = MediaTime::new(1, 2);
        let also_half = MediaTime::new(500, 1000);
        let later = MediaTime::new(30_001, 60_000);

        assert_eq!(half, also_half);
        assert!(later > half);
        assert!(MediaTime::INVALID < MediaTime::zero());
    }

    #[test]
    fn converts_scale_with_floor() {
        let t = MediaTime::new(1001, 30_000);
        assert_eq!(t.convert_scale(90_000), 3003);
        assert_eq!(MediaTime::new(-1, 3).convert_scale(2), -1);
        assert_eq!(MediaTime::INVALID.convert_scale(1000), 0);
    }

    #[test]
    fn subtracts_at_finer_timescale() {
        let a = MediaTime::new(3, 2);
        let b = MediaTime::new(250, 1000);
        let delta = a.checked_sub(&b).unwrap();
        assert_eq!(delta, MediaTime::new(1250, 1000));
        assert!(a.checked_sub(&MediaTime::INVALID).is_none());
    }
}
