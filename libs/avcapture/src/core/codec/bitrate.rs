// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::MediaTime;

/// Measures the bitrate of the first second of an encoded stream.
///
/// Bytes are accumulated from the first sample's timestamp until a sample at
/// least one second later arrives; the result is reported once.
#[derive(Debug, Default)]
pub struct BitrateMeasure {
    first_pts: Option<MediaTime>,
    bytes: u64,
    bits_per_second: Option<u64>,
}

impl BitrateMeasure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. Returns the measured bitrate exactly once, when the
    /// one-second window closes.
    pub fn add(&mut self, pts: MediaTime, size: usize) -> Option<u64> {
        if self.bits_per_second.is_some() || !pts.is_valid() {
            return None;
        }

        let first = *self.first_pts.get_or_insert(pts);
        let elapsed = pts.checked_sub(&first).map(|d| d.seconds()).unwrap_or(0.0);
        if elapsed < 1.0 {
            self.bytes += size as u64;
            return None;
        }

        let bps = self.bytes * 8;
        self.bits_per_second = Some(bps);
        Some(bps)
    }

    pub fn bits_per_second(&self) -> Option<u64> {
        self.bits_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_second_once() {
        let mut measure = BitrateMeasure::new();
        for frame in 0..30 {
            assert_eq!(measure.add(MediaTime::new(frame, 30), 1000), None);
        }
        assert_eq!(measure.add(MediaTime::new(30, 30), 1000), Some(240_000));
        assert_eq!(measure.add(MediaTime::new(31, 30), 1000), None);
        assert_eq!(measure.bits_per_second(), Some(240_000));
    }
}
