// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Timestamped media samples and raw video frames.

use bytes::Bytes;
use std::sync::Arc;

use super::format::{FormatDescription, MediaKind, PixelFormat};
use super::{CaptureError, MediaTime, Result};

/// Presentation timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleTiming {
    pub pts: MediaTime,
    /// Declared duration, if the producer knows it.
    pub duration: Option<MediaTime>,
}

impl SampleTiming {
    pub fn new(pts: MediaTime) -> Self {
        Self {
            pts,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: MediaTime) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// One unit of media data travelling from a capture source to the sink.
///
/// The payload is reference counted; cloning a sample never copies media bytes.
#[derive(Debug, Clone)]
pub struct TimedSample {
    kind: MediaKind,
    timing: SampleTiming,
    payload: Bytes,
    data_ready: bool,
    format: Option<Arc<FormatDescription>>,
}

impl TimedSample {
    /// A data-ready sample. Fails when `payload` is empty.
    pub fn new(
        kind: MediaKind,
        timing: SampleTiming,
        payload: Bytes,
        format: Option<Arc<FormatDescription>>,
    ) -> Result<Self> {
        if payload.is_empty() {
            return Err(CaptureError::Format(format!(
                "data-ready {} sample at {} has an empty payload",
                kind, timing.pts
            )));
        }
        Ok(Self {
            kind,
            timing,
            payload,
            data_ready: true,
            format,
        })
    }

    /// A placeholder sample whose data has not materialised yet.
    pub fn pending(
        kind: MediaKind,
        timing: SampleTiming,
        format: Option<Arc<FormatDescription>>,
    ) -> Self {
        Self {
            kind,
            timing,
            payload: Bytes::new(),
            data_ready: false,
            format,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn timing(&self) -> SampleTiming {
        self.timing
    }

    pub fn pts(&self) -> MediaTime {
        self.timing.pts
    }

    pub fn duration(&self) -> Option<MediaTime> {
        self.timing.duration
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_data_ready(&self) -> bool {
        self.data_ready
    }

    pub fn format(&self) -> Option<&Arc<FormatDescription>> {
        self.format.as_ref()
    }

    /// Format metadata is present, agrees with the sample kind, and the
    /// presentation time is usable.
    pub fn has_valid_format(&self) -> bool {
        match &self.format {
            Some(format) => format.media_kind() == self.kind && self.timing.pts.is_valid(),
            None => false,
        }
    }
}

/// An uncompressed frame as delivered by a camera.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, data: Bytes) -> Result<Self> {
        let expected = pixel_format.frame_size(width, height);
        if data.len() < expected {
            return Err(CaptureError::Format(format!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                pixel_format,
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_format,
            data,
        })
    }

    /// Luma plane of an NV12 frame.
    pub fn luma(&self) -> &[u8] {
        let len = (self.width as usize * self.height as usize).min(self.data.len());
        &self.data[..len]
    }
}
