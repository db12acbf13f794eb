// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Platform compression session seam.
//!
//! A [`CompressionSession`] is the stateful hardware encoder the
//! [`HardwareEncoder`](super::HardwareEncoder) adapter drives. Output arrives
//! asynchronously through the [`CompressionOutputHandler`] given at creation,
//! on a thread owned by the platform.

use bitflags::bitflags;
use std::sync::Arc;

use super::encoder_config::{EncoderConfig, EntropyMode, H264Profile};
use crate::core::sample::{SampleTiming, TimedSample, VideoFrame};
use crate::core::{CaptureError, Result};

/// Outcome of one asynchronous encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
    Success,
    /// Platform error code.
    Failed(i32),
}

impl EncodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EncodeStatus::Success)
    }
}

bitflags! {
    /// Per-frame information reported alongside encoder output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EncodeInfoFlags: u32 {
        const ASYNCHRONOUS = 1 << 0;
        const FRAME_DROPPED = 1 << 1;
    }
}

/// Session properties applied right after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionProperty {
    RealTime(bool),
    EntropyMode(EntropyMode),
    /// Profile with automatic level selection.
    ProfileLevel(H264Profile),
    AverageBitRate(u32),
    ExpectedFrameRate(u32),
    AllowFrameReordering(bool),
}

impl CompressionProperty {
    /// Property list for a low-latency session described by `config`.
    pub fn for_config(config: &EncoderConfig) -> Vec<CompressionProperty> {
        vec![
            CompressionProperty::RealTime(config.real_time),
            CompressionProperty::EntropyMode(config.entropy_mode),
            CompressionProperty::ProfileLevel(config.profile),
            CompressionProperty::AverageBitRate(config.bitrate_bps),
            CompressionProperty::ExpectedFrameRate(config.fps),
            CompressionProperty::AllowFrameReordering(config.allow_frame_reordering),
        ]
    }
}

/// Receives `(status, flags, sample)` for every frame the session finishes.
///
/// `sample` is `None` when the session produced no data (failure or dropped
/// frame).
pub type CompressionOutputHandler =
    Arc<dyn Fn(EncodeStatus, EncodeInfoFlags, Option<TimedSample>) + Send + Sync>;

pub trait CompressionSession: Send {
    fn set_property(&mut self, property: CompressionProperty) -> Result<()>;

    /// Submit a frame. Returns immediately; output goes to the handler.
    fn encode_frame(&mut self, frame: &VideoFrame, timing: SampleTiming)
        -> Result<EncodeInfoFlags>;

    /// Block until every submitted frame has been emitted.
    fn complete_frames(&mut self) -> Result<()>;

    /// Release the session. No output is delivered afterwards.
    fn invalidate(&mut self);
}

pub trait CompressionSessionFactory: Send + Sync {
    fn create(
        &self,
        config: &EncoderConfig,
        output: CompressionOutputHandler,
    ) -> Result<Box<dyn CompressionSession>>;
}

/// Factory for platforms without a hardware encoder backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSessionFactory;

impl CompressionSessionFactory for UnsupportedSessionFactory {
    fn create(
        &self,
        _config: &EncoderConfig,
        _output: CompressionOutputHandler,
    ) -> Result<Box<dyn CompressionSession>> {
        Err(CaptureError::NotSupported(
            "hardware H.264 encoding is not available on this platform".into(),
        ))
    }
}

/// The platform's hardware encoder backend.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn default_session_factory() -> Arc<dyn CompressionSessionFactory> {
    Arc::new(crate::apple::videotoolbox::VideoToolboxSessionFactory)
}

/// The platform's hardware encoder backend.
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn default_session_factory() -> Arc<dyn CompressionSessionFactory> {
    Arc::new(UnsupportedSessionFactory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_list_follows_config() {
        let config = EncoderConfig::new(640, 480).with_bitrate(500_000);
        let properties = CompressionProperty::for_config(&config);
        assert!(properties.contains(&CompressionProperty::RealTime(true)));
        assert!(properties.contains(&CompressionProperty::EntropyMode(EntropyMode::Cavlc)));
        assert!(properties.contains(&CompressionProperty::AverageBitRate(500_000)));
    }

    #[test]
    fn unsupported_factory_refuses() {
        let handler: CompressionOutputHandler = Arc::new(|_, _, _| {});
        let result = UnsupportedSessionFactory.create(&EncoderConfig::default(), handler);
        assert!(matches!(result, Err(CaptureError::NotSupported(_))));
    }
}
