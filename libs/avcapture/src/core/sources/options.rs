// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capture source configuration.

use serde::{Deserialize, Serialize};

use crate::core::codec::DEFAULT_BITRATE_BPS;

/// Session quality preset. Used when explicit dimensions or frame rate are
/// not set or not supported by the active device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPreset {
    Low,
    Medium,
    High,
    Vga640x480,
    #[default]
    Hd1280x720,
    Hd1920x1080,
}

impl SessionPreset {
    /// Nominal frame size.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SessionPreset::Low => (192, 144),
            SessionPreset::Medium => (480, 360),
            SessionPreset::High => (1920, 1080),
            SessionPreset::Vga640x480 => (640, 480),
            SessionPreset::Hd1280x720 => (1280, 720),
            SessionPreset::Hd1920x1080 => (1920, 1080),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        match self {
            SessionPreset::Low => 15,
            _ => 30,
        }
    }
}

/// Options accepted by a capture source. Each is independently settable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Route video through the hardware encoder.
    pub encode_video: bool,
    pub video_bitrate: u32,
    pub frame_dimensions: Option<(u32, u32)>,
    pub frame_rate: Option<u32>,
    pub session_preset: SessionPreset,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            encode_video: false,
            video_bitrate: DEFAULT_BITRATE_BPS,
            frame_dimensions: None,
            frame_rate: None,
            session_preset: SessionPreset::default(),
        }
    }
}

/// A single option assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOption {
    EncodeVideo(bool),
    VideoBitrate(u32),
    FrameDimensions { width: u32, height: u32 },
    FrameRate(u32),
    SessionPreset(SessionPreset),
}

impl CaptureOptions {
    /// Last write wins.
    pub fn apply(&mut self, option: CaptureOption) {
        match option {
            CaptureOption::EncodeVideo(enabled) => self.encode_video = enabled,
            CaptureOption::VideoBitrate(bps) => self.video_bitrate = bps,
            CaptureOption::FrameDimensions { width, height } => {
                self.frame_dimensions = Some((width, height))
            }
            CaptureOption::FrameRate(fps) => self.frame_rate = Some(fps),
            CaptureOption::SessionPreset(preset) => self.session_preset = preset,
        }
    }

    pub fn with(mut self, option: CaptureOption) -> Self {
        self.apply(option);
        self
    }
}
