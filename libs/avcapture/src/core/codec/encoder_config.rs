// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hardware encoder configuration.

use serde::{Deserialize, Serialize};

use crate::core::{CaptureError, Result};

/// Bitrate used when the caller does not choose one (1 Mibit/s).
pub const DEFAULT_BITRATE_BPS: u32 = 1024 * 1024;

/// H.264 profile; the level is always chosen automatically by the encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    Baseline,
    #[default]
    Main,
    High,
}

impl H264Profile {
    /// `profile_idc` as written into the SPS.
    pub fn profile_idc(&self) -> u8 {
        match self {
            H264Profile::Baseline => 66,
            H264Profile::Main => 77,
            H264Profile::High => 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntropyMode {
    #[default]
    Cavlc,
    Cabac,
}

/// Hardware encoder configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Video width in pixels.
    pub width: u32,
    /// Video height in pixels.
    pub height: u32,
    /// Target average bitrate in bits per second.
    pub bitrate_bps: u32,
    /// Expected frames per second.
    pub fps: u32,
    pub profile: H264Profile,
    pub entropy_mode: EntropyMode,
    /// Ask the encoder to favour latency over compression efficiency.
    pub real_time: bool,
    /// Permit B-frames.
    pub allow_frame_reordering: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate_bps: DEFAULT_BITRATE_BPS,
            fps: 30,
            profile: H264Profile::Main,
            entropy_mode: EntropyMode::Cavlc,
            real_time: true,
            allow_frame_reordering: false,
        }
    }
}

impl EncoderConfig {
    /// Create a new config with specified dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the target bitrate in bits per second.
    pub fn with_bitrate(mut self, bitrate_bps: u32) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }

    /// Set the frames per second.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_profile(mut self, profile: H264Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_entropy_mode(mut self, entropy_mode: EntropyMode) -> Self {
        self.entropy_mode = entropy_mode;
        self
    }

    pub fn with_frame_reordering(mut self, allow: bool) -> Self {
        self.allow_frame_reordering = allow;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Configuration(format!(
                "encoder dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CaptureError::Configuration(format!(
                "4:2:0 encoding needs even dimensions, got {}x{}",
                self.width, self.height
            )));
        }
        if self.bitrate_bps == 0 {
            return Err(CaptureError::Configuration("bitrate must be non-zero".into()));
        }
        Ok(())
    }
}
