// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-track writer settings and output-settings resolution.

use serde::{Deserialize, Serialize};

/// AAC preset used when audio compression is requested without an override.
pub const AAC_PRESET_BITRATE: u32 = 64_000;
pub const AAC_PRESET_SAMPLE_RATE: u32 = 44_100;
pub const AAC_PRESET_CHANNELS: u16 = 1;

/// Container-level output settings for one track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum OutputSettings {
    Aac {
        bitrate: u32,
        sample_rate: u32,
        channels: u16,
    },
    H264 {
        width: u32,
        height: u32,
        allow_frame_reordering: bool,
    },
}

impl OutputSettings {
    pub fn aac_preset() -> Self {
        OutputSettings::Aac {
            bitrate: AAC_PRESET_BITRATE,
            sample_rate: AAC_PRESET_SAMPLE_RATE,
            channels: AAC_PRESET_CHANNELS,
        }
    }

    pub fn h264_preset(width: u32, height: u32) -> Self {
        OutputSettings::H264 {
            width,
            height,
            allow_frame_reordering: true,
        }
    }
}

/// Caller intent for one track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterSettings {
    pub compress: bool,
    /// Takes priority over `compress` when present.
    pub output_settings: Option<OutputSettings>,
}

impl WriterSettings {
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn compressed() -> Self {
        Self {
            compress: true,
            output_settings: None,
        }
    }

    pub fn with_output_settings(mut self, settings: OutputSettings) -> Self {
        self.output_settings = Some(settings);
        self
    }

    /// Override, else the AAC preset when compressing, else passthrough.
    pub fn resolve_audio(&self) -> Option<OutputSettings> {
        if let Some(settings) = &self.output_settings {
            return Some(settings.clone());
        }
        self.compress.then(OutputSettings::aac_preset)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoWriterSettings {
    pub basic: WriterSettings,
    pub width: u32,
    pub height: u32,
}

impl VideoWriterSettings {
    pub fn new(compress: bool, width: u32, height: u32) -> Self {
        Self {
            basic: WriterSettings {
                compress,
                output_settings: None,
            },
            width,
            height,
        }
    }

    pub fn with_output_settings(mut self, settings: OutputSettings) -> Self {
        self.basic.output_settings = Some(settings);
        self
    }

    /// Override, else the H.264 preset at the declared size, else passthrough.
    pub fn resolve(&self) -> Option<OutputSettings> {
        if let Some(settings) = &self.basic.output_settings {
            return Some(settings.clone());
        }
        self.basic
            .compress
            .then(|| OutputSettings::h264_preset(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_beats_compress_flag() {
        let custom = OutputSettings::Aac {
            bitrate: 128_000,
            sample_rate: 48_000,
            channels: 2,
        };
        let settings = WriterSettings::passthrough().with_output_settings(custom.clone());
        assert_eq!(settings.resolve_audio(), Some(custom));

        let video = VideoWriterSettings::new(true, 1920, 1080)
            .with_output_settings(OutputSettings::h264_preset(640, 480));
        assert_eq!(video.resolve(), Some(OutputSettings::h264_preset(640, 480)));
    }

    #[test]
    fn compress_flag_selects_presets() {
        assert_eq!(
            WriterSettings::compressed().resolve_audio(),
            Some(OutputSettings::Aac {
                bitrate: 64_000,
                sample_rate: 44_100,
                channels: 1
            })
        );
        assert_eq!(
            VideoWriterSettings::new(true, 1280, 720).resolve(),
            Some(OutputSettings::H264 {
                width: 1280,
                height: 720,
                allow_frame_reordering: true
            })
        );
    }

    #[test]
    fn passthrough_resolves_to_none() {
        assert_eq!(WriterSettings::passthrough().resolve_audio(), None);
        assert_eq!(VideoWriterSettings::new(false, 1280, 720).resolve(), None);
    }
}
