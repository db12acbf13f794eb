// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{CaptureError, Result};
use super::logging::LoggingConfig;
use super::recording::RecordingConfig;
use super::sources::CaptureOptions;

/// Top-level pipeline configuration, usually loaded from TOML.
///
/// ```toml
/// [logging]
/// default_directive = "avcapture=debug,info"
///
/// [capture]
/// encode_video = true
/// session_preset = "hd1280x720"
///
/// [recording]
/// output_dir = "/tmp/takes"
/// compress_audio = false
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub logging: LoggingConfig,
    pub capture: CaptureOptions,
    pub recording: RecordingConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| CaptureError::Configuration(format!("invalid pipeline config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| CaptureError::Configuration(format!("cannot serialize config: {}", e)))
    }
}
