// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Platform-agnostic pipeline core.

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod media_time;
pub mod recording;
pub mod sample;
pub mod sinks;
pub mod sources;

pub use error::{CaptureError, Result};
pub use format::{FormatDescription, MediaKind};
pub use media_time::MediaTime;
pub use sample::{SampleTiming, TimedSample};
