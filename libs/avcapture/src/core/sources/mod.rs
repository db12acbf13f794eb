// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Live capture: devices, sources and the service that drives them.

mod audio_capture;
mod capture_source;
mod device;
mod options;
mod service;
mod test_devices;
mod video_capture;

pub use audio_capture::AudioCaptureSource;
pub use capture_source::{CaptureOutput, CaptureSource};
pub use device::{CaptureDevice, CaptureSession, DeviceBuffer, DeviceFormat};
pub use options::{CaptureOption, CaptureOptions, SessionPreset};
pub use service::CaptureService;
pub use test_devices::{TestPatternCamera, TestToneMicrophone};
pub use video_capture::{negotiate_video_format, NegotiatedVideo, VideoCaptureSource};
