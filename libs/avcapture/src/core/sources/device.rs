// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capture device seam and the capture session devices attach to.

use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::core::format::PixelFormat;
use crate::core::sample::{SampleTiming, VideoFrame};
use crate::core::{MediaKind, Result, TimedSample};

/// A format a device can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFormat {
    Video {
        width: u32,
        height: u32,
        max_frame_rate: u32,
        pixel_format: PixelFormat,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        bits_per_channel: u16,
    },
}

impl DeviceFormat {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            DeviceFormat::Video { .. } => MediaKind::Video,
            DeviceFormat::Audio { .. } => MediaKind::Audio,
        }
    }
}

/// One buffer handed from a device to its capture source.
#[derive(Debug, Clone)]
pub enum DeviceBuffer {
    Video {
        frame: VideoFrame,
        timing: SampleTiming,
    },
    Audio(TimedSample),
}

/// A live camera or microphone.
///
/// Devices push buffers into the channel given to [`start`](Self::start)
/// from their own thread until [`stop`](Self::stop) returns, after which
/// they hold no clone of the sender.
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    fn media_kind(&self) -> MediaKind;

    fn supported_formats(&self) -> Vec<DeviceFormat>;

    /// Select a format; returns what the device actually negotiated.
    fn activate(&self, format: &DeviceFormat) -> Result<DeviceFormat>;

    fn start(&self, delivery: Sender<DeviceBuffer>) -> Result<()>;

    /// Stop delivering. Blocks until the device thread has exited.
    fn stop(&self);
}

/// The set of devices available to and attached to a capture pipeline.
#[derive(Default)]
pub struct CaptureSession {
    devices: Vec<Arc<dyn CaptureDevice>>,
    attached: Vec<String>,
    running: bool,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Arc<dyn CaptureDevice>) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&mut self, device: Arc<dyn CaptureDevice>) {
        self.devices.push(device);
    }

    /// First registered device of `kind`.
    pub fn default_device(&self, kind: MediaKind) -> Option<Arc<dyn CaptureDevice>> {
        self.devices
            .iter()
            .find(|device| device.media_kind() == kind)
            .cloned()
    }

    pub fn attach(&mut self, device: &dyn CaptureDevice) {
        let name = device.name().to_string();
        if !self.attached.contains(&name) {
            tracing::debug!(device = %name, "Device attached to session");
            self.attached.push(name);
        }
    }

    pub fn detach(&mut self, device: &dyn CaptureDevice) {
        self.attached.retain(|name| name != device.name());
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }
}
