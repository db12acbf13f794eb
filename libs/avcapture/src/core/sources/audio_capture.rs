// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::capture_source::{CaptureOutput, CaptureSource, DeliveryThread};
use super::device::{CaptureDevice, CaptureSession, DeviceBuffer};
use super::options::{CaptureOption, CaptureOptions};
use crate::core::{CaptureError, MediaKind, Result};

/// Microphone feed. Samples pass through untouched.
pub struct AudioCaptureSource {
    options: CaptureOptions,
    output: Option<Arc<dyn CaptureOutput>>,
    device: Option<Arc<dyn CaptureDevice>>,
    delivery: Option<DeliveryThread>,
    span: tracing::Span,
}

impl Default for AudioCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCaptureSource {
    pub fn new() -> Self {
        Self {
            options: CaptureOptions::default(),
            output: None,
            device: None,
            delivery: None,
            span: tracing::info_span!("audio_capture"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.delivery.is_some()
    }
}

impl CaptureSource for AudioCaptureSource {
    fn media_kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn options(&self) -> &CaptureOptions {
        &self.options
    }

    fn set_options(&mut self, options: CaptureOptions) {
        self.options = options;
    }

    fn apply_option(&mut self, option: CaptureOption) {
        self.options.apply(option);
    }

    fn set_output(&mut self, output: Arc<dyn CaptureOutput>) {
        self.output = Some(output);
    }

    fn configure(&mut self, session: &mut CaptureSession) -> Result<bool> {
        let _guard = self.span.enter();
        let Some(device) = session.default_device(MediaKind::Audio) else {
            tracing::warn!("No audio capture device available");
            return Ok(false);
        };

        let format = device
            .supported_formats()
            .into_iter()
            .next()
            .ok_or_else(|| CaptureError::Device(format!("{} reports no formats", device.name())))?;
        let negotiated = device.activate(&format)?;
        session.attach(device.as_ref());

        tracing::info!(device = device.name(), format = ?negotiated, "Audio source configured");
        self.device = Some(device);
        Ok(true)
    }

    fn start(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        if self.delivery.is_some() {
            return Ok(());
        }
        let device = self
            .device
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("audio source not configured".into()))?;
        let output = self.output.clone();

        let span = self.span.clone();
        let delivery = DeliveryThread::spawn("avcapture-audio-delivery", move |buffer| {
            let _guard = span.enter();
            match buffer {
                DeviceBuffer::Audio(sample) => {
                    if let Some(output) = &output {
                        output.on_sample(sample);
                    }
                }
                DeviceBuffer::Video { .. } => {
                    tracing::warn!("Audio source received a video buffer, ignoring");
                }
            }
        })?;

        let Some(sender) = delivery.sender() else {
            return Err(CaptureError::InvalidState("delivery queue closed".into()));
        };
        device.start(sender)?;
        self.delivery = Some(delivery);
        Ok(())
    }

    fn reset(&mut self, session: &mut CaptureSession) {
        self.stop();
        if let Some(device) = self.device.take() {
            session.detach(device.as_ref());
        }
    }

    fn stop(&mut self) {
        let Some(mut delivery) = self.delivery.take() else {
            return;
        };
        if let Some(device) = &self.device {
            device.stop();
        }
        delivery.shutdown();
        tracing::debug!(parent: &self.span, "Audio source stopped");
    }
}
