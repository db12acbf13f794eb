// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Video capture source
//
// Negotiates a camera format from the capture options, announces the final
// geometry, then forwards frames either untouched (raw NV12 samples) or
// through a HardwareEncoder. Encoder output is delivered from the encoder's
// own callback thread, not the delivery thread.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

use super::capture_source::{CaptureOutput, CaptureSource, DeliveryThread};
use super::device::{CaptureDevice, CaptureSession, DeviceBuffer, DeviceFormat};
use super::options::{CaptureOption, CaptureOptions};
use crate::core::codec::{
    default_session_factory, BitrateMeasure, CompressionSessionFactory, EncodedOutputHandler,
    EncoderConfig, HardwareEncoder, ParameterSets, ParameterSetsHandler,
};
use crate::core::format::{FormatDescription, PixelFormat, VideoFormatDescription};
use crate::core::{CaptureError, MediaKind, Result, TimedSample};

/// Format chosen for the active device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedVideo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub pixel_format: PixelFormat,
}

pub struct VideoCaptureSource {
    options: CaptureOptions,
    output: Option<Arc<dyn CaptureOutput>>,
    device: Option<Arc<dyn CaptureDevice>>,
    negotiated: Option<NegotiatedVideo>,
    session_factory: Arc<dyn CompressionSessionFactory>,
    parameter_sets: Arc<OnceLock<ParameterSets>>,
    delivery: Option<DeliveryThread>,
    span: tracing::Span,
}

impl Default for VideoCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoCaptureSource {
    pub fn new() -> Self {
        Self::with_session_factory(default_session_factory())
    }

    /// Use `factory` for the hardware encoder instead of the platform default.
    pub fn with_session_factory(factory: Arc<dyn CompressionSessionFactory>) -> Self {
        Self {
            options: CaptureOptions::default(),
            output: None,
            device: None,
            negotiated: None,
            session_factory: factory,
            parameter_sets: Arc::new(OnceLock::new()),
            delivery: None,
            span: tracing::info_span!("video_capture"),
        }
    }

    pub fn negotiated(&self) -> Option<NegotiatedVideo> {
        self.negotiated
    }

    /// Parameter sets published by the current encoder, once available.
    pub fn parameter_sets(&self) -> Option<&ParameterSets> {
        self.parameter_sets.get()
    }

    pub fn is_running(&self) -> bool {
        self.delivery.is_some()
    }

    fn build_encoder(
        &mut self,
        negotiated: NegotiatedVideo,
        output: Option<Arc<dyn CaptureOutput>>,
    ) -> Option<HardwareEncoder> {
        let config = EncoderConfig::new(negotiated.width, negotiated.height)
            .with_bitrate(self.options.video_bitrate)
            .with_fps(negotiated.frame_rate);

        let measure = Mutex::new(BitrateMeasure::new());
        let span = self.span.clone();
        let on_encoded: EncodedOutputHandler = Arc::new(move |sample, _status, _flags| {
            if let Some(bps) = measure.lock().add(sample.pts(), sample.payload().len()) {
                tracing::info!(parent: &span, bps, "Measured first-second encoded bitrate");
            }
            if let Some(output) = &output {
                output.on_sample(sample);
            }
        });

        // A fresh encoder publishes its own parameter sets.
        self.parameter_sets = Arc::new(OnceLock::new());
        let cache = Arc::clone(&self.parameter_sets);
        let on_parameter_sets: ParameterSetsHandler = Arc::new(move |sets| {
            let _ = cache.set(sets.clone());
        });

        let encoder = HardwareEncoder::new(
            config,
            self.session_factory.as_ref(),
            on_encoded,
            Some(on_parameter_sets),
        );
        if encoder.is_inert() {
            tracing::warn!(parent: &self.span, "Hardware encoder unavailable, recording raw video");
            return None;
        }
        Some(encoder)
    }
}

/// Choose a device format for `options`.
///
/// Explicit dimensions and frame rate win when the device supports them;
/// otherwise the session preset decides, and failing that the device's first
/// video format.
pub fn negotiate_video_format(
    formats: &[DeviceFormat],
    options: &CaptureOptions,
) -> Option<NegotiatedVideo> {
    let preset = options.session_preset;
    let supports = |format: &DeviceFormat, (w, h): (u32, u32), fps: u32| match *format {
        DeviceFormat::Video {
            width,
            height,
            max_frame_rate,
            pixel_format,
        } if width == w && height == h && fps <= max_frame_rate => Some(NegotiatedVideo {
            width,
            height,
            frame_rate: fps,
            pixel_format,
        }),
        _ => None,
    };

    if options.frame_dimensions.is_some() || options.frame_rate.is_some() {
        let dims = options.frame_dimensions.unwrap_or(preset.dimensions());
        let fps = options.frame_rate.unwrap_or(preset.frame_rate());
        if let Some(found) = formats.iter().find_map(|f| supports(f, dims, fps)) {
            return Some(found);
        }
        tracing::debug!(?dims, fps, "Requested video format unsupported, falling back to preset");
    }

    if let Some(found) = formats
        .iter()
        .find_map(|f| supports(f, preset.dimensions(), preset.frame_rate()))
    {
        return Some(found);
    }

    formats.iter().find_map(|format| match *format {
        DeviceFormat::Video {
            width,
            height,
            max_frame_rate,
            pixel_format,
        } => Some(NegotiatedVideo {
            width,
            height,
            frame_rate: max_frame_rate.min(preset.frame_rate()).max(1),
            pixel_format,
        }),
        DeviceFormat::Audio { .. } => None,
    })
}

impl CaptureSource for VideoCaptureSource {
    fn media_kind(&self) -> MediaKind {
        MediaKind::Video
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
        let span = self.span.clone();
        let _guard = span.enter();
        let Some(device) = session.default_device(MediaKind::Video) else {
            tracing::warn!("No video capture device available");
            return Ok(false);
        };

        let negotiated = negotiate_video_format(&device.supported_formats(), &self.options)
            .ok_or_else(|| {
                CaptureError::Device(format!("{} offers no video format", device.name()))
            })?;
        device.activate(&DeviceFormat::Video {
            width: negotiated.width,
            height: negotiated.height,
            max_frame_rate: negotiated.frame_rate,
            pixel_format: negotiated.pixel_format,
        })?;
        session.attach(device.as_ref());

        tracing::info!(
            device = device.name(),
            width = negotiated.width,
            height = negotiated.height,
            fps = negotiated.frame_rate,
            encode = self.options.encode_video,
            "Video source configured"
        );
        self.negotiated = Some(negotiated);
        self.device = Some(device);
        Ok(true)
    }

    fn start(&mut self) -> Result<()> {
        if self.delivery.is_some() {
            return Ok(());
        }
        let (Some(device), Some(negotiated)) = (self.device.clone(), self.negotiated) else {
            return Err(CaptureError::InvalidState("video source not configured".into()));
        };
        let output = self.output.clone();

        if let Some(output) = &output {
            output.on_video_geometry(negotiated.width, negotiated.height);
        }

        let mut encoder = if self.options.encode_video {
            self.build_encoder(negotiated, output.clone())
        } else {
            None
        };

        let raw_format = Arc::new(FormatDescription::Video(VideoFormatDescription::raw(
            negotiated.pixel_format,
            negotiated.width,
            negotiated.height,
        )));
        let span = self.span.clone();
        // The handler owns the encoder; dropping it at thread exit flushes and closes it.
        let delivery = DeliveryThread::spawn("avcapture-video-delivery", move |buffer| {
            let _guard = span.enter();
            let DeviceBuffer::Video { frame, timing } = buffer else {
                tracing::warn!("Video source received an audio buffer, ignoring");
                return;
            };

            if let Some(encoder) = encoder.as_mut() {
                encoder.encode(&frame, timing);
                return;
            }

            let Some(output) = &output else {
                return;
            };
            match TimedSample::new(
                MediaKind::Video,
                timing,
                frame.data,
                Some(Arc::clone(&raw_format)),
            ) {
                Ok(sample) => output.on_sample(sample),
                Err(e) => tracing::debug!(error = %e, "Dropping empty video frame"),
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
        self.negotiated = None;
    }

    fn stop(&mut self) {
        let Some(mut delivery) = self.delivery.take() else {
            return;
        };
        if let Some(device) = &self.device {
            device.stop();
        }
        delivery.shutdown();
        tracing::debug!(parent: &self.span, "Video source stopped");
    }
}
