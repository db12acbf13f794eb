// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synthetic capture devices.
//!
//! [`TestPatternCamera`] produces NV12 colour bars and [`TestToneMicrophone`]
//! a 16-bit PCM sine tone. Both run their own generator thread, paced to real
//! time by default, so the pipeline can be exercised without hardware.

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::f64::consts::PI;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::device::{CaptureDevice, DeviceBuffer, DeviceFormat};
use crate::core::format::{AudioFormatDescription, FormatDescription, PixelFormat};
use crate::core::sample::{SampleTiming, VideoFrame};
use crate::core::{CaptureError, MediaKind, MediaTime, Result, TimedSample};

// ============================================================================
// GENERATOR LOOP
// ============================================================================

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct DeviceState {
    active: Option<DeviceFormat>,
    worker: Option<Worker>,
}

#[derive(Clone, Copy)]
struct Pacing {
    interval: Duration,
    paced: bool,
    max_buffers: Option<u64>,
}

/// Run `produce` on a named thread until shutdown, the buffer limit, or the
/// receiving side going away.
fn spawn_generator<F>(
    thread_name: &str,
    pacing: Pacing,
    delivery: Sender<DeviceBuffer>,
    mut produce: F,
) -> Result<Worker>
where
    F: FnMut(u64) -> Option<DeviceBuffer> + Send + 'static,
{
    let (shutdown, shutdown_rx) = bounded::<()>(1);
    let handle = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let mut next_buffer_time = Instant::now();
            let mut index = 0u64;

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                if pacing.max_buffers.is_some_and(|max| index >= max) {
                    break;
                }

                if pacing.paced {
                    let now = Instant::now();
                    if now < next_buffer_time {
                        std::thread::sleep(next_buffer_time - now);
                    }
                }

                let Some(buffer) = produce(index) else {
                    break;
                };
                if delivery.send(buffer).is_err() {
                    tracing::debug!("Delivery channel closed, generator exiting");
                    break;
                }
                index += 1;

                next_buffer_time += pacing.interval;
                if pacing.paced && Instant::now() > next_buffer_time + pacing.interval {
                    tracing::warn!("Generator running behind schedule");
                    next_buffer_time = Instant::now();
                }
            }
            tracing::debug!(buffers = index, "Generator stopped");
        })
        .map_err(|e| CaptureError::Device(format!("failed to spawn generator thread: {}", e)))?;

    Ok(Worker { shutdown, handle })
}

fn stop_worker(state: &Mutex<DeviceState>) {
    let worker = state.lock().worker.take();
    if let Some(worker) = worker {
        let _ = worker.shutdown.try_send(());
        if worker.handle.join().is_err() {
            tracing::error!("Generator thread panicked");
        }
    }
}

fn activate_from(
    name: &str,
    formats: &[DeviceFormat],
    state: &Mutex<DeviceState>,
    requested: &DeviceFormat,
) -> Result<DeviceFormat> {
    // Video formats may be activated at any frame rate up to their maximum.
    let supported = formats.iter().any(|format| match (format, requested) {
        (
            DeviceFormat::Video {
                width,
                height,
                max_frame_rate,
                pixel_format,
            },
            DeviceFormat::Video {
                width: w,
                height: h,
                max_frame_rate: rate,
                pixel_format: p,
            },
        ) => width == w && height == h && pixel_format == p && (1..=*max_frame_rate).contains(rate),
        (supported, requested) => supported == requested,
    });
    if !supported {
        return Err(CaptureError::Device(format!(
            "{} does not support {:?}",
            name, requested
        )));
    }
    state.lock().active = Some(*requested);
    Ok(*requested)
}

// ============================================================================
// TEST PATTERN CAMERA
// ============================================================================

/// Y, Cb, Cr for the eight classic colour bars.
const BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

pub struct TestPatternCamera {
    name: String,
    formats: Vec<DeviceFormat>,
    paced: bool,
    max_frames: Option<u64>,
    state: Mutex<DeviceState>,
}

impl Default for TestPatternCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPatternCamera {
    pub fn new() -> Self {
        let formats = [(640, 480), (1280, 720), (1920, 1080)]
            .into_iter()
            .map(|(width, height)| DeviceFormat::Video {
                width,
                height,
                max_frame_rate: 30,
                pixel_format: PixelFormat::Nv12,
            })
            .collect();
        Self {
            name: "Test Pattern Camera".to_string(),
            formats,
            paced: true,
            max_frames: None,
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn with_formats(mut self, formats: Vec<DeviceFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Stop by itself after `frames` frames.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Generate as fast as the consumer accepts.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// NV12 colour bars, scrolled horizontally by `index` pixels.
    pub fn render_frame(width: u32, height: u32, index: u64) -> Bytes {
        let (w, h) = (width as usize, height as usize);
        let bar_width = (w / BARS.len()).max(1);
        let bar_at = |x: usize| BARS[((x + index as usize) / bar_width) % BARS.len()];

        let mut data = BytesMut::with_capacity(PixelFormat::Nv12.frame_size(width, height));
        for _ in 0..h {
            for x in 0..w {
                data.put_u8(bar_at(x).0);
            }
        }
        for _ in 0..h / 2 {
            for x in (0..w).step_by(2) {
                let (_, cb, cr) = bar_at(x);
                data.put_u8(cb);
                data.put_u8(cr);
            }
        }
        data.freeze()
    }
}

impl CaptureDevice for TestPatternCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn supported_formats(&self) -> Vec<DeviceFormat> {
        self.formats.clone()
    }

    fn activate(&self, format: &DeviceFormat) -> Result<DeviceFormat> {
        activate_from(&self.name, &self.formats, &self.state, format)
    }

    fn start(&self, delivery: Sender<DeviceBuffer>) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            return Err(CaptureError::InvalidState(format!("{} already started", self.name)));
        }
        let Some(DeviceFormat::Video {
            width,
            height,
            max_frame_rate,
            pixel_format,
        }) = state.active
        else {
            return Err(CaptureError::Device(format!("{} has no active video format", self.name)));
        };
        let fps = max_frame_rate.max(1);

        let pacing = Pacing {
            interval: Duration::from_secs_f64(1.0 / fps as f64),
            paced: self.paced,
            max_buffers: self.max_frames,
        };
        let worker = spawn_generator("avcapture-test-camera", pacing, delivery, move |index| {
            let data = Self::render_frame(width, height, index);
            let frame = match VideoFrame::new(width, height, pixel_format, data) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "Test pattern frame rejected");
                    return None;
                }
            };
            let timing = SampleTiming::new(MediaTime::new(index as i64, fps))
                .with_duration(MediaTime::new(1, fps));
            Some(DeviceBuffer::Video { frame, timing })
        })?;
        state.worker = Some(worker);

        tracing::info!(device = %self.name, width, height, fps, "Camera started");
        Ok(())
    }

    fn stop(&self) {
        stop_worker(&self.state);
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        stop_worker(&self.state);
    }
}

// ============================================================================
// TEST TONE MICROPHONE
// ============================================================================

pub struct TestToneMicrophone {
    name: String,
    formats: Vec<DeviceFormat>,
    frequency: f64,
    amplitude: f64,
    paced: bool,
    max_buffers: Option<u64>,
    state: Mutex<DeviceState>,
}

impl Default for TestToneMicrophone {
    fn default() -> Self {
        Self::new(440.0, 0.5)
    }
}

impl TestToneMicrophone {
    /// Frames per delivered buffer.
    pub const BUFFER_FRAMES: u32 = 1024;

    pub fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            name: "Test Tone Microphone".to_string(),
            formats: vec![
                DeviceFormat::Audio {
                    sample_rate: 44_100,
                    channels: 1,
                    bits_per_channel: 16,
                },
                DeviceFormat::Audio {
                    sample_rate: 48_000,
                    channels: 2,
                    bits_per_channel: 16,
                },
            ],
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            paced: true,
            max_buffers: None,
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn with_max_buffers(mut self, buffers: u64) -> Self {
        self.max_buffers = Some(buffers);
        self
    }

    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl CaptureDevice for TestToneMicrophone {
    fn name(&self) -> &str {
        &self.name
    }

    fn media_kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn supported_formats(&self) -> Vec<DeviceFormat> {
        self.formats.clone()
    }

    fn activate(&self, format: &DeviceFormat) -> Result<DeviceFormat> {
        activate_from(&self.name, &self.formats, &self.state, format)
    }

    fn start(&self, delivery: Sender<DeviceBuffer>) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            return Err(CaptureError::InvalidState(format!("{} already started", self.name)));
        }
        let Some(DeviceFormat::Audio {
            sample_rate,
            channels,
            ..
        }) = state.active
        else {
            return Err(CaptureError::Device(format!("{} has no active audio format", self.name)));
        };

        let format = Arc::new(FormatDescription::Audio(AudioFormatDescription::linear_pcm(
            sample_rate,
            channels,
            16,
        )));
        let frames = Self::BUFFER_FRAMES;
        let phase_increment = 2.0 * PI * self.frequency / sample_rate as f64;
        let amplitude = self.amplitude;
        let mut phase = 0.0f64;

        let pacing = Pacing {
            interval: Duration::from_secs_f64(frames as f64 / sample_rate as f64),
            paced: self.paced,
            max_buffers: self.max_buffers,
        };
        let worker = spawn_generator("avcapture-test-tone", pacing, delivery, move |index| {
            let mut pcm = BytesMut::with_capacity(frames as usize * channels as usize * 2);
            for _ in 0..frames {
                let value = (phase.sin() * amplitude * i16::MAX as f64) as i16;
                for _ in 0..channels {
                    pcm.put_i16_le(value);
                }
                phase += phase_increment;
                if phase >= 2.0 * PI {
                    phase -= 2.0 * PI;
                }
            }

            let start = index as i64 * frames as i64;
            let timing = SampleTiming::new(MediaTime::new(start, sample_rate))
                .with_duration(MediaTime::new(frames as i64, sample_rate));
            match TimedSample::new(MediaKind::Audio, timing, pcm.freeze(), Some(format.clone())) {
                Ok(sample) => Some(DeviceBuffer::Audio(sample)),
                Err(e) => {
                    tracing::error!(error = %e, "Test tone buffer rejected");
                    None
                }
            }
        })?;
        state.worker = Some(worker);

        tracing::info!(device = %self.name, sample_rate, channels, "Microphone started");
        Ok(())
    }

    fn stop(&self) {
        stop_worker(&self.state);
    }
}

impl Drop for TestToneMicrophone {
    fn drop(&mut self) {
        stop_worker(&self.state);
    }
}
