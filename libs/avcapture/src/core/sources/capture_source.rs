// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::device::{CaptureSession, DeviceBuffer};
use super::options::{CaptureOption, CaptureOptions};
use crate::core::{CaptureError, MediaKind, Result, TimedSample};

/// Buffers a device may queue ahead of its source's delivery thread.
pub(super) const DELIVERY_QUEUE_DEPTH: usize = 16;

/// Data delegate fed by capture sources.
///
/// Each source calls in from its own delivery thread, so audio and video
/// callbacks may run concurrently with each other, but never concurrently
/// for the same source.
pub trait CaptureOutput: Send + Sync {
    fn on_sample(&self, sample: TimedSample);

    /// Final video geometry, reported once per configuration before the first
    /// video sample.
    fn on_video_geometry(&self, _width: u32, _height: u32) {}
}

/// One live feed (camera or microphone) and its delivery thread.
pub trait CaptureSource: Send {
    fn media_kind(&self) -> MediaKind;

    fn options(&self) -> &CaptureOptions;

    fn set_options(&mut self, options: CaptureOptions);

    fn apply_option(&mut self, option: CaptureOption);

    fn set_output(&mut self, output: Arc<dyn CaptureOutput>);

    /// Pick and activate a device from `session`. Returns `false` when no
    /// device of this kind is available.
    fn configure(&mut self, session: &mut CaptureSession) -> Result<bool>;

    fn start(&mut self) -> Result<()>;

    /// Stop and release the device so the source can be configured again.
    fn reset(&mut self, session: &mut CaptureSession);

    fn stop(&mut self);
}

/// Serial delivery queue owned by one capture source.
pub(super) struct DeliveryThread {
    sender: Option<Sender<DeviceBuffer>>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryThread {
    /// Spawn a named thread that hands every buffer to `handler`, in order,
    /// until all senders are dropped. `handler` is dropped on that thread.
    pub fn spawn<F>(name: &str, mut handler: F) -> Result<Self>
    where
        F: FnMut(DeviceBuffer) + Send + 'static,
    {
        let (sender, receiver): (Sender<DeviceBuffer>, Receiver<DeviceBuffer>) =
            bounded(DELIVERY_QUEUE_DEPTH);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for buffer in receiver.iter() {
                    handler(buffer);
                }
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> Option<Sender<DeviceBuffer>> {
        self.sender.clone()
    }

    /// Drain queued buffers and join. The device must already be stopped.
    pub fn shutdown(&mut self) {
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            tracing::error!("Delivery thread panicked");
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
