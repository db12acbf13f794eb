// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::writer_queue::WriterQueue;
use crate::core::sinks::{
    AssetWriterFactory, FileSink, SinkStatus, StatusCallback, StatusInfo, VideoWriterSettings,
    WriterSettings,
};
use crate::core::sources::{CaptureOutput, SessionPreset};
use crate::core::{CaptureError, Result, TimedSample};

const DEFAULT_FILE_NAME: &str = "recording.mov";

/// Where and how recordings are written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub file_name: String,
    pub compress_audio: bool,
    pub compress_video: bool,
    /// Current capture geometry; updated from the video source.
    pub video_dimensions: Option<(u32, u32)>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::document_dir().unwrap_or_else(std::env::temp_dir),
            file_name: DEFAULT_FILE_NAME.to_string(),
            compress_audio: true,
            compress_video: true,
            video_dimensions: None,
        }
    }
}

impl RecordingConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn with_compression(mut self, audio: bool, video: bool) -> Self {
        self.compress_audio = audio;
        self.compress_video = video;
        self
    }

    pub fn with_video_dimensions(mut self, width: u32, height: u32) -> Self {
        self.video_dimensions = Some((width, height));
        self
    }
}

/// Identifies one recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingHandle(u64);

impl RecordingHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Start/stop toggle owning at most one active [`FileSink`].
///
/// All sink work runs on a single [`WriterQueue`]; appends from any thread
/// are executed in submission order and `stop` is queued behind them.
pub struct RecordingController {
    config: Mutex<RecordingConfig>,
    factory: Arc<dyn AssetWriterFactory>,
    queue: WriterQueue,
    active: Arc<Mutex<Option<RecordingHandle>>>,
    next_id: AtomicU64,
    listener: Option<StatusCallback>,
    span: tracing::Span,
}

impl RecordingController {
    pub fn new(config: RecordingConfig, factory: Arc<dyn AssetWriterFactory>) -> Result<Self> {
        Ok(Self {
            config: Mutex::new(config),
            factory,
            queue: WriterQueue::spawn("avcapture-writer")?,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            listener: None,
            span: tracing::info_span!("recording_controller"),
        })
    }

    /// Receive every sink status notification.
    pub fn with_listener(mut self, listener: StatusCallback) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> RecordingConfig {
        self.config.lock().clone()
    }

    pub fn set_video_dimensions(&self, width: u32, height: u32) {
        self.config.lock().video_dimensions = Some((width, height));
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn active_handle(&self) -> Option<RecordingHandle> {
        *self.active.lock()
    }

    /// Toggle recording using the configured output path and track settings.
    ///
    /// Turning recording on while already on is a no-op, as is turning it
    /// off while off.
    pub fn set_recording(&self, recording: bool) -> Result<()> {
        let _guard = self.span.enter();
        if !recording {
            if let Some(handle) = self.active_handle() {
                self.stop(handle);
            }
            return Ok(());
        }
        if self.is_recording() {
            tracing::debug!("Already recording");
            return Ok(());
        }

        let config = self.config();
        let path = recording_file_path(&config.output_dir, &config.file_name).ok_or_else(|| {
            CaptureError::Writer(format!(
                "could not prepare {}",
                config.output_dir.join(&config.file_name).display()
            ))
        })?;
        let (width, height) = config
            .video_dimensions
            .unwrap_or_else(|| SessionPreset::default().dimensions());
        let audio = if config.compress_audio {
            WriterSettings::compressed()
        } else {
            WriterSettings::passthrough()
        };
        let video = VideoWriterSettings::new(config.compress_video, width, height);

        self.start(path, Some(video), Some(audio)).map(|_| ())
    }

    /// Open a new recording at `path`. Any active recording is finished
    /// silently first.
    pub fn start(
        &self,
        path: impl Into<PathBuf>,
        video: Option<VideoWriterSettings>,
        audio: Option<WriterSettings>,
    ) -> Result<RecordingHandle> {
        let _guard = self.span.enter();
        let handle = RecordingHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        if let Some(previous) = self.active.lock().take() {
            tracing::warn!(id = previous.id(), "Starting a recording over an active one");
            self.queue.finish(previous.id(), true);
        }

        let callback = self.status_callback(handle);
        let sink = FileSink::new(path, audio, video, self.factory.as_ref(), callback);
        if sink.has_failed() {
            return Err(CaptureError::Writer(format!(
                "failed to open {}",
                sink.path().display()
            )));
        }

        tracing::info!(id = handle.id(), path = %sink.path().display(), "Recording started");
        *self.active.lock() = Some(handle);
        self.queue.install(handle.id(), sink);
        Ok(handle)
    }

    /// Queue `sample` for the recording identified by `handle`.
    pub fn append(&self, handle: RecordingHandle, sample: TimedSample) {
        self.queue.append(handle.id(), sample);
    }

    /// Finish the recording once every previously queued sample is written.
    pub fn stop(&self, handle: RecordingHandle) {
        let _guard = self.span.enter();
        {
            let mut active = self.active.lock();
            if *active != Some(handle) {
                tracing::debug!(id = handle.id(), "Stop for an inactive recording ignored");
                return;
            }
            *active = None;
        }
        tracing::info!(id = handle.id(), "Recording stopping");
        self.queue.finish(handle.id(), false);
    }

    /// Block until every queued append and stop has executed.
    pub fn flush(&self) {
        self.queue.flush();
    }

    // Failures clear the active handle before the listener hears about them.
    fn status_callback(&self, handle: RecordingHandle) -> StatusCallback {
        let active = Arc::clone(&self.active);
        let listener = self.listener.clone();
        Arc::new(move |status: SinkStatus, info: &StatusInfo| {
            if status.is_failure() {
                let mut active = active.lock();
                if *active == Some(handle) {
                    *active = None;
                }
                tracing::error!(id = handle.id(), %status, info = %info.to_json(), "Recording failed");
            }
            if let Some(listener) = &listener {
                listener(status, info);
            }
        })
    }
}

impl CaptureOutput for RecordingController {
    fn on_sample(&self, sample: TimedSample) {
        if let Some(handle) = self.active_handle() {
            self.append(handle, sample);
        }
    }

    fn on_video_geometry(&self, width: u32, height: u32) {
        tracing::debug!(parent: &self.span, width, height, "Video geometry updated");
        self.set_video_dimensions(width, height);
    }
}

/// `dir/name`, with any existing file there removed. `None` when the old file
/// cannot be removed.
pub fn recording_file_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed previous recording");
            Some(path)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(path),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to remove previous recording");
            None
        }
    }
}
