// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// File sink
//
// Per-recording state machine in front of an `AssetWriter`:
//
//   Uninitialized --construct ok--> Initialized --first sample--> Writing
//   Uninitialized --construct fails--> InitFailed
//   Initialized/Writing --start or writer failure--> Failed
//   Writing --finish--> Finishing --completion--> Finished
//
// The sink is not synchronized. Exactly one thread (the recording
// controller's writer queue) may call into it.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::asset_writer::{AssetWriter, AssetWriterFactory, AssetWriterInput, FileType, WriterStatus};
use super::settings::{VideoWriterSettings, WriterSettings};
use crate::core::{MediaKind, MediaTime, Result, TimedSample};

/// Lifecycle of a [`FileSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WriterState {
    Uninitialized,
    Initialized,
    Writing,
    Finishing,
    Finished,
    InitFailed,
    Failed,
}

impl WriterState {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, WriterState::InitFailed | WriterState::Failed)
    }
}

/// Status notifications emitted through the [`StatusCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkStatus {
    Initialized,
    InitFailed,
    StartFailed,
    StatusFailed,
    Finished,
}

impl SinkStatus {
    /// Wire name of the status key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkStatus::Initialized => "initialized",
            SinkStatus::InitFailed => "initFailed",
            SinkStatus::StartFailed => "startFailed",
            SinkStatus::StatusFailed => "statusFailed",
            SinkStatus::Finished => "finished",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SinkStatus::InitFailed | SinkStatus::StartFailed | SinkStatus::StatusFailed
        )
    }
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload of a status notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_status: Option<WriterStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "fileURL", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
}

impl StatusInfo {
    /// The info map keyed by wire names, absent fields omitted.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn with_writer(&self, status: Option<WriterStatus>, error: Option<String>) -> Self {
        Self {
            writer_status: status,
            error,
            ..self.clone()
        }
    }
}

pub type StatusCallback = Arc<dyn Fn(SinkStatus, &StatusInfo) + Send + Sync>;

/// Per-kind sample accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackStats {
    pub accepted: u64,
    /// Strictly earlier than the last accepted sample of the same kind.
    pub late: u64,
    pub not_ready: u64,
    pub malformed: u64,
    pub pending_data: u64,
    pub no_track: u64,
    /// Earlier than the start of the writing session.
    pub before_session: u64,
    pub append_failed: u64,
}

impl TrackStats {
    /// Every sample that reached the sink but not the container.
    pub fn dropped(&self) -> u64 {
        self.late
            + self.not_ready
            + self.malformed
            + self.pending_data
            + self.no_track
            + self.before_session
            + self.append_failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub audio: TrackStats,
    pub video: TrackStats,
}

impl SinkStats {
    pub fn track(&self, kind: MediaKind) -> &TrackStats {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn track_mut(&mut self, kind: MediaKind) -> &mut TrackStats {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// One recording's output file.
pub struct FileSink {
    path: PathBuf,
    state: Arc<Mutex<WriterState>>,
    writer: Option<Box<dyn AssetWriter>>,
    audio_input: Option<Box<dyn AssetWriterInput>>,
    video_input: Option<Box<dyn AssetWriterInput>>,
    last_audio_pts: Option<MediaTime>,
    last_video_pts: Option<MediaTime>,
    session_start: Option<MediaTime>,
    finishing: bool,
    failure_reported: bool,
    info: StatusInfo,
    callback: StatusCallback,
    stats: SinkStats,
    span: tracing::Span,
}

impl FileSink {
    /// Create the container writer and its track inputs.
    ///
    /// Reports `Initialized` or `InitFailed` through `callback` before
    /// returning. A sink that failed to initialize ignores every later call.
    pub fn new(
        path: impl Into<PathBuf>,
        audio: Option<WriterSettings>,
        video: Option<VideoWriterSettings>,
        factory: &dyn AssetWriterFactory,
        callback: StatusCallback,
    ) -> Self {
        let path = path.into();
        let span = tracing::info_span!("file_sink", path = %path.display());

        let info = StatusInfo {
            file_path: Some(path.clone()),
            width: video.as_ref().map(|v| v.width),
            height: video.as_ref().map(|v| v.height),
            compress: video
                .as_ref()
                .map(|v| v.basic.compress)
                .or(audio.as_ref().map(|a| a.compress)),
            ..StatusInfo::default()
        };

        let mut sink = Self {
            path,
            state: Arc::new(Mutex::new(WriterState::Uninitialized)),
            writer: None,
            audio_input: None,
            video_input: None,
            last_audio_pts: None,
            last_video_pts: None,
            session_start: None,
            finishing: false,
            failure_reported: false,
            info,
            callback,
            stats: SinkStats::default(),
            span,
        };
        sink.initialize(audio, video, factory);
        sink
    }

    fn initialize(
        &mut self,
        audio: Option<WriterSettings>,
        video: Option<VideoWriterSettings>,
        factory: &dyn AssetWriterFactory,
    ) {
        let _guard = self.span.clone().entered();

        let result = open_writer(&self.path, audio.as_ref(), video.as_ref(), factory);

        match result {
            Ok((writer, audio_input, video_input)) => {
                let status = writer.status();
                self.writer = Some(writer);
                self.audio_input = audio_input;
                self.video_input = video_input;
                *self.state.lock() = WriterState::Initialized;
                tracing::info!(
                    audio = self.audio_input.is_some(),
                    video = self.video_input.is_some(),
                    "File sink initialized"
                );
                self.report(SinkStatus::Initialized, Some(status), None);
            }
            Err(e) => {
                *self.state.lock() = WriterState::InitFailed;
                tracing::error!(error = %e, "Failed to create container writer");
                self.failure_reported = true;
                self.report(SinkStatus::InitFailed, None, Some(e.to_string()));
            }
        }
    }

    /// Route one sample to its track. Never fails; rejected samples are
    /// dropped and counted.
    pub fn append(&mut self, sample: TimedSample) {
        if self.finishing {
            return;
        }
        let _guard = self.span.clone().entered();

        match self.state() {
            WriterState::Initialized | WriterState::Writing => {}
            WriterState::Uninitialized | WriterState::InitFailed => {
                tracing::error!("append on a sink that never initialized");
                return;
            }
            WriterState::Failed | WriterState::Finishing | WriterState::Finished => return,
        }

        let kind = sample.kind();
        let pts = sample.pts();

        if !sample.has_valid_format() {
            self.stats.track_mut(kind).malformed += 1;
            tracing::debug!(%kind, %pts, "Dropping sample with missing or mismatched format");
            return;
        }

        let last = match kind {
            MediaKind::Audio => self.last_audio_pts,
            MediaKind::Video => self.last_video_pts,
        };
        if let Some(last) = last.filter(|last| pts < *last) {
            self.stats.track_mut(kind).late += 1;
            tracing::debug!(%kind, %pts, %last, "Dropping out-of-order sample");
            return;
        }

        if !sample.is_data_ready() {
            self.stats.track_mut(kind).pending_data += 1;
            tracing::trace!(%kind, %pts, "Dropping sample whose data is not ready");
            return;
        }

        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        if writer.status() == WriterStatus::Unknown {
            if let Err(e) = writer.start_writing() {
                let status = writer.status();
                let error = writer.error().unwrap_or_else(|| e.to_string());
                *self.state.lock() = WriterState::Failed;
                tracing::error!(%error, "Failed to start writing");
                self.report_failure(SinkStatus::StartFailed, Some(status), Some(error));
                return;
            }
            writer.start_session(pts);
            self.session_start = Some(pts);
            *self.state.lock() = WriterState::Writing;
            tracing::info!(%pts, "Writing session started");
        }

        if self.check_writer_failed() {
            return;
        }

        if let Some(start) = self.session_start.filter(|start| pts < *start) {
            self.stats.track_mut(kind).before_session += 1;
            tracing::debug!(%kind, %pts, %start, "Dropping sample from before the session start");
            return;
        }

        let input = match kind {
            MediaKind::Audio => self.audio_input.as_mut(),
            MediaKind::Video => self.video_input.as_mut(),
        };
        let Some(input) = input else {
            self.stats.track_mut(kind).no_track += 1;
            tracing::trace!(%kind, "No track for sample kind, dropping");
            return;
        };

        if !input.is_ready_for_more_media_data() {
            self.stats.track_mut(kind).not_ready += 1;
            tracing::debug!(%kind, %pts, "Track input not ready, dropping sample");
            return;
        }

        match input.append(sample) {
            Ok(()) => {
                match kind {
                    MediaKind::Audio => self.last_audio_pts = Some(pts),
                    MediaKind::Video => self.last_video_pts = Some(pts),
                }
                self.stats.track_mut(kind).accepted += 1;
            }
            Err(e) => {
                self.stats.track_mut(kind).append_failed += 1;
                tracing::error!(%kind, %pts, error = %e, "Failed to append sample");
                self.check_writer_failed();
            }
        }
    }

    /// Finalize the container. Idempotent; completion is reported once unless
    /// `silent`.
    pub fn finish(&mut self, silent: bool) {
        if self.finishing {
            return;
        }
        self.finishing = true;
        let _guard = self.span.clone().entered();

        let Some(writer) = self.writer.as_mut() else {
            tracing::debug!("Finish on a sink without writer");
            return;
        };

        {
            let mut state = self.state.lock();
            if !state.is_terminal_failure() {
                *state = WriterState::Finishing;
            }
        }
        tracing::info!(silent, "Finishing recording");

        let state = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        let info = self.info.clone();
        let span = self.span.clone();
        writer.finish_writing(Box::new(move |status| {
            let _guard = span.entered();
            {
                let mut state = state.lock();
                if *state == WriterState::Finishing {
                    *state = WriterState::Finished;
                }
            }
            tracing::info!(%status, "Recording finished");
            if !silent {
                callback(SinkStatus::Finished, &info.with_writer(Some(status), None));
            }
        }));
    }

    pub fn state(&self) -> WriterState {
        *self.state.lock()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finishing(&self) -> bool {
        self.finishing
    }

    /// Init, start, or runtime failure has been observed.
    pub fn has_failed(&self) -> bool {
        self.state().is_terminal_failure()
    }

    pub fn writer_status(&self) -> Option<WriterStatus> {
        self.writer.as_ref().map(|w| w.status())
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    fn check_writer_failed(&mut self) -> bool {
        let Some(writer) = self.writer.as_ref() else {
            return false;
        };
        if writer.status() != WriterStatus::Failed {
            return false;
        }
        let error = writer.error();
        *self.state.lock() = WriterState::Failed;
        tracing::error!(error = error.as_deref().unwrap_or("unknown"), "Container writer failed");
        self.report_failure(SinkStatus::StatusFailed, Some(WriterStatus::Failed), error);
        true
    }

    fn report_failure(&mut self, status: SinkStatus, writer: Option<WriterStatus>, error: Option<String>) {
        if self.failure_reported {
            return;
        }
        self.failure_reported = true;
        self.report(status, writer, error);
    }

    fn report(&self, status: SinkStatus, writer: Option<WriterStatus>, error: Option<String>) {
        (self.callback)(status, &self.info.with_writer(writer, error));
    }
}

type OpenedWriter = (
    Box<dyn AssetWriter>,
    Option<Box<dyn AssetWriterInput>>,
    Option<Box<dyn AssetWriterInput>>,
);

fn open_writer(
    path: &Path,
    audio: Option<&WriterSettings>,
    video: Option<&VideoWriterSettings>,
    factory: &dyn AssetWriterFactory,
) -> Result<OpenedWriter> {
    let mut writer = factory.create(path, FileType::from_path(path))?;
    let audio_input = match audio {
        Some(settings) => {
            let mut input = writer.add_input(MediaKind::Audio, settings.resolve_audio())?;
            input.set_expects_media_data_in_real_time(true);
            Some(input)
        }
        None => None,
    };
    let video_input = match video {
        Some(settings) => {
            let mut input = writer.add_input(MediaKind::Video, settings.resolve())?;
            input.set_expects_media_data_in_real_time(true);
            Some(input)
        }
        None => None,
    };
    Ok((writer, audio_input, video_input))
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Never leave an unfinalized container behind.
        if !self.finishing && self.writer.is_some() {
            self.finish(true);
        }
    }
}
