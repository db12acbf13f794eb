// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use avcapture::{
    AssetWriter, AssetWriterFactory, AssetWriterInput, AudioFormatDescription, CaptureError,
    CompressionOutputHandler, CompressionProperty, CompressionSession, CompressionSessionFactory,
    EncodeInfoFlags, EncodeStatus, EncoderConfig, FileType, FinishCompletion, FormatDescription,
    MediaKind, MediaTime, OutputSettings, PixelFormat, Result, SampleTiming, SinkStatus,
    StatusCallback, StatusInfo, TimedSample, VideoFormatDescription, VideoFrame, WriterStatus,
};

pub const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xBF, 0xE5];
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

// =============================================================================
// Samples
// =============================================================================

pub fn aac_format() -> Arc<FormatDescription> {
    Arc::new(FormatDescription::Audio(AudioFormatDescription::aac(44_100, 1)))
}

pub fn h264_format(width: u32, height: u32) -> Arc<FormatDescription> {
    let video = VideoFormatDescription::h264(
        width,
        height,
        vec![Bytes::from_static(SPS), Bytes::from_static(PPS)],
        4,
    )
    .unwrap();
    Arc::new(FormatDescription::Video(video))
}

/// Audio sample at `millis` with a small opaque AAC payload.
pub fn audio_sample(millis: i64) -> TimedSample {
    TimedSample::new(
        MediaKind::Audio,
        SampleTiming::new(MediaTime::new(millis, 1000)),
        Bytes::from_static(&[0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C]),
        Some(aac_format()),
    )
    .unwrap()
}

/// One length-prefixed H.264 access unit; IDR when `keyframe`.
pub fn h264_payload(keyframe: bool) -> Bytes {
    let nal: &[u8] = if keyframe {
        &[0x65, 0x88, 0x84, 0x00, 0x33, 0xFF]
    } else {
        &[0x41, 0x9A, 0x02, 0x04, 0x10]
    };
    let mut data = (nal.len() as u32).to_be_bytes().to_vec();
    data.extend_from_slice(nal);
    Bytes::from(data)
}

pub fn video_sample(frame: i64, fps: u32, format: &Arc<FormatDescription>) -> TimedSample {
    TimedSample::new(
        MediaKind::Video,
        SampleTiming::new(MediaTime::new(frame, fps)).with_duration(MediaTime::new(1, fps)),
        h264_payload(frame % 30 == 0),
        Some(Arc::clone(format)),
    )
    .unwrap()
}

/// Frames per PCM buffer from [`pcm_sample`].
pub const PCM_FRAMES: i64 = 1024;

/// Buffer `index` of a 44.1 kHz mono 16-bit 440 Hz tone.
pub fn pcm_sample(index: i64) -> TimedSample {
    let format = AudioFormatDescription::linear_pcm(44_100, 1, 16);
    let mut data = Vec::with_capacity(PCM_FRAMES as usize * 2);
    for frame in 0..PCM_FRAMES {
        let t = (index * PCM_FRAMES + frame) as f32 / 44_100.0;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    TimedSample::new(
        MediaKind::Audio,
        SampleTiming::new(MediaTime::new(index * PCM_FRAMES, 44_100))
            .with_duration(MediaTime::new(PCM_FRAMES, 44_100)),
        Bytes::from(data),
        Some(Arc::new(FormatDescription::Audio(format))),
    )
    .unwrap()
}

/// Uncompressed NV12 frame whose luma is the frame number.
pub fn nv12_sample(frame: i64, fps: u32, width: u32, height: u32) -> TimedSample {
    let format = VideoFormatDescription::raw(PixelFormat::Nv12, width, height);
    let size = PixelFormat::Nv12.frame_size(width, height);
    TimedSample::new(
        MediaKind::Video,
        SampleTiming::new(MediaTime::new(frame, fps)).with_duration(MediaTime::new(1, fps)),
        Bytes::from(vec![frame as u8; size]),
        Some(Arc::new(FormatDescription::Video(format))),
    )
    .unwrap()
}

// =============================================================================
// Synchronous encoder
// =============================================================================

/// Encodes synchronously on the submitting thread.
pub struct InlineEncoderFactory;

pub struct InlineEncoder {
    output: CompressionOutputHandler,
    format: Arc<FormatDescription>,
}

impl CompressionSessionFactory for InlineEncoderFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        output: CompressionOutputHandler,
    ) -> Result<Box<dyn CompressionSession>> {
        let format = VideoFormatDescription::h264(
            config.width,
            config.height,
            vec![Bytes::from_static(SPS), Bytes::from_static(PPS)],
            4,
        )?;
        Ok(Box::new(InlineEncoder {
            output,
            format: Arc::new(FormatDescription::Video(format)),
        }))
    }
}

impl CompressionSession for InlineEncoder {
    fn set_property(&mut self, _property: CompressionProperty) -> Result<()> {
        Ok(())
    }

    fn encode_frame(&mut self, frame: &VideoFrame, timing: SampleTiming) -> Result<EncodeInfoFlags> {
        // One IDR "slice" per frame carrying the first luma byte.
        let payload = Bytes::from(vec![0, 0, 0, 2, 0x65, frame.luma()[0]]);
        let sample = TimedSample::new(
            MediaKind::Video,
            timing,
            payload,
            Some(Arc::clone(&self.format)),
        )?;
        (self.output)(EncodeStatus::Success, EncodeInfoFlags::empty(), Some(sample));
        Ok(EncodeInfoFlags::empty())
    }

    fn complete_frames(&mut self) -> Result<()> {
        Ok(())
    }

    fn invalidate(&mut self) {}
}

// =============================================================================
// Status listener
// =============================================================================

/// Status callback that forwards every notification into a channel.
pub fn status_channel() -> (StatusCallback, Receiver<(SinkStatus, StatusInfo)>) {
    let (sender, receiver) = unbounded();
    let callback: StatusCallback = Arc::new(move |status, info: &StatusInfo| {
        let _ = sender.send((status, info.clone()));
    });
    (callback, receiver)
}

// =============================================================================
// Recording asset writer
// =============================================================================

/// What a [`RecordingWriterFactory`] writer saw.
#[derive(Debug, Default)]
pub struct WriterLog {
    pub created: Vec<PathBuf>,
    pub inputs: Vec<(MediaKind, Option<OutputSettings>)>,
    pub starts: usize,
    pub session_start: Option<MediaTime>,
    pub appended: Vec<(MediaKind, MediaTime)>,
    pub finish_calls: usize,
}

impl WriterLog {
    pub fn appended_pts(&self, kind: MediaKind) -> Vec<MediaTime> {
        self.appended
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, pts)| *pts)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Script {
    pub fail_create: bool,
    pub fail_start: bool,
    /// Writer moves to `Failed` once this many samples were appended.
    pub fail_after: Option<usize>,
    pub never_ready: bool,
}

struct Shared {
    status: WriterStatus,
    error: Option<String>,
    script: Script,
    log: Arc<Mutex<WriterLog>>,
}

/// In-memory [`AssetWriterFactory`] recording every call.
#[derive(Clone, Default)]
pub struct RecordingWriterFactory {
    pub log: Arc<Mutex<WriterLog>>,
    pub script: Script,
}

impl RecordingWriterFactory {
    pub fn new(script: Script) -> Self {
        Self {
            log: Arc::default(),
            script,
        }
    }
}

impl AssetWriterFactory for RecordingWriterFactory {
    fn create(&self, path: &Path, _file_type: FileType) -> Result<Box<dyn AssetWriter>> {
        if self.script.fail_create {
            return Err(CaptureError::Writer(format!(
                "cannot create {}",
                path.display()
            )));
        }
        self.log.lock().created.push(path.to_path_buf());
        Ok(Box::new(RecordingWriter {
            path: path.to_path_buf(),
            shared: Arc::new(Mutex::new(Shared {
                status: WriterStatus::Unknown,
                error: None,
                script: self.script,
                log: Arc::clone(&self.log),
            })),
        }))
    }
}

struct RecordingWriter {
    path: PathBuf,
    shared: Arc<Mutex<Shared>>,
}

impl AssetWriter for RecordingWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn status(&self) -> WriterStatus {
        self.shared.lock().status
    }

    fn error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    fn add_input(
        &mut self,
        kind: MediaKind,
        settings: Option<OutputSettings>,
    ) -> Result<Box<dyn AssetWriterInput>> {
        let shared = self.shared.lock();
        shared.log.lock().inputs.push((kind, settings));
        Ok(Box::new(RecordingInput {
            kind,
            real_time: false,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn start_writing(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.log.lock().starts += 1;
        if shared.script.fail_start {
            shared.status = WriterStatus::Failed;
            shared.error = Some("disk full".into());
            return Err(CaptureError::Writer("start refused".into()));
        }
        shared.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        let shared = self.shared.lock();
        shared.log.lock().session_start.get_or_insert(at);
    }

    fn finish_writing(&mut self, completion: FinishCompletion) {
        let status = {
            let mut shared = self.shared.lock();
            shared.log.lock().finish_calls += 1;
            if shared.status != WriterStatus::Failed {
                shared.status = WriterStatus::Completed;
            }
            shared.status
        };
        completion(status);
    }
}

struct RecordingInput {
    kind: MediaKind,
    real_time: bool,
    shared: Arc<Mutex<Shared>>,
}

impl AssetWriterInput for RecordingInput {
    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    fn expects_media_data_in_real_time(&self) -> bool {
        self.real_time
    }

    fn set_expects_media_data_in_real_time(&mut self, real_time: bool) {
        self.real_time = real_time;
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        let shared = self.shared.lock();
        !shared.script.never_ready && shared.status == WriterStatus::Writing
    }

    fn append(&mut self, sample: TimedSample) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.status != WriterStatus::Writing {
            return Err(CaptureError::InvalidState("not writing".into()));
        }
        let appended = {
            let mut log = shared.log.lock();
            log.appended.push((sample.kind(), sample.pts()));
            log.appended.len()
        };
        if shared.script.fail_after.is_some_and(|limit| appended >= limit) {
            shared.status = WriterStatus::Failed;
            shared.error = Some("I/O error".into());
        }
        Ok(())
    }
}
