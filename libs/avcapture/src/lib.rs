// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::type_complexity)] // Callback handler types are clear in context
#![allow(clippy::missing_safety_doc)] // Safety documented in implementation comments

//! Real-time audio/video capture-to-file pipeline.
//!
//! Two live sources (camera, microphone) deliver timestamped samples on their
//! own serial threads. Video may be routed through a hardware H.264 encoder
//! first. Both streams funnel into a single serial writer queue that owns a
//! [`FileSink`], which filters out-of-order samples per track, opens the
//! container lazily on the first sample, and reports terminal status once.
//!
//! ```text
//! CaptureDevice ─► CaptureSource ─(HardwareEncoder)─► RecordingController
//!                                                       │ WriterQueue (serial)
//!                                                       ▼
//!                                                    FileSink ─► AssetWriter (mp4)
//! ```

pub mod core;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub mod apple;

pub use core::{
    codec::{
        default_session_factory, nal_unit_type, AacEncoder, BitrateMeasure,
        CompressionOutputHandler, CompressionProperty, CompressionSession,
        CompressionSessionFactory, EncodeInfoFlags, EncodeStatus, EncodedOutputHandler,
        EncoderConfig, EncoderState, EntropyMode, H264Profile, HardwareEncoder, NalUnitType,
        NalUnits, ParameterSets, ParameterSetsHandler, UnsupportedSessionFactory,
        AAC_FRAME_SAMPLES,
    },
    config::PipelineConfig,
    error::{CaptureError, Result},
    format::{
        AudioCodecType, AudioFormatDescription, AvcDecoderConfigurationRecord,
        FormatDescription, H264ParameterSetSource, MediaKind, PixelFormat, VideoCodecType,
        VideoFormatDescription,
    },
    logging::{init_logging, LoggingConfig},
    media_time::MediaTime,
    recording::{
        recording_file_path, RecordingConfig, RecordingController, RecordingHandle, WriterQueue,
    },
    sample::{SampleTiming, TimedSample, VideoFrame},
    sinks::{
        AssetWriter, AssetWriterFactory, AssetWriterInput, FileSink, FileType,
        FinishCompletion, Mp4AssetWriter, Mp4AssetWriterFactory, OutputSettings, SinkStats,
        SinkStatus, StatusCallback, StatusInfo, TrackStats, VideoWriterSettings, WriterSettings,
        WriterState, WriterStatus, AAC_PRESET_BITRATE, AAC_PRESET_CHANNELS,
        AAC_PRESET_SAMPLE_RATE,
    },
    sources::{
        negotiate_video_format, AudioCaptureSource, CaptureDevice, CaptureOption,
        CaptureOptions, CaptureOutput, CaptureService, CaptureSession, CaptureSource,
        DeviceBuffer, DeviceFormat, NegotiatedVideo, SessionPreset, TestPatternCamera,
        TestToneMicrophone, VideoCaptureSource,
    },
};
