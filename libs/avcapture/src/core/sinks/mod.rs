// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Container writing: the file sink state machine and its writer backends.

mod asset_writer;
mod file_sink;
mod movie;
mod mp4_writer;
mod settings;

pub use asset_writer::{
    AssetWriter, AssetWriterFactory, AssetWriterInput, FileType, FinishCompletion, WriterStatus,
};
pub use file_sink::{
    FileSink, SinkStats, SinkStatus, StatusCallback, StatusInfo, TrackStats, WriterState,
};
pub use mp4_writer::{Mp4AssetWriter, Mp4AssetWriterFactory};
pub use settings::{
    OutputSettings, VideoWriterSettings, WriterSettings, AAC_PRESET_BITRATE,
    AAC_PRESET_CHANNELS, AAC_PRESET_SAMPLE_RATE,
};
