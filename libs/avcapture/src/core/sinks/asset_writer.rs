// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Container writer seam.
//!
//! The [`FileSink`](super::FileSink) drives an [`AssetWriter`] through the
//! lifecycle `Unknown -> Writing -> Completed | Failed`, appending samples
//! through per-track [`AssetWriterInput`]s created at sink construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::settings::OutputSettings;
use crate::core::{MediaKind, MediaTime, Result, TimedSample};

/// Status of the underlying container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for WriterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterStatus::Unknown => "unknown",
            WriterStatus::Writing => "writing",
            WriterStatus::Completed => "completed",
            WriterStatus::Failed => "failed",
            WriterStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileType {
    #[default]
    QuickTimeMovie,
    Mpeg4,
}

impl FileType {
    /// `.mp4`, `.m4v` and `.m4a` map to MPEG-4; everything else is QuickTime.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp4") | Some("m4v") | Some("m4a") => FileType::Mpeg4,
            _ => FileType::QuickTimeMovie,
        }
    }
}

/// Called once with the writer's final status.
pub type FinishCompletion = Box<dyn FnOnce(WriterStatus) + Send>;

pub trait AssetWriterInput: Send {
    fn media_kind(&self) -> MediaKind;

    fn expects_media_data_in_real_time(&self) -> bool;

    fn set_expects_media_data_in_real_time(&mut self, real_time: bool);

    /// False while the input cannot take another sample without blocking.
    fn is_ready_for_more_media_data(&self) -> bool;

    fn append(&mut self, sample: TimedSample) -> Result<()>;
}

pub trait AssetWriter: Send {
    fn path(&self) -> &Path;

    fn status(&self) -> WriterStatus;

    /// Description of the error that moved the writer to `Failed`.
    fn error(&self) -> Option<String>;

    /// Register a track. `settings` of `None` requests passthrough.
    fn add_input(
        &mut self,
        kind: MediaKind,
        settings: Option<OutputSettings>,
    ) -> Result<Box<dyn AssetWriterInput>>;

    fn start_writing(&mut self) -> Result<()>;

    /// Anchor the media timeline at `at`.
    fn start_session(&mut self, at: MediaTime);

    /// Finalize asynchronously. `completion` runs exactly once, even if the
    /// writer handle is dropped before finalization completes.
    fn finish_writing(&mut self, completion: FinishCompletion);
}

pub trait AssetWriterFactory: Send + Sync {
    fn create(&self, path: &Path, file_type: FileType) -> Result<Box<dyn AssetWriter>>;
}
