// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Container writer error: {0}")]
    Writer(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("Malformed media format: {0}")]
    Format(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MP4 error: {0}")]
    Mp4(#[from] mp4::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
