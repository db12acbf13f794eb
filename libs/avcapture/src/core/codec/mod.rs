// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoding: H.264 NAL packaging, parameter sets, the hardware encoder adapter
//! and the software AAC encoder.

mod aac;
mod bitrate;
mod compression_session;
mod encoder;
mod encoder_config;
pub mod nal;
mod parameter_sets;

pub use aac::{AacEncoder, AAC_FRAME_SAMPLES};
pub use bitrate::BitrateMeasure;
pub use compression_session::{
    default_session_factory, CompressionOutputHandler, CompressionProperty, CompressionSession,
    CompressionSessionFactory, EncodeInfoFlags, EncodeStatus, UnsupportedSessionFactory,
};
pub use encoder::{EncodedOutputHandler, EncoderState, HardwareEncoder, ParameterSetsHandler};
pub use encoder_config::{EncoderConfig, EntropyMode, H264Profile, DEFAULT_BITRATE_BPS};
pub use nal::{nal_unit_type, NalUnitType, NalUnits};
pub use parameter_sets::ParameterSets;
