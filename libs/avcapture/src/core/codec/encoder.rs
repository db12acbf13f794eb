// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Hardware H.264 encoder adapter
//
// Wraps an asynchronous platform compression session. Frames go in through
// `encode` and come back on the session's own thread through the output
// handler. The first successful output also yields the stream's parameter
// sets, which are published once and cached for the encoder's lifetime.

use std::sync::{Arc, OnceLock};

use super::compression_session::{
    CompressionOutputHandler, CompressionProperty, CompressionSession, CompressionSessionFactory,
    EncodeInfoFlags, EncodeStatus,
};
use super::encoder_config::EncoderConfig;
use super::parameter_sets::ParameterSets;
use crate::core::sample::{SampleTiming, TimedSample, VideoFrame};

/// Receives every successfully compressed sample.
pub type EncodedOutputHandler = Arc<dyn Fn(TimedSample, EncodeStatus, EncodeInfoFlags) + Send + Sync>;

/// Receives the stream's parameter sets, at most once per encoder.
pub type ParameterSetsHandler = Arc<dyn Fn(&ParameterSets) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Ready, nothing submitted yet.
    Created,
    /// At least one frame submitted.
    Active,
    Closed,
}

pub struct HardwareEncoder {
    config: EncoderConfig,
    state: EncoderState,
    // None when construction failed; every operation is then a no-op.
    session: Option<Box<dyn CompressionSession>>,
    // Written once from the session's callback thread, read-only afterwards.
    parameter_sets: Arc<OnceLock<ParameterSets>>,
    span: tracing::Span,
}

impl HardwareEncoder {
    /// Create the session and configure it for low-latency output.
    ///
    /// Never fails: if the platform session cannot be created the encoder is
    /// inert and the failure is logged.
    pub fn new(
        config: EncoderConfig,
        factory: &dyn CompressionSessionFactory,
        output: EncodedOutputHandler,
        on_parameter_sets: Option<ParameterSetsHandler>,
    ) -> Self {
        let span = tracing::info_span!(
            "hardware_encoder",
            width = config.width,
            height = config.height,
            bitrate = config.bitrate_bps
        );
        let parameter_sets = Arc::new(OnceLock::new());

        let session = span.in_scope(|| {
            if let Err(e) = config.validate() {
                tracing::error!(error = %e, "Encoder configuration rejected, encoder disabled");
                return None;
            }

            let handler = output_handler(
                Arc::clone(&parameter_sets),
                output,
                on_parameter_sets,
                span.clone(),
            );
            let mut session = match factory.create(&config, handler) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create compression session, encoder disabled");
                    return None;
                }
            };

            for property in CompressionProperty::for_config(&config) {
                if let Err(e) = session.set_property(property) {
                    tracing::warn!(?property, error = %e, "Failed to set compression property");
                }
            }

            tracing::info!(
                "Compression session created: {}x{} @ {}fps, {} bps",
                config.width,
                config.height,
                config.fps,
                config.bitrate_bps
            );
            Some(session)
        });

        Self {
            config,
            state: EncoderState::Created,
            session,
            parameter_sets,
            span,
        }
    }

    /// Submit a frame for asynchronous compression.
    pub fn encode(&mut self, frame: &VideoFrame, timing: SampleTiming) {
        if self.state == EncoderState::Closed {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let _guard = self.span.enter();
        self.state = EncoderState::Active;
        match session.encode_frame(frame, timing) {
            Ok(flags) if flags.contains(EncodeInfoFlags::FRAME_DROPPED) => {
                tracing::debug!(pts = %timing.pts, "Encoder dropped frame on submit");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(pts = %timing.pts, error = %e, "Frame submission failed"),
        }
    }

    /// Flush frames in flight (blocking) and release the session.
    pub fn close(&mut self) {
        if self.state == EncoderState::Closed {
            return;
        }
        self.state = EncoderState::Closed;

        let Some(mut session) = self.session.take() else {
            return;
        };
        let _guard = self.span.enter();
        tracing::debug!("Waiting for pending frames to complete...");
        if let Err(e) = session.complete_frames() {
            tracing::warn!(error = %e, "Completing pending frames failed");
        }
        session.invalidate();
        tracing::debug!("Compression session invalidated");
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// True when construction failed and the encoder ignores all input.
    pub fn is_inert(&self) -> bool {
        self.session.is_none() && self.state != EncoderState::Closed
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Parameter sets captured from the first successful output, if any yet.
    pub fn parameter_sets(&self) -> Option<&ParameterSets> {
        self.parameter_sets.get()
    }
}

impl Drop for HardwareEncoder {
    fn drop(&mut self) {
        // Pending callbacks reference the shared cache; drain them before it goes.
        self.close();
    }
}

fn output_handler(
    cache: Arc<OnceLock<ParameterSets>>,
    output: EncodedOutputHandler,
    on_parameter_sets: Option<ParameterSetsHandler>,
    span: tracing::Span,
) -> CompressionOutputHandler {
    Arc::new(move |status, flags, sample| {
        let _guard = span.enter();

        if !status.is_success() {
            tracing::debug!(?status, "Dropping failed encoder output");
            return;
        }
        let Some(sample) = sample else {
            tracing::trace!(?flags, "Encoder output carried no sample");
            return;
        };

        if cache.get().is_none() {
            let mut extracted = false;
            let sets = cache.get_or_init(|| {
                extracted = true;
                match sample.format().and_then(|format| format.as_video()) {
                    Some(video) => ParameterSets::from_format_description(video),
                    None => ParameterSets::default(),
                }
            });
            if extracted {
                if sets.is_valid() {
                    tracing::info!(
                        sps = sets.sps().map_or(0, |b| b.len()),
                        pps = sets.pps().map_or(0, |b| b.len()),
                        nal_header_length = sets.nal_header_length(),
                        "Parameter sets captured"
                    );
                    if let Some(publish) = &on_parameter_sets {
                        publish(sets);
                    }
                } else {
                    tracing::warn!("First encoder output carried no usable parameter sets");
                }
            }
        }

        output(sample, status, flags);
    })
}
