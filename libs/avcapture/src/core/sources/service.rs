// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::capture_source::{CaptureOutput, CaptureSource};
use super::device::CaptureSession;
use super::options::CaptureOption;
use crate::core::{MediaKind, Result};

/// Owns the capture session and every source configured against it.
pub struct CaptureService {
    session: CaptureSession,
    sources: Vec<Box<dyn CaptureSource>>,
    span: tracing::Span,
}

impl CaptureService {
    pub fn new(session: CaptureSession) -> Self {
        Self {
            session,
            sources: Vec::new(),
            span: tracing::info_span!("capture_service"),
        }
    }

    pub fn with_source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn add_source(&mut self, source: Box<dyn CaptureSource>) {
        self.sources.push(source);
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CaptureSession {
        &mut self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Route every source's samples to `output`.
    pub fn set_output(&mut self, output: Arc<dyn CaptureOutput>) {
        for source in &mut self.sources {
            source.set_output(Arc::clone(&output));
        }
    }

    /// Apply `option` to every source of `kind`. Takes effect on the next
    /// [`reconfigure`](Self::reconfigure) or [`start`](Self::start).
    pub fn apply_option(&mut self, kind: MediaKind, option: CaptureOption) {
        for source in self.sources.iter_mut().filter(|s| s.media_kind() == kind) {
            source.apply_option(option);
        }
    }

    /// Configure every source and start the session.
    ///
    /// Returns `Ok(false)` when already running, or when no source found a
    /// device to attach.
    pub fn start(&mut self) -> Result<bool> {
        let _guard = self.span.enter();
        if self.session.is_running() {
            tracing::debug!("Capture already running");
            return Ok(false);
        }

        let mut configured = 0usize;
        for source in &mut self.sources {
            if source.configure(&mut self.session)? {
                configured += 1;
            }
        }
        if configured == 0 || self.session.attached_count() == 0 {
            tracing::warn!("No capture devices attached, not starting");
            return Ok(false);
        }

        let started = self.sources.iter_mut().try_for_each(|source| {
            source.start().inspect_err(|e| {
                tracing::error!(kind = %source.media_kind(), error = %e, "Failed to start source");
            })
        });
        if let Err(e) = started {
            for source in &mut self.sources {
                source.reset(&mut self.session);
            }
            return Err(e);
        }
        self.session.set_running(true);
        tracing::info!(sources = configured, "Capture started");
        Ok(true)
    }

    /// Tear every source down and configure it again with its current
    /// options, restarting if capture was running.
    pub fn reconfigure(&mut self) -> Result<()> {
        let was_running = self.session.is_running();
        self.stop();
        if was_running {
            self.start()?;
        } else {
            for source in &mut self.sources {
                source.configure(&mut self.session)?;
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        let _guard = self.span.enter();
        for source in &mut self.sources {
            source.reset(&mut self.session);
        }
        if self.session.is_running() {
            self.session.set_running(false);
            tracing::info!("Capture stopped");
        }
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sources::{AudioCaptureSource, TestToneMicrophone};

    #[test]
    fn start_without_devices_reports_false() {
        let mut service = CaptureService::new(CaptureSession::new())
            .with_source(Box::new(AudioCaptureSource::new()));
        assert!(!service.start().unwrap());
        assert!(!service.is_running());
    }

    #[test]
    fn second_start_is_a_no_op() {
        let session = CaptureSession::new()
            .with_device(Arc::new(TestToneMicrophone::default().with_max_buffers(1)));
        let mut service =
            CaptureService::new(session).with_source(Box::new(AudioCaptureSource::new()));
        assert!(service.start().unwrap());
        assert!(!service.start().unwrap());
        service.stop();
        assert!(!service.is_running());
        assert_eq!(service.session().attached_count(), 0);
    }
}
