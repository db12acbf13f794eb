// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// VideoToolbox compression session
//
// CompressionSession backend over VTCompressionSession. Frames are copied
// into a CVPixelBuffer and submitted asynchronously; VideoToolbox calls back
// on its own thread with a CMSampleBuffer, which is converted into a
// TimedSample and handed to the output handler.

use std::ffi::c_void;
use std::sync::Arc;

use super::{ffi, format};
use crate::core::codec::{
    CompressionOutputHandler, CompressionProperty, CompressionSession, CompressionSessionFactory,
    EncodeInfoFlags, EncodeStatus, EncoderConfig, EntropyMode, H264Profile,
};
use crate::core::format::PixelFormat;
use crate::core::sample::{SampleTiming, VideoFrame};
use crate::core::{CaptureError, Result};

// ============================================================================
// FACTORY
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct VideoToolboxSessionFactory;

impl CompressionSessionFactory for VideoToolboxSessionFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        output: CompressionOutputHandler,
    ) -> Result<Box<dyn CompressionSession>> {
        Ok(Box::new(VideoToolboxSession::create(config, output)?))
    }
}

// ============================================================================
// SESSION
// ============================================================================

struct CallbackContext {
    output: CompressionOutputHandler,
}

pub struct VideoToolboxSession {
    session: Option<ffi::VTCompressionSessionRef>,
    // Leaked Arc<CallbackContext>, reclaimed in Drop once no callback can run.
    callback_context: Option<*mut c_void>,
    width: u32,
    height: u32,
}

impl VideoToolboxSession {
    pub fn create(config: &EncoderConfig, output: CompressionOutputHandler) -> Result<Self> {
        let context = Arc::new(CallbackContext { output });
        let callback_context = Arc::into_raw(context) as *mut c_void;
        let mut session: ffi::VTCompressionSessionRef = std::ptr::null_mut();

        let status = unsafe {
            ffi::VTCompressionSessionCreate(
                std::ptr::null(), // allocator
                config.width as i32,
                config.height as i32,
                ffi::K_CMVIDEO_CODEC_TYPE_H264,
                std::ptr::null(), // encoder specification
                std::ptr::null(), // source image buffer attributes
                std::ptr::null(), // compressed data allocator
                compression_output_callback,
                callback_context,
                &mut session,
            )
        };

        if status != ffi::NO_ERR || session.is_null() {
            // Nothing was registered; take the context back.
            unsafe {
                let _ = Arc::from_raw(callback_context as *const CallbackContext);
            }
            return Err(CaptureError::Encoder(format!(
                "VTCompressionSessionCreate failed: {}",
                status
            )));
        }

        tracing::debug!(
            "VideoToolbox compression session created: {}x{}",
            config.width,
            config.height
        );

        Ok(Self {
            session: Some(session),
            callback_context: Some(callback_context),
            width: config.width,
            height: config.height,
        })
    }

    fn session(&self) -> Result<ffi::VTCompressionSessionRef> {
        self.session
            .ok_or_else(|| CaptureError::InvalidState("compression session invalidated".into()))
    }

    /// Copy `frame` into a new CVPixelBuffer. Caller releases the result.
    fn pixel_buffer_from_frame(&self, frame: &VideoFrame) -> Result<ffi::CVPixelBufferRef> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CaptureError::Format(format!(
                "frame is {}x{}, session expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        // (bytes per row, rows) per plane
        let (format_type, planes) = match frame.pixel_format {
            PixelFormat::Nv12 => (
                ffi::K_CVPIXEL_FORMAT_TYPE_NV12,
                vec![(width, height), (width, height / 2)],
            ),
            PixelFormat::Bgra32 => (ffi::K_CVPIXEL_FORMAT_TYPE_BGRA, vec![(width * 4, height)]),
        };

        let mut pixel_buffer: ffi::CVPixelBufferRef = std::ptr::null_mut();
        unsafe {
            let status = ffi::CVPixelBufferCreate(
                std::ptr::null(),
                frame.width as usize,
                frame.height as usize,
                format_type,
                std::ptr::null(),
                &mut pixel_buffer,
            );
            if status != ffi::K_CVRETURN_SUCCESS || pixel_buffer.is_null() {
                return Err(CaptureError::Encoder(format!(
                    "CVPixelBufferCreate failed: {}",
                    status
                )));
            }

            if ffi::CVPixelBufferLockBaseAddress(pixel_buffer, 0) != ffi::K_CVRETURN_SUCCESS {
                ffi::CFRelease(pixel_buffer as *const _);
                return Err(CaptureError::Encoder(
                    "CVPixelBufferLockBaseAddress failed".into(),
                ));
            }

            let mut source: &[u8] = &frame.data;
            for (plane, &(row_bytes, rows)) in planes.iter().enumerate() {
                // Single-plane formats report plane 0 through the planar API too.
                let base = ffi::CVPixelBufferGetBaseAddressOfPlane(pixel_buffer, plane) as *mut u8;
                let stride = ffi::CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, plane);
                if base.is_null() || stride < row_bytes {
                    continue;
                }
                for row in 0..rows {
                    let Some((line, rest)) = source.split_at_checked(row_bytes) else {
                        break;
                    };
                    std::ptr::copy_nonoverlapping(line.as_ptr(), base.add(row * stride), row_bytes);
                    source = rest;
                }
            }

            ffi::CVPixelBufferUnlockBaseAddress(pixel_buffer, 0);
        }
        Ok(pixel_buffer)
    }
}

impl CompressionSession for VideoToolboxSession {
    fn set_property(&mut self, property: CompressionProperty) -> Result<()> {
        let session = self.session()?;
        let status = unsafe {
            match property {
                CompressionProperty::RealTime(enabled) => ffi::VTSessionSetProperty(
                    session,
                    ffi::kVTCompressionPropertyKey_RealTime,
                    cf_boolean(enabled),
                ),
                CompressionProperty::AllowFrameReordering(enabled) => ffi::VTSessionSetProperty(
                    session,
                    ffi::kVTCompressionPropertyKey_AllowFrameReordering,
                    cf_boolean(enabled),
                ),
                CompressionProperty::EntropyMode(mode) => {
                    let value = match mode {
                        EntropyMode::Cavlc => ffi::kVTH264EntropyMode_CAVLC,
                        EntropyMode::Cabac => ffi::kVTH264EntropyMode_CABAC,
                    };
                    ffi::VTSessionSetProperty(
                        session,
                        ffi::kVTCompressionPropertyKey_H264EntropyMode,
                        value,
                    )
                }
                CompressionProperty::ProfileLevel(profile) => {
                    let value = match profile {
                        H264Profile::Baseline => ffi::kVTProfileLevel_H264_Baseline_AutoLevel,
                        H264Profile::Main => ffi::kVTProfileLevel_H264_Main_AutoLevel,
                        H264Profile::High => ffi::kVTProfileLevel_H264_High_AutoLevel,
                    };
                    ffi::VTSessionSetProperty(
                        session,
                        ffi::kVTCompressionPropertyKey_ProfileLevel,
                        value,
                    )
                }
                CompressionProperty::AverageBitRate(bps) => set_i32_property(
                    session,
                    ffi::kVTCompressionPropertyKey_AverageBitRate,
                    bps.min(i32::MAX as u32) as i32,
                ),
                CompressionProperty::ExpectedFrameRate(fps) => set_i32_property(
                    session,
                    ffi::kVTCompressionPropertyKey_ExpectedFrameRate,
                    fps.min(i32::MAX as u32) as i32,
                ),
            }
        };

        if status != ffi::NO_ERR {
            return Err(CaptureError::Encoder(format!(
                "VTSessionSetProperty({:?}) failed: {}",
                property, status
            )));
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &VideoFrame, timing: SampleTiming) -> Result<EncodeInfoFlags> {
        let session = self.session()?;
        let pixel_buffer = self.pixel_buffer_from_frame(frame)?;

        let presentation_time = cm_time(timing.pts);
        let duration = timing
            .duration
            .map(cm_time)
            .unwrap_or_else(ffi::CMTime::invalid);
        let mut info_flags: u32 = 0;

        let status = unsafe {
            let status = ffi::VTCompressionSessionEncodeFrame(
                session,
                pixel_buffer,
                presentation_time,
                duration,
                std::ptr::null(),     // frame properties
                std::ptr::null_mut(), // source frame ref con
                &mut info_flags,
            );
            // The session retains the buffer for as long as it needs it.
            ffi::CFRelease(pixel_buffer as *const _);
            status
        };

        if status != ffi::NO_ERR {
            return Err(CaptureError::Encoder(format!(
                "VTCompressionSessionEncodeFrame failed: {}",
                status
            )));
        }
        Ok(encode_info_flags(info_flags))
    }

    fn complete_frames(&mut self) -> Result<()> {
        let session = self.session()?;
        let status =
            unsafe { ffi::VTCompressionSessionCompleteFrames(session, ffi::CMTime::invalid()) };
        if status != ffi::NO_ERR {
            return Err(CaptureError::Encoder(format!(
                "VTCompressionSessionCompleteFrames failed: {}",
                status
            )));
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        unsafe {
            // Drain before invalidating so no callback outlives the context.
            let status = ffi::VTCompressionSessionCompleteFrames(session, ffi::CMTime::invalid());
            if status != ffi::NO_ERR {
                tracing::warn!("VTCompressionSessionCompleteFrames failed: {}", status);
            }
            ffi::VTCompressionSessionInvalidate(session);
            ffi::CFRelease(session as *const c_void);
        }
        tracing::debug!("VideoToolbox compression session invalidated");
    }
}

// SAFETY: the session is only driven through &mut self; VideoToolbox
// sessions may be used from any thread, one at a time.
unsafe impl Send for VideoToolboxSession {}

impl Drop for VideoToolboxSession {
    fn drop(&mut self) {
        self.invalidate();
        if let Some(context) = self.callback_context.take() {
            // Invalidate drained every callback; this is the last reference.
            unsafe {
                let _ = Arc::from_raw(context as *const CallbackContext);
            }
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn cm_time(time: crate::core::MediaTime) -> ffi::CMTime {
    if !time.is_valid() {
        return ffi::CMTime::invalid();
    }
    match i32::try_from(time.timescale) {
        Ok(timescale) => ffi::CMTime::new(time.value, timescale),
        Err(_) => ffi::CMTime::new(
            time.convert_scale(crate::core::media_time::NANOS_TIMESCALE),
            crate::core::media_time::NANOS_TIMESCALE as i32,
        ),
    }
}

fn cf_boolean(value: bool) -> *const c_void {
    unsafe {
        if value {
            ffi::kCFBooleanTrue
        } else {
            ffi::kCFBooleanFalse
        }
    }
}

unsafe fn set_i32_property(
    session: ffi::VTCompressionSessionRef,
    key: ffi::CFStringRef,
    value: i32,
) -> ffi::OSStatus {
    unsafe {
        let number = ffi::CFNumberCreate(
            std::ptr::null(),
            ffi::K_CFNUMBER_SINT32_TYPE,
            &value as *const i32 as *const c_void,
        );
        let status = ffi::VTSessionSetProperty(session, key, number);
        ffi::CFRelease(number);
        status
    }
}

fn encode_info_flags(raw: u32) -> EncodeInfoFlags {
    let mut flags = EncodeInfoFlags::empty();
    if raw & ffi::K_VTENCODE_INFO_ASYNCHRONOUS != 0 {
        flags |= EncodeInfoFlags::ASYNCHRONOUS;
    }
    if raw & ffi::K_VTENCODE_INFO_FRAME_DROPPED != 0 {
        flags |= EncodeInfoFlags::FRAME_DROPPED;
    }
    flags
}

// ============================================================================
// VIDEOTOOLBOX CALLBACK
// ============================================================================

/// Called by VideoToolbox on its own thread for every finished frame.
extern "C" fn compression_output_callback(
    output_callback_ref_con: *mut c_void,
    _source_frame_ref_con: *mut c_void,
    status: ffi::OSStatus,
    info_flags: u32,
    sample_buffer: ffi::CMSampleBufferRef,
) {
    if output_callback_ref_con.is_null() {
        return;
    }
    // The context outlives every callback: Drop reclaims it only after
    // CompleteFrames and Invalidate.
    let context = unsafe { &*(output_callback_ref_con as *const CallbackContext) };
    let flags = encode_info_flags(info_flags);

    if status != ffi::NO_ERR {
        (context.output)(EncodeStatus::Failed(status), flags, None);
        return;
    }
    if sample_buffer.is_null() {
        (context.output)(EncodeStatus::Success, flags, None);
        return;
    }

    match unsafe { format::timed_sample_from_cm(sample_buffer) } {
        Ok(sample) => {
            let keyframe = unsafe { format::is_sync_sample(sample_buffer) };
            tracing::trace!(
                pts = %sample.pts(),
                bytes = sample.payload().len(),
                keyframe,
                "VideoToolbox frame encoded"
            );
            (context.output)(EncodeStatus::Success, flags, Some(sample));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read VideoToolbox output");
            (context.output)(EncodeStatus::Failed(-1), flags, None);
        }
    }
}
