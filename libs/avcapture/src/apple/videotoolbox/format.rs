// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// CoreMedia format descriptions and sample buffers
//
// Converts what a compression session hands back (CMSampleBuffer with an
// attached CMVideoFormatDescription) into the pipeline's own TimedSample and
// VideoFormatDescription types.

use bytes::Bytes;
use std::ffi::CString;
use std::sync::Arc;

use super::ffi;
use crate::core::codec::ParameterSets;
use crate::core::format::{H264ParameterSetSource, VideoFormatDescription};
use crate::core::{
    CaptureError, FormatDescription, MediaKind, MediaTime, Result, SampleTiming, TimedSample,
};

// ============================================================================
// FORMAT DESCRIPTION
// ============================================================================

/// Retained CMVideoFormatDescription.
pub struct CoreMediaFormatDescription {
    raw: ffi::CMFormatDescriptionRef,
}

impl CoreMediaFormatDescription {
    /// Retain `raw`. Returns `None` for a null description.
    ///
    /// # Safety
    /// `raw` must be null or a valid CMFormatDescriptionRef.
    pub(super) unsafe fn retain(raw: ffi::CMFormatDescriptionRef) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        unsafe { ffi::CFRetain(raw as *const _) };
        Some(Self { raw })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let dims = unsafe { ffi::CMVideoFormatDescriptionGetDimensions(self.raw) };
        (dims.width.max(0) as u32, dims.height.max(0) as u32)
    }

    /// Convert into the pipeline's H.264 description, preferring the attached
    /// `avcC` atom when present.
    pub fn to_video_format_description(&self) -> Result<VideoFormatDescription> {
        let (width, height) = self.dimensions();
        let sets = ParameterSets::from_format_description(self);
        if let Some(avcc) = sets.avcc() {
            return VideoFormatDescription::h264_from_avcc(width, height, avcc.clone());
        }
        let (Some(sps), Some(pps)) = (sets.sps(), sets.pps()) else {
            return Err(CaptureError::Format(
                "CoreMedia description carries no SPS/PPS".into(),
            ));
        };
        VideoFormatDescription::h264(
            width,
            height,
            vec![sps.clone(), pps.clone()],
            sets.nal_header_length(),
        )
    }
}

impl H264ParameterSetSource for CoreMediaFormatDescription {
    fn h264_parameter_set_info(&self) -> Result<(usize, u8)> {
        let mut count: usize = 0;
        let mut nal_header_length: i32 = 0;
        let status = unsafe {
            ffi::CMVideoFormatDescriptionGetH264ParameterSetAtIndex(
                self.raw,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut count,
                &mut nal_header_length,
            )
        };
        if status != ffi::NO_ERR {
            return Err(CaptureError::Format(format!(
                "parameter set count query failed: {}",
                status
            )));
        }
        Ok((count, nal_header_length.clamp(0, 4) as u8))
    }

    fn h264_parameter_set_at(&self, index: usize) -> Result<&[u8]> {
        let mut pointer: *const u8 = std::ptr::null();
        let mut size: usize = 0;
        let status = unsafe {
            ffi::CMVideoFormatDescriptionGetH264ParameterSetAtIndex(
                self.raw,
                index,
                &mut pointer,
                &mut size,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if status != ffi::NO_ERR || pointer.is_null() {
            return Err(CaptureError::Format(format!(
                "parameter set {} unavailable: {}",
                index, status
            )));
        }
        // The bytes live as long as the retained description.
        Ok(unsafe { std::slice::from_raw_parts(pointer, size) })
    }

    fn extension_atom(&self, name: &str) -> Option<Bytes> {
        let name = CString::new(name).ok()?;
        unsafe {
            let atoms = ffi::CMFormatDescriptionGetExtension(
                self.raw,
                ffi::kCMFormatDescriptionExtension_SampleDescriptionExtensionAtoms,
            );
            if atoms.is_null() {
                return None;
            }
            let key = ffi::CFStringCreateWithCString(
                std::ptr::null(),
                name.as_ptr(),
                ffi::K_CFSTRING_ENCODING_UTF8,
            );
            if key.is_null() {
                return None;
            }
            let data = ffi::CFDictionaryGetValue(atoms, key);
            ffi::CFRelease(key);
            if data.is_null() {
                return None;
            }
            let length = ffi::CFDataGetLength(data).max(0) as usize;
            let bytes = ffi::CFDataGetBytePtr(data);
            if bytes.is_null() || length == 0 {
                return None;
            }
            Some(Bytes::copy_from_slice(std::slice::from_raw_parts(
                bytes, length,
            )))
        }
    }
}

impl Drop for CoreMediaFormatDescription {
    fn drop(&mut self) {
        unsafe { ffi::CFRelease(self.raw as *const _) };
    }
}

// SAFETY: CMFormatDescription is immutable and CoreFoundation reference
// counting is thread safe.
unsafe impl Send for CoreMediaFormatDescription {}
unsafe impl Sync for CoreMediaFormatDescription {}

// ============================================================================
// SAMPLE BUFFER
// ============================================================================

pub(super) fn media_time_from_cm(time: ffi::CMTime) -> MediaTime {
    if time.is_valid() {
        MediaTime::new(time.value, time.timescale as u32)
    } else {
        MediaTime::INVALID
    }
}

/// Sync frames carry no `NotSync` attachment.
///
/// # Safety
/// `sample_buffer` must be a valid CMSampleBufferRef.
pub(super) unsafe fn is_sync_sample(sample_buffer: ffi::CMSampleBufferRef) -> bool {
    unsafe {
        let attachments = ffi::CMSampleBufferGetSampleAttachmentsArray(sample_buffer, false);
        if attachments.is_null() || ffi::CFArrayGetCount(attachments) == 0 {
            return true;
        }
        let attachment = ffi::CFArrayGetValueAtIndex(attachments, 0);
        if attachment.is_null() {
            return true;
        }
        ffi::CFDictionaryGetValue(attachment, ffi::kCMSampleAttachmentKey_NotSync).is_null()
    }
}

/// Copy an encoded sample buffer into a [`TimedSample`] with an H.264 format.
///
/// # Safety
/// `sample_buffer` must be a valid CMSampleBufferRef for the duration of the
/// call.
pub(super) unsafe fn timed_sample_from_cm(
    sample_buffer: ffi::CMSampleBufferRef,
) -> Result<TimedSample> {
    unsafe {
        let pts = media_time_from_cm(ffi::CMSampleBufferGetPresentationTimeStamp(sample_buffer));
        let duration = media_time_from_cm(ffi::CMSampleBufferGetDuration(sample_buffer));
        let mut timing = SampleTiming::new(pts);
        if duration.is_valid() {
            timing = timing.with_duration(duration);
        }

        let format = CoreMediaFormatDescription::retain(ffi::CMSampleBufferGetFormatDescription(
            sample_buffer,
        ))
        .map(|description| description.to_video_format_description())
        .transpose()?
        .map(|video| Arc::new(FormatDescription::Video(video)));

        if !ffi::CMSampleBufferDataIsReady(sample_buffer) {
            return Ok(TimedSample::pending(MediaKind::Video, timing, format));
        }

        let block_buffer = ffi::CMSampleBufferGetDataBuffer(sample_buffer);
        if block_buffer.is_null() {
            return Err(CaptureError::Encoder(
                "CMSampleBufferGetDataBuffer returned null".into(),
            ));
        }
        let data_length = ffi::CMBlockBufferGetDataLength(block_buffer);
        let mut data = vec![0u8; data_length];
        let status =
            ffi::CMBlockBufferCopyDataBytes(block_buffer, 0, data_length, data.as_mut_ptr());
        if status != ffi::NO_ERR {
            return Err(CaptureError::Encoder(format!(
                "CMBlockBufferCopyDataBytes failed: {}",
                status
            )));
        }

        TimedSample::new(MediaKind::Video, timing, Bytes::from(data), format)
    }
}
