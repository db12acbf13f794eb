// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// VideoToolbox FFI Bindings
//
// Foreign function interface declarations for VideoToolbox, CoreMedia,
// CoreVideo and CoreFoundation used by the compression session backend.

use std::ffi::{c_char, c_void};

pub(super) type OSStatus = i32;
pub(super) type VTCompressionSessionRef = *mut c_void;
pub(super) type CVPixelBufferRef = *mut c_void;
pub(super) type CMSampleBufferRef = *mut c_void;
pub(super) type CMTimeValue = i64;
pub(super) type CMTimeScale = i32;
pub(super) type CMTimeFlags = u32;
pub(super) type CFStringRef = *const c_void;
pub(super) type CFNumberRef = *const c_void;
pub(super) type CFBooleanRef = *const c_void;
pub(super) type CFDataRef = *const c_void;
pub(super) type CMBlockBufferRef = *mut c_void;
pub(super) type CMFormatDescriptionRef = *mut c_void;
pub(super) type CFArrayRef = *const c_void;
pub(super) type CFDictionaryRef = *const c_void;

#[repr(C)]
#[derive(Clone, Copy)]
pub(super) struct CMTime {
    pub value: CMTimeValue,
    pub timescale: CMTimeScale,
    pub flags: CMTimeFlags,
    pub epoch: i64,
}

const K_CMTIME_FLAGS_VALID: CMTimeFlags = 1;

impl CMTime {
    pub fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale,
            flags: K_CMTIME_FLAGS_VALID,
            epoch: 0,
        }
    }

    pub fn invalid() -> Self {
        Self {
            value: 0,
            timescale: 0,
            flags: 0,
            epoch: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & K_CMTIME_FLAGS_VALID != 0 && self.timescale > 0
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(super) struct CMVideoDimensions {
    pub width: i32,
    pub height: i32,
}

pub(super) const NO_ERR: OSStatus = 0;
pub(super) const K_CVRETURN_SUCCESS: i32 = 0;

// Codec types
pub(super) const K_CMVIDEO_CODEC_TYPE_H264: u32 = 0x61766331; // 'avc1'

// Pixel formats
pub(super) const K_CVPIXEL_FORMAT_TYPE_NV12: u32 = 0x34323076; // '420v'
pub(super) const K_CVPIXEL_FORMAT_TYPE_BGRA: u32 = 0x42475241; // 'BGRA'

// VTEncodeInfoFlags
pub(super) const K_VTENCODE_INFO_ASYNCHRONOUS: u32 = 1 << 0;
pub(super) const K_VTENCODE_INFO_FRAME_DROPPED: u32 = 1 << 1;

// CFNumber types
pub(super) const K_CFNUMBER_SINT32_TYPE: i32 = 3;

pub(super) const K_CFSTRING_ENCODING_UTF8: u32 = 0x0800_0100;

// VTCompressionSession callback type
pub(super) type VTCompressionOutputCallback = extern "C" fn(
    output_callback_ref_con: *mut c_void,
    source_frame_ref_con: *mut c_void,
    status: OSStatus,
    info_flags: u32,
    sample_buffer: CMSampleBufferRef,
);

#[link(name = "VideoToolbox", kind = "framework")]
unsafe extern "C" {
    pub(super) fn VTCompressionSessionCreate(
        allocator: *const c_void,
        width: i32,
        height: i32,
        codec_type: u32,
        encoder_specification: *const c_void,
        source_image_buffer_attributes: *const c_void,
        compressed_data_allocator: *const c_void,
        output_callback: VTCompressionOutputCallback,
        output_callback_ref_con: *mut c_void,
        compression_session_out: *mut VTCompressionSessionRef,
    ) -> OSStatus;

    pub(super) fn VTCompressionSessionEncodeFrame(
        session: VTCompressionSessionRef,
        image_buffer: CVPixelBufferRef,
        presentation_time_stamp: CMTime,
        duration: CMTime,
        frame_properties: *const c_void,
        source_frame_ref_con: *mut c_void,
        info_flags_out: *mut u32,
    ) -> OSStatus;

    pub(super) fn VTCompressionSessionCompleteFrames(
        session: VTCompressionSessionRef,
        complete_until_presentation_time_stamp: CMTime,
    ) -> OSStatus;

    pub(super) fn VTCompressionSessionInvalidate(session: VTCompressionSessionRef);

    pub(super) fn VTSessionSetProperty(
        session: VTCompressionSessionRef,
        property_key: CFStringRef,
        property_value: *const c_void,
    ) -> OSStatus;

    // Property keys
    pub(super) static kVTCompressionPropertyKey_ProfileLevel: CFStringRef;
    pub(super) static kVTCompressionPropertyKey_RealTime: CFStringRef;
    pub(super) static kVTCompressionPropertyKey_AllowFrameReordering: CFStringRef;
    pub(super) static kVTCompressionPropertyKey_AverageBitRate: CFStringRef;
    pub(super) static kVTCompressionPropertyKey_ExpectedFrameRate: CFStringRef;
    pub(super) static kVTCompressionPropertyKey_H264EntropyMode: CFStringRef;

    // Property values
    pub(super) static kVTProfileLevel_H264_Baseline_AutoLevel: CFStringRef;
    pub(super) static kVTProfileLevel_H264_Main_AutoLevel: CFStringRef;
    pub(super) static kVTProfileLevel_H264_High_AutoLevel: CFStringRef;
    pub(super) static kVTH264EntropyMode_CAVLC: CFStringRef;
    pub(super) static kVTH264EntropyMode_CABAC: CFStringRef;
}

#[link(name = "CoreMedia", kind = "framework")]
unsafe extern "C" {
    pub(super) fn CMSampleBufferGetDataBuffer(sbuf: CMSampleBufferRef) -> CMBlockBufferRef;

    pub(super) fn CMSampleBufferDataIsReady(sbuf: CMSampleBufferRef) -> bool;

    pub(super) fn CMSampleBufferGetPresentationTimeStamp(sbuf: CMSampleBufferRef) -> CMTime;

    pub(super) fn CMSampleBufferGetDuration(sbuf: CMSampleBufferRef) -> CMTime;

    pub(super) fn CMBlockBufferGetDataLength(the_buffer: CMBlockBufferRef) -> usize;

    pub(super) fn CMBlockBufferCopyDataBytes(
        the_buffer: CMBlockBufferRef,
        offset_to_data: usize,
        data_length: usize,
        destination: *mut u8,
    ) -> OSStatus;

    pub(super) fn CMSampleBufferGetFormatDescription(
        sbuf: CMSampleBufferRef,
    ) -> CMFormatDescriptionRef;

    pub(super) fn CMVideoFormatDescriptionGetH264ParameterSetAtIndex(
        video_desc: CMFormatDescriptionRef,
        parameter_set_index: usize,
        parameter_set_pointer_out: *mut *const u8,
        parameter_set_size_out: *mut usize,
        parameter_set_count_out: *mut usize,
        nal_unit_header_length_out: *mut i32,
    ) -> OSStatus;

    pub(super) fn CMVideoFormatDescriptionGetDimensions(
        video_desc: CMFormatDescriptionRef,
    ) -> CMVideoDimensions;

    pub(super) fn CMFormatDescriptionGetExtension(
        desc: CMFormatDescriptionRef,
        extension_key: CFStringRef,
    ) -> *const c_void;

    // Keyframe detection via sample attachments
    pub(super) fn CMSampleBufferGetSampleAttachmentsArray(
        sbuf: CMSampleBufferRef,
        create_if_necessary: bool,
    ) -> CFArrayRef;

    pub(super) static kCMSampleAttachmentKey_NotSync: CFStringRef;
    pub(super) static kCMFormatDescriptionExtension_SampleDescriptionExtensionAtoms: CFStringRef;
}

#[link(name = "CoreVideo", kind = "framework")]
unsafe extern "C" {
    pub(super) fn CVPixelBufferCreate(
        allocator: *const c_void,
        width: usize,
        height: usize,
        pixel_format_type: u32,
        pixel_buffer_attributes: CFDictionaryRef,
        pixel_buffer_out: *mut CVPixelBufferRef,
    ) -> i32;

    pub(super) fn CVPixelBufferLockBaseAddress(pixel_buffer: CVPixelBufferRef, flags: u64) -> i32;

    pub(super) fn CVPixelBufferUnlockBaseAddress(pixel_buffer: CVPixelBufferRef, flags: u64)
        -> i32;

    pub(super) fn CVPixelBufferGetBaseAddressOfPlane(
        pixel_buffer: CVPixelBufferRef,
        plane_index: usize,
    ) -> *mut c_void;

    pub(super) fn CVPixelBufferGetBytesPerRowOfPlane(
        pixel_buffer: CVPixelBufferRef,
        plane_index: usize,
    ) -> usize;
}

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    pub(super) fn CFNumberCreate(
        allocator: *const c_void,
        the_type: i32,
        value_ptr: *const c_void,
    ) -> CFNumberRef;

    pub(super) fn CFRetain(cf: *const c_void) -> *const c_void;

    pub(super) fn CFRelease(cf: *const c_void);

    pub(super) fn CFArrayGetCount(the_array: CFArrayRef) -> isize;

    pub(super) fn CFArrayGetValueAtIndex(the_array: CFArrayRef, idx: isize) -> *const c_void;

    pub(super) fn CFDictionaryGetValue(the_dict: CFDictionaryRef, key: *const c_void)
        -> *const c_void;

    pub(super) fn CFDataGetLength(the_data: CFDataRef) -> isize;

    pub(super) fn CFDataGetBytePtr(the_data: CFDataRef) -> *const u8;

    pub(super) fn CFStringCreateWithCString(
        allocator: *const c_void,
        c_str: *const c_char,
        encoding: u32,
    ) -> CFStringRef;

    pub(super) static kCFBooleanTrue: CFBooleanRef;
    pub(super) static kCFBooleanFalse: CFBooleanRef;
}
