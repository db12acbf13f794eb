// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// VideoToolbox Module
//
// Hardware H.264 compression session backing `HardwareEncoder` on macOS and
// iOS.
//
// ```
// VideoFrame (NV12 / BGRA bytes)
//     ↓ copied into CVPixelBuffer
// VTCompressionSession (async)
//     ↓ CMSampleBuffer + CMVideoFormatDescription
// TimedSample with H.264 VideoFormatDescription (avcC attached)
// ```

mod ffi;
mod format;
mod session;

pub use format::CoreMediaFormatDescription;
pub use session::{VideoToolboxSession, VideoToolboxSessionFactory};
