// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Apple platform backends.

pub mod videotoolbox;

pub use videotoolbox::{CoreMediaFormatDescription, VideoToolboxSession, VideoToolboxSessionFactory};
