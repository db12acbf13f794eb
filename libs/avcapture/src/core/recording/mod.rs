// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Recording lifecycle and the serial queue all sink work runs on.

mod controller;
mod writer_queue;

pub use controller::{recording_file_path, RecordingConfig, RecordingController, RecordingHandle};
pub use writer_queue::WriterQueue;
