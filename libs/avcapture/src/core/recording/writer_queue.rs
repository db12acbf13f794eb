// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Serial writer queue
//
// Every operation that touches a FileSink runs on one named worker thread, in
// submission order. Capture threads only ever enqueue. A Finish command sits
// behind the appends submitted before it, so stopping never truncates output,
// and Barrier gives callers an explicit join point.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::JoinHandle;

use crate::core::sinks::FileSink;
use crate::core::{CaptureError, Result, TimedSample};

enum Command {
    Install { id: u64, sink: Box<FileSink> },
    Append { id: u64, sample: TimedSample },
    Finish { id: u64, silent: bool },
    Barrier(Sender<()>),
}

pub struct WriterQueue {
    sender: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl WriterQueue {
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let span = tracing::info_span!("writer_queue", queue = name);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = span.entered();
                run_queue(receiver);
            })
            .map_err(|e| CaptureError::Writer(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Make `sink` the queue's active sink under `id`. Any previous sink is
    /// finished silently first.
    pub fn install(&self, id: u64, sink: FileSink) {
        self.send(Command::Install {
            id,
            sink: Box::new(sink),
        });
    }

    /// Samples for an id other than the active one are dropped.
    pub fn append(&self, id: u64, sample: TimedSample) {
        self.send(Command::Append { id, sample });
    }

    pub fn finish(&self, id: u64, silent: bool) {
        self.send(Command::Finish { id, silent });
    }

    /// Block until every command submitted before this call has executed.
    pub fn flush(&self) {
        let (done, wait) = bounded(1);
        self.send(Command::Barrier(done));
        // A disconnect means the worker is gone, which also ends the wait.
        let _ = wait.recv();
    }

    fn send(&self, command: Command) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(command).is_err() {
            tracing::error!("Writer queue worker is gone, command dropped");
        }
    }
}

impl Drop for WriterQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Writer queue worker panicked");
            }
        }
    }
}

fn run_queue(receiver: Receiver<Command>) {
    let mut active: Option<(u64, Box<FileSink>)> = None;

    for command in receiver.iter() {
        match command {
            Command::Install { id, sink } => {
                if let Some((previous, mut sink)) = active.take() {
                    tracing::warn!(id = previous, "Replacing an unfinished recording");
                    sink.finish(true);
                }
                if sink.has_failed() {
                    tracing::debug!(id, "Not installing a failed sink");
                    continue;
                }
                active = Some((id, sink));
            }
            Command::Append { id, sample } => {
                let Some((active_id, sink)) = active.as_mut() else {
                    continue;
                };
                if *active_id != id {
                    continue;
                }
                sink.append(sample);
                if sink.has_failed() {
                    tracing::warn!(id, "Sink failed, finishing and clearing it");
                    sink.finish(true);
                    active = None;
                }
            }
            Command::Finish { id, silent } => {
                if !active.as_ref().is_some_and(|(active_id, _)| *active_id == id) {
                    tracing::debug!(id, "Finish for an inactive recording ignored");
                    continue;
                }
                if let Some((_, mut sink)) = active.take() {
                    sink.finish(silent);
                }
            }
            Command::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    if let Some((id, mut sink)) = active.take() {
        tracing::warn!(id, "Writer queue closing with an active recording, finishing it");
        sink.finish(false);
    }
}
