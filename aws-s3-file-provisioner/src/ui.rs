/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Receives transfer progress for a single stream.
pub trait ProgressTracker: Send + Sync {
    /// `n` more bytes were transferred
    fn add(&self, n: u64);

    /// The stream is finished or abandoned. Called exactly once.
    fn close(&self);
}

/// The host's user interface sink.
pub trait Ui: Send + Sync {
    /// Emit an informational line
    fn say(&self, message: &str);

    /// Emit an error line
    fn error(&self, message: &str);

    /// Start tracking a stream named `name` that is `current` bytes into `total` bytes
    fn track_progress(&self, name: &str, current: u64, total: u64) -> Box<dyn ProgressTracker>;
}

/// A [`Ui`] writing plain lines to any [`Write`] implementation.
///
/// Progress is not drawn; it is recorded through `tracing` at `trace` level and summarised
/// at `debug` level when the stream closes.
pub struct BasicUi<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> BasicUi<W> {
    /// Create a UI over `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consume the UI, returning the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line(&self, prefix: &str, message: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(writer, "{prefix}{message}") {
            tracing::warn!("failed to write ui message: {err}");
        }
    }
}

impl<W> fmt::Debug for BasicUi<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicUi").finish_non_exhaustive()
    }
}

impl<W: Write + Send> Ui for BasicUi<W> {
    fn say(&self, message: &str) {
        tracing::info!("{message}");
        self.write_line("", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
        self.write_line("error: ", message);
    }

    fn track_progress(&self, name: &str, current: u64, total: u64) -> Box<dyn ProgressTracker> {
        Box::new(TracingProgress {
            name: name.to_owned(),
            total,
            done: AtomicU64::new(current),
        })
    }
}

#[derive(Debug)]
struct TracingProgress {
    name: String,
    total: u64,
    done: AtomicU64,
}

impl ProgressTracker for TracingProgress {
    fn add(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        tracing::trace!(name = %self.name, done, total = self.total, "progress");
    }

    fn close(&self) {
        tracing::debug!(
            name = %self.name,
            done = self.done.load(Ordering::Relaxed),
            total = self.total,
            "transfer closed"
        );
    }
}
