/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::ui::ProgressTracker;

/// Closes the tracker when the owning reader goes away, whatever the exit path.
struct TrackerGuard(Box<dyn ProgressTracker>);

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl fmt::Debug for TrackerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerGuard(dyn ProgressTracker)").finish()
    }
}

pin_project! {
    /// A wrapper around a Tokio [`AsyncRead`] that reports every byte read to a
    /// [`ProgressTracker`].
    ///
    /// The tracker is closed when the reader is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use aws_s3_file_provisioner::io::ProgressReader;
    /// use aws_s3_file_provisioner::ui::Ui;
    /// use tokio::io::AsyncRead;
    ///
    /// fn track<T: AsyncRead>(ui: &impl Ui, inner: T, total: u64) -> ProgressReader<T> {
    ///     ProgressReader::new(inner, ui.track_progress("payload", 0, total))
    /// }
    /// ```
    #[derive(Debug)]
    pub struct ProgressReader<R> {
        #[pin]
        inner: R,
        tracker: TrackerGuard,
        bytes_read: u64,
    }
}

impl<R> ProgressReader<R> {
    /// Wrap a reader, reporting to `tracker`
    pub fn new(inner: R, tracker: Box<dyn ProgressTracker>) -> Self {
        Self {
            inner,
            tracker: TrackerGuard(tracker),
            bytes_read: 0,
        }
    }

    /// Total bytes read through this wrapper so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Borrow the inner reader
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: AsyncRead> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;
        if n > 0 {
            *this.bytes_read += n;
            this.tracker.0.add(n);
        }
        Poll::Ready(Ok(()))
    }
}
