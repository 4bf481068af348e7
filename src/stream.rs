//! Asynchronous execution streams
//!
//! A [`Stream`] is an ordered queue bound to one accelerator: operations
//! enqueued on a stream execute in enqueue order relative to each other,
//! with no ordering guarantee relative to other streams unless explicitly
//! synchronized.

use crate::accelerator::AcceleratorInner;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered asynchronous execution/copy queue.
///
/// Obtained from [`crate::accelerator::Accelerator::create_stream`] or as a
/// view of the default stream. Disposing a default-stream view only
/// invalidates the view; the underlying handle lives with the accelerator.
pub struct Stream {
    accel: Arc<AcceleratorInner>,
    handle: u64,
    owned: bool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("handle", &format_args!("0x{:x}", self.handle))
            .field("owned", &self.owned)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn new(accel: Arc<AcceleratorInner>, handle: u64, owned: bool) -> Self {
        Self {
            accel,
            handle,
            owned,
            disposed: AtomicBool::new(false),
        }
    }

    /// Native stream handle, validated against disposal.
    pub(crate) fn raw_handle(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.handle)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed("stream"));
        }
        self.accel.ensure_ready()
    }

    /// Whether [`Stream::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Block until all previously enqueued operations have retired.
    /// Safe to call repeatedly.
    pub fn synchronize(&self) -> Result<()> {
        self.ensure_ready()?;
        self.accel.driver.stream_synchronize(self.handle)
    }

    /// Destroy the stream.
    ///
    /// Idempotent and infallible; a native destroy failure is logged and
    /// swallowed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.owned {
            return;
        }
        if let Err(e) = self.accel.driver.stream_synchronize(self.handle) {
            tracing::warn!(backend = %self.accel.driver.backend(), error = %e, "stream synchronize before destroy failed");
        }
        if let Err(e) = self.accel.driver.stream_destroy(self.handle) {
            tracing::warn!(backend = %self.accel.driver.backend(), error = %e, "stream destroy failed");
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.dispose();
    }
}
