// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A frame clock that broadcasts each frame to everyone waiting for it.
//!
//! Work that must happen "on the next frame" registers a callback with
//! [`BroadcastFrameClock::post_frame_callback`] (or awaits
//! [`BroadcastFrameClock::with_frame`]). The controller's delivery task calls
//! [`send_frame`](BroadcastFrameClock::send_frame) once per tick when
//! [`has_awaiters`](BroadcastFrameClock::has_awaiters) reports pending work.
//!
//! Callbacks run synchronously on the thread that sends the frame, in
//! registration order. A callback registered while a frame is being sent
//! waits for the following frame, which is what bounds the recomposition
//! pass to one per tick.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::Error;
use crate::sync::lock;
use crate::time::HostTime;

/// A callback run once with the timestamp of the next frame.
pub type FrameCallback = Box<dyn FnOnce(HostTime) + Send>;

struct ClockInner {
    awaiters: Mutex<Vec<FrameCallback>>,
    cancelled: AtomicBool,
    frames_sent: AtomicU64,
}

/// Broadcasts frame timestamps to registered callbacks.
///
/// Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct BroadcastFrameClock {
    inner: Arc<ClockInner>,
}

impl Default for BroadcastFrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastFrameClock {
    /// Creates a clock with no awaiters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                awaiters: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
                frames_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `callback` to run with the next frame's timestamp.
    ///
    /// After [`cancel`](Self::cancel) the callback is dropped unrun.
    pub fn post_frame_callback(&self, callback: FrameCallback) {
        if self.is_cancelled() {
            return;
        }
        lock(&self.inner.awaiters).push(callback);
    }

    /// Waits for the next frame and returns `f(frame_time)`.
    ///
    /// Returns [`Error::Closed`] if the clock is cancelled before a frame is
    /// sent.
    pub async fn with_frame<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce(HostTime) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post_frame_callback(Box::new(move |time| {
            _ = tx.send(f(time));
        }));
        rx.await.map_err(|_| Error::Closed)
    }

    /// Returns `true` if any callback is waiting for a frame.
    #[must_use]
    pub fn has_awaiters(&self) -> bool {
        !lock(&self.inner.awaiters).is_empty()
    }

    /// Runs every callback registered before this call with `time` and
    /// returns how many ran.
    pub fn send_frame(&self, time: HostTime) -> usize {
        let callbacks = core::mem::take(&mut *lock(&self.inner.awaiters));
        if callbacks.is_empty() {
            return 0;
        }
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        let ran = callbacks.len();
        for callback in callbacks {
            callback(time);
        }
        ran
    }

    /// Drops every pending callback and refuses new ones.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let dropped = core::mem::take(&mut *lock(&self.inner.awaiters));
        drop(dropped);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns how many frames actually ran callbacks.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for BroadcastFrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastFrameClock")
            .field("has_awaiters", &self.has_awaiters())
            .field("cancelled", &self.is_cancelled())
            .field("frames_sent", &self.frames_sent())
            .finish()
    }
}
