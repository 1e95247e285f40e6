// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Where frame timestamps come from.
//!
//! The controller either paces itself with a tokio interval
//! ([`FrameTiming::SelfDriven`]) or follows timestamps pushed by the host
//! ([`FrameTiming::External`]), typically forwarded from a display link or a
//! `requestAnimationFrame` callback. External timing is also what tests use
//! to step the frame loop deterministically.

use core::fmt;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::time::HostTime;

/// Default self-driven frame interval (60 Hz).
pub const DEFAULT_FRAME_INTERVAL: core::time::Duration =
    core::time::Duration::from_nanos(16_666_667);

/// How the controller obtains frame timestamps.
pub enum FrameTiming {
    /// Tick on a fixed interval. Timestamps count nanoseconds since the
    /// frame loop started; missed ticks are skipped rather than replayed.
    SelfDriven {
        /// Time between ticks.
        interval: core::time::Duration,
    },
    /// Tick whenever the host sends a timestamp. Closing the sender shuts the
    /// controller down.
    External(mpsc::Receiver<HostTime>),
}

impl FrameTiming {
    /// Self-driven timing at 60 Hz.
    #[must_use]
    pub const fn self_driven() -> Self {
        Self::SelfDriven {
            interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    /// External timing fed through a bounded channel of `capacity` pending
    /// timestamps. Returns the sender the host pushes timestamps into.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<HostTime>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::External(rx))
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::self_driven()
    }
}

impl fmt::Debug for FrameTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfDriven { interval } => f
                .debug_struct("SelfDriven")
                .field("interval", interval)
                .finish(),
            Self::External(_) => f.debug_struct("External").finish_non_exhaustive(),
        }
    }
}

/// The running form of a [`FrameTiming`]. Must be created inside a runtime.
pub(crate) enum FrameSource {
    Interval { interval: Interval, origin: Instant },
    Channel(mpsc::Receiver<HostTime>),
}

impl FrameSource {
    pub(crate) fn new(timing: FrameTiming) -> Self {
        match timing {
            FrameTiming::SelfDriven { interval: period } => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Self::Interval {
                    interval,
                    origin: Instant::now(),
                }
            }
            FrameTiming::External(rx) => Self::Channel(rx),
        }
    }

    /// Waits for the next timestamp; `None` once the source is exhausted.
    pub(crate) async fn next_frame(&mut self) -> Option<HostTime> {
        match self {
            Self::Interval { interval, origin } => {
                let at = interval.tick().await;
                Some(HostTime::from_offset(at.saturating_duration_since(*origin)))
            }
            Self::Channel(rx) => rx.recv().await,
        }
    }
}
