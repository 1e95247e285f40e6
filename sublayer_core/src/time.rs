// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame timestamps.
//!
//! [`HostTime`] counts nanoseconds from an origin the frame source picks. The
//! self-driven source measures from the moment the controller started. An
//! external source passes through whatever monotonic clock the host ticks
//! with.

use core::fmt;

/// Nanoseconds since the frame source's origin.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Converts an elapsed time since the origin, saturating past `u64::MAX`
    /// nanoseconds.
    #[must_use]
    pub fn from_offset(offset: core::time::Duration) -> Self {
        Self(u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}
