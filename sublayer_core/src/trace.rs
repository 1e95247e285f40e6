// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instrumentation hooks for the frame loop.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! controller calls at each stage of a tick. All method bodies default to
//! no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional shared sink. When the `trace` feature is
//! **off**, every `Tracer` method compiles to nothing. When **on**, each method
//! performs a single `Option` branch before dispatching.
//!
//! These hooks are structured data for tooling. Human-readable diagnostics go
//! through `tracing` independently of this feature.
//!
//! # Crate features
//!
//! - `trace` enables the `Tracer` method bodies (one branch per call).

use std::sync::Arc;

use crate::layer::LayerId;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of a tick is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Delivering pending reactive change notifications.
    Flush,
    /// Running the recomposition pass (frame callbacks).
    Recompose,
    /// Notifying the host that nodes changed.
    Notify,
}

/// What happened to a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerEventKind {
    /// The layer was registered.
    Created,
    /// The layer was unregistered.
    Removed,
    /// Recomposing the layer failed and it was isolated.
    Failed,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when the frame source delivers an accepted timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTickEvent {
    /// Monotonic tick counter, starting at 1.
    pub frame_index: u64,
    /// Timestamp delivered by the frame source.
    pub time: HostTime,
}

/// Marks the beginning of a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseBeginEvent {
    /// Tick counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
}

/// Marks the end of a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseEndEvent {
    /// Tick counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
}

/// Emitted after a recomposition pass completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassEvent {
    /// Tick counter.
    pub frame_index: u64,
    /// Number of layers that had pending changes and were recomposed.
    pub recomposed_layers: usize,
    /// Number of structural tree operations applied.
    pub changes: usize,
}

/// Emitted when a layer is created, removed or isolated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerEvent {
    /// The affected layer.
    pub layer: LayerId,
    /// What happened.
    pub kind: LayerEventKind,
}

/// Emitted when the host's nodes-changed callback is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodesChangedEvent {
    /// Tick counter.
    pub frame_index: u64,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame loop.
///
/// Events arrive from the controller's tasks and from whichever thread closes
/// a layer, so sinks take `&self` and must be thread safe.
pub trait TraceSink: Send + Sync {
    /// Called when a tick is accepted.
    fn on_frame_tick(&self, e: &FrameTickEvent) {
        _ = e;
    }

    /// Called at the beginning of a phase.
    fn on_phase_begin(&self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called after a recomposition pass.
    fn on_pass(&self, e: &PassEvent) {
        _ = e;
    }

    /// Called on layer lifecycle changes.
    fn on_layer(&self, e: &LayerEvent) {
        _ = e;
    }

    /// Called when the host is told that nodes changed.
    fn on_nodes_changed(&self, e: &NodesChangedEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin, cloneable wrapper around an optional shared [`TraceSink`].
#[derive(Clone, Default)]
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Arc<dyn TraceSink>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {}
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Emits a [`FrameTickEvent`].
    #[inline]
    pub fn frame_tick(&self, e: &FrameTickEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_frame_tick(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&self, frame_index: u64, phase: PhaseKind) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_phase_begin(&PhaseBeginEvent { frame_index, phase });
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = (frame_index, phase);
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&self, frame_index: u64, phase: PhaseKind) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_phase_end(&PhaseEndEvent { frame_index, phase });
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = (frame_index, phase);
        }
    }

    /// Emits a [`PassEvent`].
    #[inline]
    pub fn pass(&self, e: &PassEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_pass(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`LayerEvent`].
    #[inline]
    pub fn layer(&self, layer: LayerId, kind: LayerEventKind) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_layer(&LayerEvent { layer, kind });
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = (layer, kind);
        }
    }

    /// Emits a [`NodesChangedEvent`].
    #[inline]
    pub fn nodes_changed(&self, frame_index: u64) {
        #[cfg(feature = "trace")]
        if let Some(s) = &self.sink {
            s.on_nodes_changed(&NodesChangedEvent { frame_index });
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = frame_index;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
