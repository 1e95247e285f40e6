// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame-aligned scheduling of flushes and recomposition passes.
//!
//! Two independent flags keep work bounded to one unit per tick:
//!
//! ```text
//!   reactive write (any thread)
//!       │ ApplyGate::schedule()           at most one flush per tick
//!       ▼
//!   tick ── take() ──► StateSystem::send_apply_notifications()
//!                            │ compositions invalidate
//!                            ▼
//!   RecomposeScheduler::request()         at most one pass per tick
//!       │ posts one frame callback
//!       ▼
//!   tick ── BroadcastFrameClock::send_frame() ──► pass over every layer
//! ```
//!
//! Both flags are reset when the work they guard *starts*, so anything that
//! happens during a flush or a pass is picked up by the next tick rather than
//! lost or run reentrantly.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use crate::clock::BroadcastFrameClock;
use crate::engine::{Engine, Invalidator};
use crate::error::Error;
use crate::layer::{LayerManager, WeakLayerManager};
use crate::node::TreeNode;
use crate::sync::lock;
use crate::time::HostTime;
use crate::trace::{LayerEventKind, PassEvent, Tracer};

// -- Apply gate --

/// Coalesces reactive writes into a single pending flush.
///
/// Safe to use from any thread.
#[derive(Debug, Default)]
pub struct ApplyGate {
    scheduled: AtomicBool,
}

impl ApplyGate {
    /// Creates an unarmed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicBool::new(false),
        }
    }

    /// Arms the gate. Returns `true` only for the call that armed it.
    pub fn schedule(&self) -> bool {
        self.scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Disarms the gate, returning whether a flush was pending.
    pub fn take(&self) -> bool {
        self.scheduled.swap(false, Ordering::AcqRel)
    }

    /// Returns `true` if a flush is pending.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

// -- Failure policy --

/// What a recomposition pass does when one layer fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayerFailurePolicy {
    /// Record the error and shut the controller down.
    #[default]
    AbortController,
    /// Mark the failing layer [`Failed`](crate::LayerState::Failed), keep it
    /// registered but skipped, and continue with the other layers.
    IsolateLayer,
}

// -- Pass execution --

/// Summary of one completed recomposition pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassReport {
    /// Tick the pass ran in.
    pub frame_index: u64,
    /// Frame timestamp the pass ran with.
    pub time: HostTime,
    /// Number of layers that had pending changes.
    pub recomposed_layers: usize,
    /// Number of structural tree operations applied.
    pub changes: usize,
}

pub(crate) struct RecomposeScheduler<N: TreeNode, E: Engine<N>> {
    /// A pass callback is posted on the clock.
    scheduled: AtomicBool,
    /// A pass produced structural changes the host has not been told about.
    changed: AtomicBool,
    frame_index: AtomicU64,
    clock: BroadcastFrameClock,
    manager: OnceLock<WeakLayerManager<N, E>>,
    policy: LayerFailurePolicy,
    token: CancellationToken,
    failure: Mutex<Option<Error>>,
    reports: mpsc::UnboundedSender<PassReport>,
    tracer: Tracer,
}

impl<N: TreeNode, E: Engine<N>> RecomposeScheduler<N, E> {
    pub(crate) fn new(
        clock: BroadcastFrameClock,
        policy: LayerFailurePolicy,
        token: CancellationToken,
        reports: mpsc::UnboundedSender<PassReport>,
        tracer: Tracer,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduled: AtomicBool::new(false),
            changed: AtomicBool::new(false),
            frame_index: AtomicU64::new(0),
            clock,
            manager: OnceLock::new(),
            policy,
            token,
            failure: Mutex::new(None),
            reports,
            tracer,
        })
    }

    /// Returns an invalidator that requests passes from this scheduler
    /// without keeping it alive.
    pub(crate) fn invalidator(self: &Arc<Self>) -> Invalidator {
        let weak = Arc::downgrade(self);
        Invalidator::new(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.request();
            }
        })
    }

    /// Binds the registry whose layers each pass recomposes.
    pub(crate) fn attach(&self, manager: &LayerManager<N, E>) {
        _ = self.manager.set(manager.downgrade());
    }

    /// Posts a pass for the next frame unless one is already posted.
    pub(crate) fn request(self: &Arc<Self>) {
        if self.token.is_cancelled() || self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        self.clock.post_frame_callback(Box::new(move |time| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.run_pass(time);
            }
        }));
    }

    /// Records the tick the next pass belongs to.
    pub(crate) fn begin_frame(&self, frame_index: u64) {
        self.frame_index.store(frame_index, Ordering::Release);
    }

    /// Returns whether a pass changed the tree since the last call.
    pub(crate) fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }

    /// Returns the error that aborted the controller, if any.
    pub(crate) fn failure(&self) -> Option<Error> {
        lock(&self.failure).clone()
    }

    fn run_pass(&self, time: HostTime) {
        self.scheduled.store(false, Ordering::Release);
        if self.token.is_cancelled() {
            return;
        }
        let Some(manager) = self.manager.get().and_then(WeakLayerManager::upgrade) else {
            return;
        };
        let mut report = PassReport {
            frame_index: self.frame_index.load(Ordering::Acquire),
            time,
            recomposed_layers: 0,
            changes: 0,
        };

        for layer in manager.layers() {
            match layer.recompose() {
                Ok(None) => {}
                Ok(Some(changes)) => {
                    report.recomposed_layers += 1;
                    report.changes += changes;
                }
                Err(err) => match self.policy {
                    LayerFailurePolicy::AbortController => {
                        error!(
                            layer = ?layer.id(),
                            error = %err,
                            "recomposition failed; shutting down"
                        );
                        {
                            let mut failure = lock(&self.failure);
                            if failure.is_none() {
                                *failure = Some(err);
                            }
                        }
                        self.token.cancel();
                        // Layers recomposed before the failure did mutate.
                        self.finish(report);
                        return;
                    }
                    LayerFailurePolicy::IsolateLayer => {
                        warn!(
                            layer = ?layer.id(),
                            error = %err,
                            "recomposition failed; isolating layer"
                        );
                        layer.isolate();
                        self.tracer.layer(layer.id(), LayerEventKind::Failed);
                    }
                },
            }
        }
        self.finish(report);
    }

    fn finish(&self, report: PassReport) {
        if report.changes > 0 {
            self.changed.store(true, Ordering::Release);
        }
        trace!(
            frame = report.frame_index,
            layers = report.recomposed_layers,
            changes = report.changes,
            "recomposition pass"
        );
        self.tracer.pass(&PassEvent {
            frame_index: report.frame_index,
            recomposed_layers: report.recomposed_layers,
            changes: report.changes,
        });
        // The receiver is gone once the controller shuts down.
        _ = self.reports.send(report);
    }
}

impl<N: TreeNode, E: Engine<N>> fmt::Debug for RecomposeScheduler<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomposeScheduler")
            .field("scheduled", &self.scheduled.load(Ordering::Relaxed))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
