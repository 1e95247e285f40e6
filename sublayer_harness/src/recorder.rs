// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recorders for asserting on what the frame loop did.
//!
//! [`RecordingApplier`] logs every structural tree mutation a layer applies,
//! and [`RecordingSink`] logs every trace event the controller emits.

use std::sync::{Arc, Mutex};

use sublayer_core::trace::{
    FrameTickEvent, LayerEvent, LayerEventKind, NodesChangedEvent, PassEvent, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, TraceSink,
};
use sublayer_core::{Applier, Error, LayerId, NodeApplier};

use crate::node::MemoryNode;
use crate::sync::lock;

/// A structural mutation, with nodes named by label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedOp {
    /// `node` was inserted under `parent` at `index`.
    Insert {
        /// Label of the parent.
        parent: String,
        /// Target index.
        index: usize,
        /// Label of the inserted node.
        node: String,
    },
    /// `count` children of `parent` were removed from `index`.
    Remove {
        /// Label of the parent.
        parent: String,
        /// First removed index.
        index: usize,
        /// Number of removed children.
        count: usize,
    },
    /// `count` children of `parent` were moved.
    Move {
        /// Label of the parent.
        parent: String,
        /// Start of the run.
        from: usize,
        /// Destination index.
        to: usize,
        /// Length of the run.
        count: usize,
    },
    /// Every child of `root` was removed.
    Clear {
        /// Label of the root.
        root: String,
    },
}

impl RecordedOp {
    /// Shorthand for a removal under `parent`.
    #[must_use]
    pub fn remove(parent: &str, index: usize, count: usize) -> Self {
        Self::Remove {
            parent: parent.to_owned(),
            index,
            count,
        }
    }

    /// Shorthand for an insertion under `parent`.
    #[must_use]
    pub fn insert(parent: &str, index: usize, node: &str) -> Self {
        Self::Insert {
            parent: parent.to_owned(),
            index,
            node: node.to_owned(),
        }
    }

    /// Shorthand for a move under `parent`.
    #[must_use]
    pub fn moved(parent: &str, from: usize, to: usize, count: usize) -> Self {
        Self::Move {
            parent: parent.to_owned(),
            from,
            to,
            count,
        }
    }
}

/// A shared, append-only list of [`RecordedOp`]s.
#[derive(Clone, Debug, Default)]
pub struct OpLog {
    ops: Arc<Mutex<Vec<RecordedOp>>>,
}

impl OpLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded operations.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RecordedOp> {
        lock(&self.ops).clone()
    }

    /// Returns and forgets the recorded operations.
    pub fn take(&self) -> Vec<RecordedOp> {
        core::mem::take(&mut *lock(&self.ops))
    }

    fn push(&self, op: RecordedOp) {
        lock(&self.ops).push(op);
    }
}

/// A [`NodeApplier`] that logs each structural mutation it performs.
#[derive(Debug)]
pub struct RecordingApplier {
    inner: NodeApplier<MemoryNode>,
    log: OpLog,
}

impl RecordingApplier {
    /// Creates an applier rooted at `root` that appends to `log`.
    #[must_use]
    pub fn new(root: MemoryNode, log: OpLog) -> Self {
        Self {
            inner: NodeApplier::new(root),
            log,
        }
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> &MemoryNode {
        self.inner.root()
    }

    fn parent(&self) -> String {
        self.inner.current().label().to_owned()
    }
}

impl Applier<MemoryNode> for RecordingApplier {
    fn current(&self) -> &MemoryNode {
        self.inner.current()
    }

    fn down(&mut self, node: MemoryNode) {
        self.inner.down(node);
    }

    fn up(&mut self) -> Result<(), Error> {
        self.inner.up()
    }

    fn insert_top_down(&mut self, index: usize, node: MemoryNode) -> Result<(), Error> {
        self.inner.insert_top_down(index, node)
    }

    fn insert_bottom_up(&mut self, index: usize, node: MemoryNode) -> Result<(), Error> {
        let op = RecordedOp::Insert {
            parent: self.parent(),
            index,
            node: node.label().to_owned(),
        };
        self.inner.insert_bottom_up(index, node)?;
        self.log.push(op);
        Ok(())
    }

    fn remove(&mut self, index: usize, count: usize) {
        self.log.push(RecordedOp::Remove {
            parent: self.parent(),
            index,
            count,
        });
        self.inner.remove(index, count);
    }

    fn move_children(&mut self, from: usize, to: usize, count: usize) {
        self.log.push(RecordedOp::Move {
            parent: self.parent(),
            from,
            to,
            count,
        });
        self.inner.move_children(from, to, count);
    }

    fn clear(&mut self) {
        self.log.push(RecordedOp::Clear {
            root: self.inner.root().label().to_owned(),
        });
        self.inner.clear();
    }

    fn on_begin_changes(&mut self) {
        self.inner.on_begin_changes();
    }

    fn on_end_changes(&mut self) {
        self.inner.on_end_changes();
    }
}

/// A trace event as recorded by [`RecordingSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A tick was accepted.
    Tick(FrameTickEvent),
    /// A phase started.
    Begin(PhaseBeginEvent),
    /// A phase ended.
    End(PhaseEndEvent),
    /// A recomposition pass finished.
    Pass(PassEvent),
    /// A layer changed lifecycle state.
    Layer(LayerEvent),
    /// The host was told nodes changed.
    NodesChanged(NodesChangedEvent),
}

/// A [`TraceSink`] that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// Returns the phases begun during `frame_index`, in order.
    #[must_use]
    pub fn phases(&self, frame_index: u64) -> Vec<PhaseKind> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Begin(e) if e.frame_index == frame_index => Some(e.phase),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded layer events of the given kind.
    #[must_use]
    pub fn layers(&self, kind: LayerEventKind) -> Vec<LayerId> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Layer(e) if e.kind == kind => Some(e.layer),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded pass events.
    #[must_use]
    pub fn passes(&self) -> Vec<PassEvent> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Pass(e) => Some(*e),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: RecordedEvent) {
        lock(&self.events).push(event);
    }
}

impl TraceSink for RecordingSink {
    fn on_frame_tick(&self, e: &FrameTickEvent) {
        self.push(RecordedEvent::Tick(*e));
    }

    fn on_phase_begin(&self, e: &PhaseBeginEvent) {
        self.push(RecordedEvent::Begin(*e));
    }

    fn on_phase_end(&self, e: &PhaseEndEvent) {
        self.push(RecordedEvent::End(*e));
    }

    fn on_pass(&self, e: &PassEvent) {
        self.push(RecordedEvent::Pass(*e));
    }

    fn on_layer(&self, e: &LayerEvent) {
        self.push(RecordedEvent::Layer(*e));
    }

    fn on_nodes_changed(&self, e: &NodesChangedEvent) {
        self.push(RecordedEvent::NodesChanged(*e));
    }
}
