// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A stand-in for the host: a surface node that layer roots hang off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sublayer_core::{AmbientContext, Applier, LayerId, NodeHooks, TreeNode};
use tracing::trace;

use crate::layers::HarnessLayerManager;
use crate::node::MemoryNode;
use crate::recorder::{OpLog, RecordingApplier};
use crate::sync::lock;

/// What the host saw when it destroyed a layer root.
#[derive(Clone, Debug)]
pub struct Destroyed {
    /// The destroyed root.
    pub node: MemoryNode,
    /// Layers still registered at that moment, when a manager was watched.
    pub registered: Option<Vec<LayerId>>,
}

struct SceneInner {
    surface: MemoryNode,
    destroyed: Mutex<Vec<Destroyed>>,
    /// Holds the watched manager weakly.
    watched: Mutex<Option<AmbientContext>>,
    next_root: AtomicU64,
    ops: OpLog,
}

/// Host fixture that creates layer roots under a surface node, records their
/// destruction and logs every mutation layers apply.
///
/// Cloning yields another handle to the same scene.
#[derive(Clone)]
pub struct HostScene {
    inner: Arc<SceneInner>,
}

impl Default for HostScene {
    fn default() -> Self {
        Self::new()
    }
}

impl HostScene {
    /// Creates a scene with an empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SceneInner {
                surface: MemoryNode::new("surface"),
                destroyed: Mutex::new(Vec::new()),
                watched: Mutex::new(None),
                next_root: AtomicU64::new(0),
                ops: OpLog::new(),
            }),
        }
    }

    /// Returns the node layer roots are attached to.
    #[must_use]
    pub fn surface(&self) -> &MemoryNode {
        &self.inner.surface
    }

    /// Returns the log of mutations applied by layers.
    #[must_use]
    pub fn ops(&self) -> &OpLog {
        &self.inner.ops
    }

    /// Returns every root destroyed so far, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<Destroyed> {
        lock(&self.inner.destroyed).clone()
    }

    /// Snapshots `manager`'s registry each time a root is destroyed.
    pub fn watch(&self, manager: &HarnessLayerManager) {
        *lock(&self.inner.watched) = Some(manager.provide_to(&AmbientContext::root()));
    }

    /// Returns hooks that attach roots named `layer0`, `layer1`, ... to the
    /// surface and route layer mutations through a [`RecordingApplier`].
    #[must_use]
    pub fn hooks(&self) -> NodeHooks<MemoryNode> {
        let create = self.inner.clone();
        let remove = self.inner.clone();
        let ops = self.inner.ops.clone();
        NodeHooks::new(
            move || {
                let n = create.next_root.fetch_add(1, Ordering::Relaxed);
                let root = MemoryNode::new(format!("layer{n}"));
                let surface = &create.surface;
                surface.insert_child(surface.children().len(), root.clone());
                root.set_parent(Some(surface));
                trace!(root = ?root, "attached layer root");
                root
            },
            move |root| {
                let surface = &remove.surface;
                if let Some(index) = surface.children().iter().position(|c| c.ptr_eq(root)) {
                    surface.remove_children(index, 1);
                }
                root.set_parent(None);
                let registered = lock(&remove.watched)
                    .as_ref()
                    .and_then(|ambient| HarnessLayerManager::current(ambient).ok())
                    .map(|manager| manager.layers().iter().map(|l| l.id()).collect());
                lock(&remove.destroyed).push(Destroyed {
                    node: root.clone(),
                    registered,
                });
                trace!(root = ?root, "destroyed layer root");
            },
        )
        .with_sink_factory(move |root| -> Box<dyn Applier<MemoryNode>> {
            Box::new(RecordingApplier::new(root, ops.clone()))
        })
    }
}

impl core::fmt::Debug for HostScene {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostScene")
            .field("surface", &self.inner.surface.describe())
            .finish_non_exhaustive()
    }
}
