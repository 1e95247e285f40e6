// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use super::id::LayerId;
use super::manager::ManagerShared;
use crate::ambient::AmbientContext;
use crate::applier::{Applier, ChangeCounter};
use crate::engine::{Composition, Engine, Invalidator};
use crate::error::Error;
use crate::node::TreeNode;
use crate::sync::lock;

/// Lifecycle state of a [`Layer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerState {
    /// Registered and recomposed whenever it has pending changes.
    Active,
    /// Recomposition failed under the isolation policy; skipped until new
    /// content is set.
    Failed,
    /// Closed; the composition has been disposed.
    Disposed,
}

struct Slot<N, C> {
    composition: C,
    sink: Box<dyn Applier<N>>,
    state: LayerState,
}

pub(crate) struct LayerInner<N: TreeNode, E: Engine<N>> {
    id: LayerId,
    /// Back-reference to the registry; the registry owns the layer, not the
    /// other way round.
    owner: Weak<ManagerShared<N, E>>,
    parent_context: AmbientContext,
    root: N,
    invalidator: Invalidator,
    slot: Mutex<Slot<N, E::Composition>>,
}

/// An independently lifecycled subcomposition rooted at its own node.
///
/// A layer shares ambient context with whatever created it but mutates only
/// the subtree under [`root`](Self::root). Cloning yields another handle to
/// the same layer.
pub struct Layer<N: TreeNode, E: Engine<N>> {
    inner: Arc<LayerInner<N, E>>,
}

impl<N: TreeNode, E: Engine<N>> Clone for Layer<N, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: TreeNode, E: Engine<N>> Layer<N, E> {
    pub(crate) fn new(
        id: LayerId,
        owner: Weak<ManagerShared<N, E>>,
        parent_context: AmbientContext,
        root: N,
        composition: E::Composition,
        sink: Box<dyn Applier<N>>,
        invalidator: Invalidator,
    ) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                id,
                owner,
                parent_context,
                root,
                invalidator,
                slot: Mutex::new(Slot {
                    composition,
                    sink,
                    state: LayerState::Active,
                }),
            }),
        }
    }

    /// Returns the layer's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> LayerId {
        self.inner.id
    }

    /// Returns the root node this layer's composition mutates.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &N {
        &self.inner.root
    }

    /// Returns the ambient context the layer was created with.
    #[inline]
    #[must_use]
    pub fn parent_context(&self) -> &AmbientContext {
        &self.inner.parent_context
    }

    /// Returns the layer's lifecycle state.
    #[must_use]
    pub fn state(&self) -> LayerState {
        lock(&self.inner.slot).state
    }

    /// Returns `true` once the layer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == LayerState::Disposed
    }

    /// Returns `true` if both handles refer to the same layer.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Replaces the layer's content and requests a recomposition pass.
    ///
    /// Setting content on a failed layer makes it active again.
    pub fn set_content(&self, content: E::Content) -> Result<(), Error> {
        {
            let mut slot = lock(&self.inner.slot);
            match slot.state {
                LayerState::Disposed => return Err(Error::LayerClosed(self.inner.id)),
                LayerState::Failed => slot.state = LayerState::Active,
                LayerState::Active => {}
            }
            slot.composition.set_content(content);
        }
        self.inner.invalidator.invalidate();
        Ok(())
    }

    /// Unregisters the layer and disposes its composition, in that order.
    ///
    /// The host's node destructor therefore never observes a layer that is
    /// still registered. Closing a layer twice returns
    /// [`Error::LayerNotRegistered`].
    pub fn close(&self) -> Result<(), Error> {
        let Some(owner) = self.inner.owner.upgrade() else {
            self.dispose();
            return Err(Error::ManagerDropped);
        };
        owner.remove(self)?;
        self.dispose();
        Ok(())
    }

    fn dispose(&self) {
        let mut slot = lock(&self.inner.slot);
        if slot.state == LayerState::Disposed {
            return;
        }
        let Slot {
            composition, sink, ..
        } = &mut *slot;
        composition.dispose(sink.as_mut());
        slot.state = LayerState::Disposed;
        debug!(layer = ?self.inner.id, "layer disposed");
    }

    /// Recomposes the layer if it has pending changes.
    ///
    /// Returns `None` when there was nothing to do, otherwise the number of
    /// structural operations applied to the layer's tree.
    pub(crate) fn recompose(&self) -> Result<Option<usize>, Error> {
        let mut slot = lock(&self.inner.slot);
        let Slot {
            composition,
            sink,
            state,
        } = &mut *slot;
        if *state != LayerState::Active || !composition.has_pending_changes() {
            return Ok(None);
        }
        let mut counter = ChangeCounter::new(sink.as_mut());
        composition.recompose(&mut counter)?;
        Ok(Some(counter.changes()))
    }

    /// Stops recomposing the layer until new content is set.
    pub(crate) fn isolate(&self) {
        let mut slot = lock(&self.inner.slot);
        if slot.state == LayerState::Active {
            slot.state = LayerState::Failed;
        }
    }
}

impl<N: TreeNode, E: Engine<N>> fmt::Debug for Layer<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `try_lock` keeps formatting usable while the slot is held.
        let state = self.inner.slot.try_lock().ok().map(|slot| slot.state);
        f.debug_struct("Layer")
            .field("id", &self.inner.id)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
