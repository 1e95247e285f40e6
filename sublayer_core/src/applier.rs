// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree mutation sinks.
//!
//! A recomputation engine never touches nodes directly. It walks the tree of
//! the layer it is recomposing through an [`Applier`], a cursor that keeps a
//! navigation stack rooted at the layer's root node:
//!
//! ```text
//!   root ──down(a)──► a ──down(b)──► b
//!     ▲                 ▲             │
//!     └────── up ───────┴──── up ─────┘
//! ```
//!
//! Every structural operation targets the node at the top of the stack (the
//! *current* node). [`NodeApplier`] is the default implementation over any
//! [`TreeNode`]; hosts that need to observe or batch mutations can supply their
//! own sink per layer.
//!
//! Only bottom-up insertion is supported: a subtree is fully built before it
//! is linked into its parent. [`Applier::insert_top_down`] exists so engines
//! that emit both orders can target the trait, and is a no-op here.

use crate::error::Error;
use crate::node::TreeNode;

/// A single tree mutation, as emitted by a recomputation engine.
#[derive(Clone, Debug)]
pub enum TreeOp<N> {
    /// Make `node` the current node.
    Down(N),
    /// Return to the parent of the current node.
    Up,
    /// Insert a node top-down (reserved, ignored by [`NodeApplier`]).
    InsertTopDown {
        /// Target index.
        index: usize,
        /// Node to insert.
        node: N,
    },
    /// Insert a fully built node under the current node.
    InsertBottomUp {
        /// Target index.
        index: usize,
        /// Node to insert.
        node: N,
    },
    /// Remove a run of children.
    Remove {
        /// First removed index.
        index: usize,
        /// Number of removed children.
        count: usize,
    },
    /// Move a run of children.
    Move {
        /// Start of the run.
        from: usize,
        /// Destination index, see [`move_range`](crate::node::move_range).
        to: usize,
        /// Length of the run.
        count: usize,
    },
    /// Reset to the root and remove all of its children.
    Clear,
}

impl<N> TreeOp<N> {
    /// Returns `true` if the operation changes the tree's structure.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(self, Self::Down(_) | Self::Up | Self::InsertTopDown { .. })
    }
}

/// Receives tree mutations for one layer.
pub trait Applier<N>: Send {
    /// The node operations currently target.
    fn current(&self) -> &N;

    /// Pushes `node` as the new current node.
    fn down(&mut self, node: N);

    /// Pops back to the previous current node.
    ///
    /// Returns [`Error::ApplierUnderflow`] when already at the root.
    fn up(&mut self) -> Result<(), Error>;

    /// Inserts `node` under the current node before its children are built.
    fn insert_top_down(&mut self, index: usize, node: N) -> Result<(), Error>;

    /// Inserts the fully built `node` under the current node at `index`.
    ///
    /// Returns [`Error::AlreadyParented`] if `node` already has a parent.
    fn insert_bottom_up(&mut self, index: usize, node: N) -> Result<(), Error>;

    /// Removes `count` children of the current node starting at `index`.
    fn remove(&mut self, index: usize, count: usize);

    /// Moves `count` children of the current node from `from` to `to`.
    fn move_children(&mut self, from: usize, to: usize, count: usize);

    /// Resets navigation to the root and removes all of the root's children.
    fn clear(&mut self);

    /// Called before a batch of changes is applied.
    fn on_begin_changes(&mut self) {}

    /// Called after a batch of changes has been applied.
    fn on_end_changes(&mut self) {}

    /// Applies a single [`TreeOp`].
    fn apply(&mut self, op: TreeOp<N>) -> Result<(), Error> {
        match op {
            TreeOp::Down(node) => self.down(node),
            TreeOp::Up => self.up()?,
            TreeOp::InsertTopDown { index, node } => self.insert_top_down(index, node)?,
            TreeOp::InsertBottomUp { index, node } => self.insert_bottom_up(index, node)?,
            TreeOp::Remove { index, count } => self.remove(index, count),
            TreeOp::Move { from, to, count } => self.move_children(from, to, count),
            TreeOp::Clear => self.clear(),
        }
        Ok(())
    }

    /// Applies operations in order, stopping at the first error.
    fn apply_all(&mut self, ops: impl IntoIterator<Item = TreeOp<N>>) -> Result<(), Error>
    where
        Self: Sized,
    {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }
}

/// The default [`Applier`] over a [`TreeNode`] root.
pub struct NodeApplier<N> {
    root: N,
    /// Ancestors of `current`, nearest last.
    stack: Vec<N>,
    current: N,
}

impl<N: TreeNode> NodeApplier<N> {
    /// Creates an applier rooted at `root`.
    #[must_use]
    pub fn new(root: N) -> Self {
        Self {
            current: root.clone(),
            root,
            stack: Vec::new(),
        }
    }

    /// Returns the root node.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &N {
        &self.root
    }

    /// Returns how far below the root navigation currently is.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl<N> core::fmt::Debug for NodeApplier<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeApplier")
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

impl<N: TreeNode> Applier<N> for NodeApplier<N> {
    #[inline]
    fn current(&self) -> &N {
        &self.current
    }

    fn down(&mut self, node: N) {
        let previous = core::mem::replace(&mut self.current, node);
        self.stack.push(previous);
    }

    fn up(&mut self) -> Result<(), Error> {
        let parent = self.stack.pop().ok_or(Error::ApplierUnderflow)?;
        self.current = parent;
        Ok(())
    }

    fn insert_top_down(&mut self, _index: usize, _node: N) -> Result<(), Error> {
        Ok(())
    }

    fn insert_bottom_up(&mut self, index: usize, node: N) -> Result<(), Error> {
        if node.has_parent() {
            return Err(Error::AlreadyParented { index });
        }
        self.current.insert_child(index, node.clone());
        node.set_parent(Some(&self.current));
        Ok(())
    }

    fn remove(&mut self, index: usize, count: usize) {
        self.current.remove_children(index, count);
    }

    fn move_children(&mut self, from: usize, to: usize, count: usize) {
        self.current.move_children(from, to, count);
    }

    fn clear(&mut self) {
        self.stack.clear();
        self.current = self.root.clone();
        self.root.clear_children();
    }
}

/// Forwards to another applier while counting structural operations.
pub(crate) struct ChangeCounter<'a, N> {
    inner: &'a mut dyn Applier<N>,
    changes: usize,
}

impl<'a, N> ChangeCounter<'a, N> {
    pub(crate) fn new(inner: &'a mut dyn Applier<N>) -> Self {
        Self { inner, changes: 0 }
    }

    pub(crate) fn changes(&self) -> usize {
        self.changes
    }
}

impl<N: Send> Applier<N> for ChangeCounter<'_, N> {
    fn current(&self) -> &N {
        self.inner.current()
    }

    fn down(&mut self, node: N) {
        self.inner.down(node);
    }

    fn up(&mut self) -> Result<(), Error> {
        self.inner.up()
    }

    fn insert_top_down(&mut self, index: usize, node: N) -> Result<(), Error> {
        self.inner.insert_top_down(index, node)
    }

    fn insert_bottom_up(&mut self, index: usize, node: N) -> Result<(), Error> {
        self.inner.insert_bottom_up(index, node)?;
        self.changes += 1;
        Ok(())
    }

    fn remove(&mut self, index: usize, count: usize) {
        self.inner.remove(index, count);
        self.changes += 1;
    }

    fn move_children(&mut self, from: usize, to: usize, count: usize) {
        self.inner.move_children(from, to, count);
        self.changes += 1;
    }

    fn clear(&mut self) {
        self.inner.clear();
        self.changes += 1;
    }

    fn on_begin_changes(&mut self) {
        self.inner.on_begin_changes();
    }

    fn on_end_changes(&mut self) {
        self.inner.on_end_changes();
    }
}
