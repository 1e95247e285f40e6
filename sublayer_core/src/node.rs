// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The node capability set the runtime mutates.
//!
//! Hosts own their node representation; the runtime only needs the handful of
//! structural operations in [`TreeNode`]. Handles are cheap clones that refer
//! to the same underlying node (typically an `Arc`).

/// A handle to a host-defined tree node.
///
/// Implementations must uphold one invariant the runtime relies on: a node
/// reports a parent exactly when it has been linked under one through
/// [`set_parent`](Self::set_parent). The applier refuses to insert a node that
/// already reports a parent.
pub trait TreeNode: Clone + Send + Sync + 'static {
    /// Returns the node's parent, if it has one.
    fn parent(&self) -> Option<Self>;

    /// Sets or clears the node's parent back-reference.
    fn set_parent(&self, parent: Option<&Self>);

    /// Inserts `child` at `index` in this node's child list.
    fn insert_child(&self, index: usize, child: Self);

    /// Removes `count` children starting at `index`.
    ///
    /// Removed children keep their parent back-reference.
    fn remove_children(&self, index: usize, count: usize);

    /// Moves the run of `count` children at `from` to `to`.
    ///
    /// See [`move_range`] for the exact index semantics.
    fn move_children(&self, from: usize, to: usize, count: usize);

    /// Removes every child in one operation.
    fn clear_children(&self);

    /// Returns `true` if the node is linked under a parent.
    #[inline]
    fn has_parent(&self) -> bool {
        self.parent().is_some()
    }
}

/// Moves the run `[from, from + count)` of `list` to `to`.
///
/// `to` is expressed in indices of the list *before* the move: when
/// `from > to` the run ends up starting at `to`, otherwise it ends up
/// starting at `to - count` (the slot just before the element that was at
/// `to`). This matches the move operations emitted by reconcilers that walk a
/// sibling list front to back.
///
/// # Panics
///
/// Panics if the run or the destination lies outside the list.
pub fn move_range<T>(list: &mut Vec<T>, from: usize, to: usize, count: usize) {
    if count == 0 || from == to {
        return;
    }
    let dest = if from > to { to } else { to - count };
    let run: Vec<T> = list.drain(from..from + count).collect();
    let tail = list.split_off(dest);
    list.extend(run);
    list.extend(tail);
}
