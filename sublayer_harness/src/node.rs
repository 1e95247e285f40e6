// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An in-memory retained node tree.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use sublayer_core::TreeNode;
use sublayer_core::node::move_range;

use crate::sync::lock;

static NEXT_NODE: AtomicU64 = AtomicU64::new(0);

struct NodeData {
    id: u64,
    label: String,
    parent: Mutex<Option<Weak<NodeData>>>,
    children: Mutex<Vec<MemoryNode>>,
}

/// A labelled node backed by shared memory.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct MemoryNode {
    data: Arc<NodeData>,
}

impl MemoryNode {
    /// Creates an unparented node with no children.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            data: Arc::new(NodeData {
                id: NEXT_NODE.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                parent: Mutex::new(None),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the process-unique node id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.data.id
    }

    /// Returns the node's label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.data.label
    }

    /// Returns a snapshot of the node's children.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        lock(&self.data.children).clone()
    }

    /// Returns the labels of the node's children, in order.
    #[must_use]
    pub fn child_labels(&self) -> Vec<String> {
        lock(&self.data.children)
            .iter()
            .map(|child| child.label().to_owned())
            .collect()
    }

    /// Renders the subtree as `label[child child[grandchild]]`.
    #[must_use]
    pub fn describe(&self) -> String {
        let children = self.children();
        if children.is_empty() {
            return self.label().to_owned();
        }
        let inner: Vec<String> = children.iter().map(Self::describe).collect();
        format!("{}[{}]", self.label(), inner.join(" "))
    }

    /// Returns `true` if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl TreeNode for MemoryNode {
    fn parent(&self) -> Option<Self> {
        lock(&self.data.parent)
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|data| Self { data })
    }

    fn set_parent(&self, parent: Option<&Self>) {
        *lock(&self.data.parent) = parent.map(|p| Arc::downgrade(&p.data));
    }

    fn insert_child(&self, index: usize, child: Self) {
        lock(&self.data.children).insert(index, child);
    }

    fn remove_children(&self, index: usize, count: usize) {
        lock(&self.data.children).drain(index..index + count);
    }

    fn move_children(&self, from: usize, to: usize, count: usize) {
        move_range(&mut lock(&self.data.children), from, to, count);
    }

    fn clear_children(&self) {
        lock(&self.data.children).clear();
    }
}

impl fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryNode({}#{})", self.data.label, self.data.id)
    }
}
