// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal collaborators shared by the unit tests.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::ambient::AmbientContext;
use crate::applier::Applier;
use crate::engine::{Composition, Engine, Invalidator, StateSystem, Subscription, WriteObserver};
use crate::error::Error;
use crate::node::{TreeNode, move_range};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Debug)]
struct Inner {
    id: u32,
    parent: Mutex<Option<Weak<Inner>>>,
    children: Mutex<Vec<TestNode>>,
}

/// A reference-counted node identified by a process-unique id.
#[derive(Clone, Debug)]
pub(crate) struct TestNode(Arc<Inner>);

impl TestNode {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }))
    }

    pub(crate) fn id(&self) -> u32 {
        self.0.id
    }

    pub(crate) fn child_ids(&self) -> Vec<u32> {
        self.0.children.lock().unwrap().iter().map(Self::id).collect()
    }

    pub(crate) fn is(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl TreeNode for TestNode {
    fn parent(&self) -> Option<Self> {
        self.0
            .parent
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Self)
    }

    fn set_parent(&self, parent: Option<&Self>) {
        *self.0.parent.lock().unwrap() = parent.map(|p| Arc::downgrade(&p.0));
    }

    fn insert_child(&self, index: usize, child: Self) {
        self.0.children.lock().unwrap().insert(index, child);
    }

    fn remove_children(&self, index: usize, count: usize) {
        self.0.children.lock().unwrap().drain(index..index + count);
    }

    fn move_children(&self, from: usize, to: usize, count: usize) {
        move_range(&mut self.0.children.lock().unwrap(), from, to, count);
    }

    fn clear_children(&self) {
        self.0.children.lock().unwrap().clear();
    }
}

/// Content for [`CountingEngine`]: how many leaf nodes the root should hold,
/// or an error message to fail with.
pub(crate) type Leaves = Result<usize, &'static str>;

/// An engine whose content is a leaf count; recomposition grows or shrinks
/// the root's children to match.
#[derive(Debug, Default)]
pub(crate) struct CountingEngine {
    pub(crate) disposed: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub(crate) struct CountingComposition {
    content: Option<Leaves>,
    mounted: usize,
    pending: bool,
    invalidator: Invalidator,
    disposed: Arc<AtomicUsize>,
}

impl Engine<TestNode> for CountingEngine {
    type Content = Leaves;
    type Composition = CountingComposition;

    fn create_composition(
        &self,
        _parent: &AmbientContext,
        invalidator: Invalidator,
    ) -> CountingComposition {
        CountingComposition {
            content: None,
            mounted: 0,
            pending: false,
            invalidator,
            disposed: self.disposed.clone(),
        }
    }
}

impl Composition<TestNode> for CountingComposition {
    type Content = Leaves;

    fn set_content(&mut self, content: Leaves) {
        self.content = Some(content);
        self.pending = true;
        self.invalidator.invalidate();
    }

    fn has_pending_changes(&self) -> bool {
        self.pending
    }

    fn recompose(&mut self, applier: &mut dyn Applier<TestNode>) -> Result<(), Error> {
        self.pending = false;
        let wanted = match self.content {
            Some(Ok(n)) => n,
            Some(Err(message)) => return Err(Error::content(message)),
            None => 0,
        };
        if wanted < self.mounted {
            applier.remove(wanted, self.mounted - wanted);
        }
        for index in self.mounted..wanted {
            applier.insert_bottom_up(index, TestNode::new())?;
        }
        self.mounted = wanted;
        Ok(())
    }

    fn dispose(&mut self, applier: &mut dyn Applier<TestNode>) {
        applier.clear();
        self.mounted = 0;
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeStateInner {
    observers: Mutex<Vec<(u64, WriteObserver)>>,
    next_observer: AtomicU64,
    flushes: AtomicUsize,
}

/// A state system whose writes are triggered by hand.
#[derive(Clone, Default)]
pub(crate) struct FakeState(Arc<FakeStateInner>);

impl FakeState {
    pub(crate) fn write(&self) {
        let observers: Vec<WriteObserver> = self
            .0
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer();
        }
    }

    pub(crate) fn flushes(&self) -> usize {
        self.0.flushes.load(Ordering::SeqCst)
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.0.observers.lock().unwrap().len()
    }
}

impl StateSystem for FakeState {
    fn register_write_observer(&self, observer: WriteObserver) -> Subscription {
        let id = self.0.next_observer.fetch_add(1, Ordering::Relaxed);
        self.0.observers.lock().unwrap().push((id, observer));
        let inner = Arc::downgrade(&self.0);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.observers.lock().unwrap().retain(|(other, _)| *other != id);
            }
        })
    }

    fn send_apply_notifications(&self) {
        self.0.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
