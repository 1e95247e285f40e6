// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A keyed, declarative composition engine over [`MemoryNode`] trees.
//!
//! Content is a closure that describes the wanted tree by calling
//! [`Scope::node`] and [`Scope::leaf`]. Each recomposition renders the
//! closure, then reconciles the description against what is mounted by
//! sibling key:
//!
//! 1. children whose keys disappeared are removed, one operation per
//!    contiguous run, back to front;
//! 2. surviving children are moved into place;
//! 3. new children are built bottom-up and inserted into their parent.
//!
//! Reads made through [`Scope::read`] subscribe the composition to the state,
//! and [`Scope::remember`] and [`Scope::disposable_effect`] keep values alive
//! for as long as the same key is used on every render.

use core::any::Any;
use core::cmp::Reverse;
use core::fmt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sublayer_core::{AmbientContext, Applier, Composition, Engine, Error, Invalidator};

use crate::node::MemoryNode;
use crate::snapshot::{SnapshotSystem, State};

type Render = dyn Fn(&mut Scope<'_>) -> Result<(), Error> + Send + Sync;

/// Renderable content. Cloning shares the closure.
#[derive(Clone)]
pub struct Content {
    render: Arc<Render>,
}

impl Content {
    /// Wraps a render closure.
    pub fn new(
        render: impl Fn(&mut Scope<'_>) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            render: Arc::new(render),
        }
    }

    /// Content that renders nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(|_| Ok(()))
    }

    /// Renders into `scope`.
    pub fn render(&self, scope: &mut Scope<'_>) -> Result<(), Error> {
        (self.render)(scope)
    }

    /// Returns `true` if both values share the same closure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").finish_non_exhaustive()
    }
}

/// Engine creating [`TreeComposition`]s that share one [`SnapshotSystem`].
#[derive(Clone, Debug, Default)]
pub struct ComposeEngine {
    system: SnapshotSystem,
}

impl ComposeEngine {
    /// Creates an engine over `system`.
    #[must_use]
    pub fn new(system: SnapshotSystem) -> Self {
        Self { system }
    }

    /// Returns the state system compositions subscribe to.
    #[must_use]
    pub fn system(&self) -> &SnapshotSystem {
        &self.system
    }
}

impl Engine<MemoryNode> for ComposeEngine {
    type Content = Content;
    type Composition = TreeComposition;

    fn create_composition(
        &self,
        parent: &AmbientContext,
        invalidator: Invalidator,
    ) -> TreeComposition {
        let invalid = Arc::new(AtomicBool::new(false));
        let flag = invalid.clone();
        let notify = invalidator.clone();
        let key = self.system.register_composition(Arc::new(move || {
            flag.store(true, Ordering::SeqCst);
            notify.invalidate();
        }));
        TreeComposition {
            key,
            system: self.system.clone(),
            parent: parent.clone(),
            invalidator,
            invalid,
            content: None,
            mounted: Vec::new(),
            slots: HashMap::new(),
            next_slot: 0,
            disposed: false,
        }
    }
}

struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
    order: u64,
}

impl Slot {
    fn release(mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

struct Mounted {
    key: String,
    node: MemoryNode,
    children: Vec<Self>,
}

struct Element {
    key: String,
    children: Vec<Self>,
}

/// Per-render bookkeeping shared by nested scopes.
struct Frame {
    composition: u32,
    system: SnapshotSystem,
    ambient: AmbientContext,
    slots: HashMap<String, Slot>,
    next_slot: u64,
    touched: HashSet<String>,
}

/// The builder handed to content while it renders.
pub struct Scope<'a> {
    frame: &'a mut Frame,
    children: Vec<Element>,
}

impl Scope<'_> {
    /// Emits a child node keyed by `key` whose own children are described by
    /// `body`.
    pub fn node(
        &mut self,
        key: impl Into<String>,
        body: impl FnOnce(&mut Scope<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut inner = Scope {
            frame: &mut *self.frame,
            children: Vec::new(),
        };
        body(&mut inner)?;
        let children = inner.children;
        self.children.push(Element {
            key: key.into(),
            children,
        });
        Ok(())
    }

    /// Emits a childless node keyed by `key`.
    pub fn leaf(&mut self, key: impl Into<String>) {
        self.children.push(Element {
            key: key.into(),
            children: Vec::new(),
        });
    }

    /// Reads `state` and subscribes this composition to its changes.
    pub fn read<T: Clone + Send + Sync + 'static>(&mut self, state: &State<T>) -> T {
        self.frame
            .system
            .record_read(self.frame.composition, state.key());
        state.get_untracked()
    }

    /// Returns the ambient values visible at this point of the render.
    #[must_use]
    pub fn ambient(&self) -> &AmbientContext {
        &self.frame.ambient
    }

    /// Returns the state system this composition subscribes to.
    #[must_use]
    pub fn system(&self) -> &SnapshotSystem {
        &self.frame.system
    }

    /// Renders `body` with `value` provided on top of the current ambient
    /// values.
    pub fn provide<T: Any + Send + Sync>(
        &mut self,
        value: T,
        body: impl FnOnce(&mut Scope<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let inner = self.frame.ambient.provide(value);
        let outer = core::mem::replace(&mut self.frame.ambient, inner);
        let result = body(self);
        self.frame.ambient = outer;
        result
    }

    /// Returns the value remembered under `key`, creating it with `init` on
    /// the first render that uses the key.
    ///
    /// The value is released once a render no longer uses `key`.
    pub fn remember<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        init: impl FnOnce() -> T,
    ) -> Arc<T> {
        let key = key.into();
        self.frame.touched.insert(key.clone());
        if let Some(existing) = self
            .frame
            .slots
            .get(&key)
            .and_then(|slot| slot.value.clone().downcast::<T>().ok())
        {
            return existing;
        }
        let value = Arc::new(init());
        let slot = Slot {
            value: value.clone(),
            on_release: None,
            order: self.frame.take_order(),
        };
        if let Some(replaced) = self.frame.slots.insert(key, slot) {
            replaced.release();
        }
        value
    }

    /// Runs `effect` on the first render that uses `key` and the cleanup it
    /// returns once a render stops using `key` or the composition is
    /// disposed.
    pub fn disposable_effect(
        &mut self,
        key: impl Into<String>,
        effect: impl FnOnce() -> Box<dyn FnOnce() + Send>,
    ) {
        let key = key.into();
        self.frame.touched.insert(key.clone());
        if self.frame.slots.contains_key(&key) {
            return;
        }
        let on_release = effect();
        let slot = Slot {
            value: Arc::new(()),
            on_release: Some(on_release),
            order: self.frame.take_order(),
        };
        self.frame.slots.insert(key, slot);
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("composition", &self.frame.composition)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

impl Frame {
    fn take_order(&mut self) -> u64 {
        let order = self.next_slot;
        self.next_slot += 1;
        order
    }
}

/// A composition rendering [`Content`] into a [`MemoryNode`] subtree.
pub struct TreeComposition {
    key: u32,
    system: SnapshotSystem,
    parent: AmbientContext,
    invalidator: Invalidator,
    invalid: Arc<AtomicBool>,
    content: Option<Content>,
    mounted: Vec<Mounted>,
    slots: HashMap<String, Slot>,
    next_slot: u64,
    disposed: bool,
}

impl TreeComposition {
    /// Releases slots in reverse creation order.
    fn release(slots: impl IntoIterator<Item = Slot>) {
        let mut slots: Vec<Slot> = slots.into_iter().collect();
        slots.sort_by_key(|slot| Reverse(slot.order));
        for slot in slots {
            slot.release();
        }
    }
}

impl Composition<MemoryNode> for TreeComposition {
    type Content = Content;

    fn set_content(&mut self, content: Content) {
        if self.disposed {
            return;
        }
        self.content = Some(content);
        self.invalid.store(true, Ordering::SeqCst);
        self.invalidator.invalidate();
    }

    fn has_pending_changes(&self) -> bool {
        !self.disposed && self.invalid.load(Ordering::SeqCst)
    }

    fn recompose(&mut self, applier: &mut dyn Applier<MemoryNode>) -> Result<(), Error> {
        self.invalid.store(false, Ordering::SeqCst);
        self.system.clear_reads(self.key);
        let Some(content) = self.content.clone() else {
            return Ok(());
        };

        let mut frame = Frame {
            composition: self.key,
            system: self.system.clone(),
            ambient: self.parent.clone(),
            slots: core::mem::take(&mut self.slots),
            next_slot: self.next_slot,
            touched: HashSet::new(),
        };
        let mut scope = Scope {
            frame: &mut frame,
            children: Vec::new(),
        };
        let rendered = content.render(&mut scope);
        let wanted = scope.children;
        let Frame {
            slots,
            next_slot,
            touched,
            ..
        } = frame;
        self.slots = slots;
        self.next_slot = next_slot;
        rendered?;
        check_keys(&wanted)?;

        applier.on_begin_changes();
        let mounted = reconcile(applier, core::mem::take(&mut self.mounted), wanted);
        if mounted.is_err() {
            // What the sink applied before failing is unknown, so the next
            // recomposition rebuilds from an empty root.
            applier.clear();
        }
        applier.on_end_changes();
        self.mounted = mounted?;

        let stale: Vec<String> = self
            .slots
            .keys()
            .filter(|key| !touched.contains(*key))
            .cloned()
            .collect();
        Self::release(stale.iter().filter_map(|key| self.slots.remove(key)));
        Ok(())
    }

    fn dispose(&mut self, applier: &mut dyn Applier<MemoryNode>) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        Self::release(self.slots.drain().map(|(_, slot)| slot));
        applier.clear();
        self.mounted.clear();
        self.content = None;
        self.system.unregister_composition(self.key);
    }
}

impl fmt::Debug for TreeComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeComposition")
            .field("key", &self.key)
            .field("mounted", &self.mounted.len())
            .field("slots", &self.slots.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Rejects descriptions that reuse a key among siblings.
fn check_keys(elements: &[Element]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for element in elements {
        if !seen.insert(element.key.as_str()) {
            return Err(Error::content(format_args!(
                "duplicate key `{}` among siblings",
                element.key
            )));
        }
        check_keys(&element.children)?;
    }
    Ok(())
}

/// Brings the children of the applier's current node from `current` to
/// `wanted` and returns what is now mounted there.
fn reconcile(
    applier: &mut dyn Applier<MemoryNode>,
    mut current: Vec<Mounted>,
    wanted: Vec<Element>,
) -> Result<Vec<Mounted>, Error> {
    {
        let keys: HashSet<&str> = wanted.iter().map(|e| e.key.as_str()).collect();
        let mut end = current.len();
        while end > 0 {
            if keys.contains(current[end - 1].key.as_str()) {
                end -= 1;
                continue;
            }
            let mut start = end - 1;
            while start > 0 && !keys.contains(current[start - 1].key.as_str()) {
                start -= 1;
            }
            applier.remove(start, end - start);
            current.drain(start..end);
            end = start;
        }
    }

    // Children are `placed ++ current` throughout.
    let mut placed = Vec::with_capacity(wanted.len());
    for (index, element) in wanted.into_iter().enumerate() {
        let Element { key, children } = element;
        if let Some(offset) = current.iter().position(|m| m.key == key) {
            if offset > 0 {
                applier.move_children(index + offset, index, 1);
            }
            let mut mounted = current.remove(offset);
            applier.down(mounted.node.clone());
            let previous = core::mem::take(&mut mounted.children);
            mounted.children = reconcile(applier, previous, children)?;
            applier.up()?;
            placed.push(mounted);
        } else {
            let mounted = build(applier, key, children)?;
            applier.insert_bottom_up(index, mounted.node.clone())?;
            placed.push(mounted);
        }
    }
    Ok(placed)
}

/// Builds a detached subtree, children first.
fn build(
    applier: &mut dyn Applier<MemoryNode>,
    key: String,
    children: Vec<Element>,
) -> Result<Mounted, Error> {
    let node = MemoryNode::new(key.clone());
    applier.down(node.clone());
    let mut mounted = Vec::with_capacity(children.len());
    for (index, child) in children.into_iter().enumerate() {
        let child = build(applier, child.key, child.children)?;
        applier.insert_bottom_up(index, child.node.clone())?;
        mounted.push(child);
    }
    applier.up()?;
    Ok(Mounted {
        key,
        node,
        children: mounted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{OpLog, RecordedOp, RecordingApplier};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use sublayer_core::StateSystem;

    struct Fixture {
        system: SnapshotSystem,
        composition: TreeComposition,
        applier: RecordingApplier,
        ops: OpLog,
        invalidations: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let system = SnapshotSystem::new();
        let engine = ComposeEngine::new(system.clone());
        let invalidations = Arc::new(AtomicUsize::new(0));
        let counter = invalidations.clone();
        let composition = engine.create_composition(
            &AmbientContext::root(),
            Invalidator::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let ops = OpLog::new();
        Fixture {
            system,
            composition,
            applier: RecordingApplier::new(MemoryNode::new("root"), ops.clone()),
            ops,
            invalidations,
        }
    }

    impl Fixture {
        fn compose(&mut self, content: Content) -> Result<(), Error> {
            self.composition.set_content(content);
            self.composition.recompose(&mut self.applier)
        }

        /// Recomposes with `content` and returns only the ops it applied.
        fn recompose_with(&mut self, content: Content) -> Vec<RecordedOp> {
            self.ops.take();
            self.compose(content).unwrap();
            self.ops.take()
        }

        fn tree(&self) -> String {
            self.applier.root().describe()
        }
    }

    fn labels(keys: &'static [&'static str]) -> Content {
        Content::new(move |scope| {
            for key in keys {
                scope.leaf(*key);
            }
            Ok(())
        })
    }

    #[test]
    fn builds_nested_nodes_bottom_up() {
        let mut f = fixture();
        let ops = f.recompose_with(Content::new(|scope| {
            scope.node("a", |scope| {
                scope.leaf("b");
                Ok(())
            })?;
            scope.leaf("c");
            Ok(())
        }));

        assert_eq!(f.tree(), "root[a[b] c]");
        assert_eq!(
            ops,
            [
                RecordedOp::insert("a", 0, "b"),
                RecordedOp::insert("root", 0, "a"),
                RecordedOp::insert("root", 1, "c"),
            ]
        );
    }

    #[test]
    fn removing_a_child_is_one_remove() {
        let mut f = fixture();
        f.compose(labels(&["a", "b", "c"])).unwrap();

        let ops = f.recompose_with(labels(&["a", "c"]));

        assert_eq!(ops, [RecordedOp::remove("root", 1, 1)]);
        assert_eq!(f.tree(), "root[a c]");
    }

    #[test]
    fn contiguous_removals_coalesce() {
        let mut f = fixture();
        f.compose(labels(&["a", "b", "c", "d", "e"])).unwrap();

        let ops = f.recompose_with(labels(&["a", "e"]));

        assert_eq!(ops, [RecordedOp::remove("root", 1, 3)]);
    }

    #[test]
    fn reordering_moves_existing_nodes() {
        let mut f = fixture();
        f.compose(labels(&["a", "b", "c"])).unwrap();
        let c = f.applier.root().children()[2].clone();

        let ops = f.recompose_with(labels(&["c", "a", "b"]));

        assert_eq!(ops, [RecordedOp::moved("root", 2, 0, 1)]);
        assert_eq!(f.tree(), "root[c a b]");
        assert!(f.applier.root().children()[0].ptr_eq(&c), "node identity kept");
    }

    #[test]
    fn unchanged_content_applies_nothing() {
        let mut f = fixture();
        f.compose(labels(&["a", "b"])).unwrap();

        assert!(f.recompose_with(labels(&["a", "b"])).is_empty());
    }

    #[test]
    fn duplicate_sibling_keys_fail_before_mutating() {
        let mut f = fixture();
        f.compose(labels(&["a"])).unwrap();

        let err = f.compose(labels(&["x", "x"])).unwrap_err();

        assert!(matches!(err, Error::Content(_)));
        assert_eq!(f.tree(), "root[a]");
    }

    #[test]
    fn reads_subscribe_to_state() {
        let mut f = fixture();
        let count = f.system.state(1_usize);
        let reader = count.clone();
        f.compose(Content::new(move |scope| {
            for n in 0..scope.read(&reader) {
                scope.leaf(format!("item{n}"));
            }
            Ok(())
        }))
        .unwrap();
        let before = f.invalidations.load(Ordering::SeqCst);

        count.set(3);
        assert!(!f.composition.has_pending_changes(), "not before a flush");
        f.system.send_apply_notifications();

        assert!(f.composition.has_pending_changes());
        assert_eq!(f.invalidations.load(Ordering::SeqCst), before + 1);
        f.composition.recompose(&mut f.applier).unwrap();
        assert_eq!(f.tree(), "root[item0 item1 item2]");
    }

    #[test]
    fn remembered_values_survive_and_release() {
        let mut f = fixture();
        let released = Arc::new(Mutex::new(Vec::new()));
        let show = f.system.state(true);
        let (log, reader) = (released.clone(), show.clone());
        f.compose(Content::new(move |scope| {
            if scope.read(&reader) {
                assert_eq!(*scope.remember("value", || 7_u32), 7);
                let log = log.clone();
                scope.disposable_effect("effect", move || {
                    Box::new(move || log.lock().unwrap().push("effect"))
                });
            }
            Ok(())
        }))
        .unwrap();
        f.composition.recompose(&mut f.applier).unwrap();
        assert!(released.lock().unwrap().is_empty(), "same keys keep slots");

        show.set(false);
        f.system.send_apply_notifications();
        f.composition.recompose(&mut f.applier).unwrap();

        assert_eq!(*released.lock().unwrap(), ["effect"]);
    }

    #[test]
    fn provide_scopes_ambient_values() {
        struct Theme(&'static str);

        let mut f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        f.compose(Content::new(move |scope| {
            scope.provide(Theme("dark"), |scope| {
                log.lock()
                    .unwrap()
                    .push(scope.ambient().get::<Theme>().map(|t| t.0));
                Ok(())
            })?;
            log.lock()
                .unwrap()
                .push(scope.ambient().get::<Theme>().map(|t| t.0));
            Ok(())
        }))
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), [Some("dark"), None]);
    }

    #[test]
    fn dispose_releases_in_reverse_order_and_unregisters() {
        let mut f = fixture();
        let released = Arc::new(Mutex::new(Vec::new()));
        let log = released.clone();
        f.compose(Content::new(move |scope| {
            for name in ["first", "second"] {
                let log = log.clone();
                scope.disposable_effect(name, move || {
                    Box::new(move || log.lock().unwrap().push(name))
                });
            }
            scope.leaf("a");
            Ok(())
        }))
        .unwrap();
        assert_eq!(f.system.composition_count(), 1);

        f.composition.dispose(&mut f.applier);

        assert_eq!(*released.lock().unwrap(), ["second", "first"]);
        assert_eq!(f.tree(), "root");
        assert_eq!(f.system.composition_count(), 0);
        assert!(!f.composition.has_pending_changes());
    }

    /// A sink that rejects insertions once its budget is spent.
    struct Budgeted {
        inner: RecordingApplier,
        inserts: usize,
    }

    impl Applier<MemoryNode> for Budgeted {
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
            if self.inserts == 0 {
                return Err(Error::content("sink rejected insert"));
            }
            self.inserts -= 1;
            self.inner.insert_bottom_up(index, node)
        }

        fn remove(&mut self, index: usize, count: usize) {
            self.inner.remove(index, count);
        }

        fn move_children(&mut self, from: usize, to: usize, count: usize) {
            self.inner.move_children(from, to, count);
        }

        fn clear(&mut self) {
            self.inner.clear();
        }
    }

    #[test]
    fn sink_failure_mid_reconcile_resets_the_root() {
        let mut f = fixture();
        f.compose(labels(&["a"])).unwrap();
        let mut budgeted = Budgeted {
            inner: RecordingApplier::new(f.applier.root().clone(), f.ops.clone()),
            inserts: 1,
        };

        f.composition.set_content(labels(&["a", "b", "c"]));
        let err = f.composition.recompose(&mut budgeted).unwrap_err();

        assert_eq!(err, Error::content("sink rejected insert"));
        assert_eq!(f.tree(), "root", "partial tree cleared");

        f.compose(labels(&["a", "b"])).unwrap();
        assert_eq!(f.tree(), "root[a b]", "rebuilt without duplicates");
    }

    fn keyed(keys: Vec<&'static str>) -> Content {
        Content::new(move |scope| {
            for key in &keys {
                scope.leaf(*key);
            }
            Ok(())
        })
    }

    fn arrangement() -> impl Strategy<Value = Vec<&'static str>> {
        prop::sample::subsequence(vec!["a", "b", "c", "d", "e", "f", "g", "h"], 0..=8)
            .prop_shuffle()
    }

    proptest! {
        #[test]
        fn reconciliation_reaches_the_target_and_keeps_survivors(
            before in arrangement(),
            after in arrangement(),
        ) {
            let mut f = fixture();
            f.compose(keyed(before.clone())).unwrap();
            let nodes = f.applier.root().children();

            f.compose(keyed(after.clone())).unwrap();

            let root = f.applier.root().clone();
            prop_assert_eq!(root.child_labels(), after.clone());
            for (index, key) in after.iter().enumerate() {
                if let Some(old) = before.iter().position(|k| k == key) {
                    prop_assert!(root.children()[index].ptr_eq(&nodes[old]));
                }
            }
        }
    }
}
