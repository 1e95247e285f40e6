// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use super::handle::Layer;
use super::id::LayerId;
use crate::ambient::AmbientContext;
use crate::applier::{Applier, NodeApplier};
use crate::engine::{Engine, Invalidator};
use crate::error::Error;
use crate::node::TreeNode;
use crate::sync::lock;
use crate::trace::{LayerEventKind, Tracer};

type CreateNode<N> = Arc<dyn Fn() -> N + Send + Sync>;
type RemoveNode<N> = Arc<dyn Fn(&N) + Send + Sync>;
type MakeSink<N> = Arc<dyn Fn(N) -> Box<dyn Applier<N>> + Send + Sync>;

/// Host callbacks that create, destroy and mutate layer root nodes.
pub struct NodeHooks<N> {
    create_node: CreateNode<N>,
    remove_node: RemoveNode<N>,
    make_sink: MakeSink<N>,
}

impl<N: TreeNode> NodeHooks<N> {
    /// Creates hooks from a root-node constructor and destructor.
    ///
    /// Layers mutate their roots through a [`NodeApplier`] unless
    /// [`with_sink_factory`](Self::with_sink_factory) overrides it.
    #[must_use]
    pub fn new(
        create_node: impl Fn() -> N + Send + Sync + 'static,
        remove_node: impl Fn(&N) + Send + Sync + 'static,
    ) -> Self {
        Self {
            create_node: Arc::new(create_node),
            remove_node: Arc::new(remove_node),
            make_sink: Arc::new(|root| Box::new(NodeApplier::new(root))),
        }
    }

    /// Replaces the factory that builds each layer's mutation sink.
    #[must_use]
    pub fn with_sink_factory(
        mut self,
        make_sink: impl Fn(N) -> Box<dyn Applier<N>> + Send + Sync + 'static,
    ) -> Self {
        self.make_sink = Arc::new(make_sink);
        self
    }
}

impl<N> Clone for NodeHooks<N> {
    fn clone(&self) -> Self {
        Self {
            create_node: self.create_node.clone(),
            remove_node: self.remove_node.clone(),
            make_sink: self.make_sink.clone(),
        }
    }
}

impl<N> fmt::Debug for NodeHooks<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHooks").finish_non_exhaustive()
    }
}

pub(crate) struct ManagerShared<N: TreeNode, E: Engine<N>> {
    engine: Arc<E>,
    hooks: NodeHooks<N>,
    invalidator: Invalidator,
    tracer: Tracer,
    /// Active layers in creation order.
    layers: Mutex<Vec<Layer<N, E>>>,
    next_id: AtomicU64,
}

impl<N: TreeNode, E: Engine<N>> ManagerShared<N, E> {
    /// Unregisters `layer` and then destroys its root node.
    pub(crate) fn remove(&self, layer: &Layer<N, E>) -> Result<(), Error> {
        let removed = {
            let mut layers = lock(&self.layers);
            let index = layers
                .iter()
                .position(|registered| registered.ptr_eq(layer))
                .ok_or(Error::LayerNotRegistered(layer.id()))?;
            layers.remove(index)
        };
        (self.hooks.remove_node)(removed.root());
        self.tracer.layer(removed.id(), LayerEventKind::Removed);
        debug!(layer = ?removed.id(), "layer removed");
        Ok(())
    }
}

/// Ambient key under which a manager is provided to compositions.
struct LayerContext<N: TreeNode, E: Engine<N>>(Weak<ManagerShared<N, E>>);

/// Registry of the layers created for one controller.
///
/// Cloning yields another handle to the same registry.
pub struct LayerManager<N: TreeNode, E: Engine<N>> {
    shared: Arc<ManagerShared<N, E>>,
}

impl<N: TreeNode, E: Engine<N>> Clone for LayerManager<N, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<N: TreeNode, E: Engine<N>> LayerManager<N, E> {
    /// Creates an empty registry.
    ///
    /// Every composition it creates calls `invalidator` when it needs to be
    /// recomposed.
    #[must_use]
    pub fn new(
        engine: Arc<E>,
        hooks: NodeHooks<N>,
        invalidator: Invalidator,
        tracer: Tracer,
    ) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                engine,
                hooks,
                invalidator,
                tracer,
                layers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the manager provided to `ambient`.
    ///
    /// Fails with [`Error::NoLayerContext`] when no manager is in scope and
    /// [`Error::ManagerDropped`] when the provided manager no longer exists.
    pub fn current(ambient: &AmbientContext) -> Result<Self, Error> {
        let context = ambient
            .get::<LayerContext<N, E>>()
            .ok_or(Error::NoLayerContext)?;
        let shared = context.0.upgrade().ok_or(Error::ManagerDropped)?;
        Ok(Self { shared })
    }

    /// Returns a child of `ambient` that provides this manager.
    ///
    /// The context holds the manager weakly, so compositions never keep their
    /// own registry alive.
    #[must_use]
    pub fn provide_to(&self, ambient: &AmbientContext) -> AmbientContext {
        ambient.provide(LayerContext(Arc::downgrade(&self.shared)))
    }

    /// Creates and registers a layer whose composition sees `parent`.
    ///
    /// The host's node constructor runs first; the new layer is appended to
    /// the registry.
    pub fn create_layer(&self, parent: &AmbientContext) -> Layer<N, E> {
        let shared = &self.shared;
        let id = LayerId::from_raw(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let root = (shared.hooks.create_node)();
        let sink = (shared.hooks.make_sink)(root.clone());
        let composition = shared
            .engine
            .create_composition(parent, shared.invalidator.clone());
        let layer = Layer::new(
            id,
            Arc::downgrade(shared),
            parent.clone(),
            root,
            composition,
            sink,
            shared.invalidator.clone(),
        );
        lock(&shared.layers).push(layer.clone());
        shared.tracer.layer(id, LayerEventKind::Created);
        debug!(layer = ?id, "layer created");
        layer
    }

    /// Unregisters `layer` and destroys its root node without disposing its
    /// composition. [`Layer::close`] is the usual way to tear a layer down.
    pub fn remove_layer(&self, layer: &Layer<N, E>) -> Result<(), Error> {
        self.shared.remove(layer)
    }

    /// Returns the registered layers in creation order.
    #[must_use]
    pub fn layers(&self) -> Vec<Layer<N, E>> {
        lock(&self.shared.layers).clone()
    }

    /// Returns the number of registered layers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.shared.layers).len()
    }

    /// Returns `true` if no layer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.shared.layers).is_empty()
    }

    /// Returns `true` if a layer with `id` is registered.
    #[must_use]
    pub fn contains(&self, id: LayerId) -> bool {
        lock(&self.shared.layers).iter().any(|layer| layer.id() == id)
    }

    /// Returns `true` if both handles refer to the same registry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakLayerManager<N, E> {
        WeakLayerManager(Arc::downgrade(&self.shared))
    }

    /// Closes every remaining layer, newest first.
    ///
    /// Host destructors may close other layers mid-sweep; those report
    /// [`Error::LayerNotRegistered`] and are skipped. Layers opened during the
    /// sweep are picked up by the next one.
    pub(crate) fn close_all(&self) {
        loop {
            let layers = self.layers();
            if layers.is_empty() {
                break;
            }
            for layer in layers.iter().rev() {
                if let Err(error) = layer.close() {
                    debug!(layer = ?layer.id(), %error, "layer closed elsewhere during shutdown");
                }
            }
        }
    }
}

impl<N: TreeNode, E: Engine<N>> fmt::Debug for LayerManager<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<LayerId> = lock(&self.shared.layers).iter().map(Layer::id).collect();
        f.debug_struct("LayerManager")
            .field("layers", &ids)
            .finish_non_exhaustive()
    }
}

/// A non-owning manager handle held by the recomposition scheduler.
pub(crate) struct WeakLayerManager<N: TreeNode, E: Engine<N>>(Weak<ManagerShared<N, E>>);

impl<N: TreeNode, E: Engine<N>> WeakLayerManager<N, E> {
    pub(crate) fn upgrade(&self) -> Option<LayerManager<N, E>> {
        self.0.upgrade().map(|shared| LayerManager { shared })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerState;
    use crate::testing::{CountingEngine, TestNode};
    use std::sync::atomic::AtomicUsize;

    type TestManager = LayerManager<TestNode, CountingEngine>;

    fn manager() -> TestManager {
        LayerManager::new(
            Arc::new(CountingEngine::default()),
            NodeHooks::new(TestNode::new, |_| {}),
            Invalidator::noop(),
            Tracer::none(),
        )
    }

    #[test]
    fn layers_register_in_creation_order() {
        let manager = manager();
        let a = manager.create_layer(&AmbientContext::root());
        let b = manager.create_layer(&AmbientContext::root());

        let ids: Vec<LayerId> = manager.layers().iter().map(Layer::id).collect();
        assert_eq!(ids, [a.id(), b.id()]);
        assert!(a.id() < b.id(), "ids are monotonic");
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn close_unregisters_before_destroying_the_node() {
        let slot: Arc<Mutex<Option<TestManager>>> = Arc::new(Mutex::new(None));
        let seen_registered = Arc::new(Mutex::new(Vec::new()));
        let (hook_slot, hook_seen) = (slot.clone(), seen_registered.clone());
        let manager = LayerManager::new(
            Arc::new(CountingEngine::default()),
            NodeHooks::new(TestNode::new, move |root: &TestNode| {
                let guard = hook_slot.lock().unwrap();
                let manager = guard.as_ref().unwrap();
                let registered = manager.layers().iter().any(|l| l.root().is(root));
                hook_seen.lock().unwrap().push(registered);
            }),
            Invalidator::noop(),
            Tracer::none(),
        );
        *slot.lock().unwrap() = Some(manager.clone());

        let layer = manager.create_layer(&AmbientContext::root());
        layer.close().unwrap();

        assert_eq!(*seen_registered.lock().unwrap(), [false]);
        assert!(manager.is_empty());
        assert_eq!(layer.state(), LayerState::Disposed);
        slot.lock().unwrap().take();
    }

    #[test]
    fn double_close_is_a_teardown_error() {
        let manager = manager();
        let layer = manager.create_layer(&AmbientContext::root());
        layer.close().unwrap();

        assert_eq!(layer.close(), Err(Error::LayerNotRegistered(layer.id())));
        assert_eq!(
            layer.set_content(Ok(1)),
            Err(Error::LayerClosed(layer.id())),
            "closed layers refuse content"
        );
    }

    #[test]
    fn remove_layer_does_not_dispose() {
        let engine = Arc::new(CountingEngine::default());
        let disposed = engine.disposed.clone();
        let manager = LayerManager::new(
            engine,
            NodeHooks::new(TestNode::new, |_| {}),
            Invalidator::noop(),
            Tracer::none(),
        );
        let layer = manager.create_layer(&AmbientContext::root());

        manager.remove_layer(&layer).unwrap();

        assert!(!manager.contains(layer.id()));
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
        assert_eq!(layer.state(), LayerState::Active);
    }

    #[test]
    fn current_requires_a_provided_manager() {
        let manager = manager();
        let err = TestManager::current(&AmbientContext::root()).unwrap_err();
        assert_eq!(err, Error::NoLayerContext);

        let ambient = manager.provide_to(&AmbientContext::root());
        let found = TestManager::current(&ambient).unwrap();
        assert!(found.ptr_eq(&manager), "resolves the provided manager");

        drop((manager, found));
        assert_eq!(
            TestManager::current(&ambient).unwrap_err(),
            Error::ManagerDropped
        );
    }

    #[test]
    fn layers_keep_their_parent_context() {
        let manager = manager();
        let ambient = manager.provide_to(&AmbientContext::root());
        let layer = manager.create_layer(&ambient);
        let nested = TestManager::current(layer.parent_context()).unwrap();
        assert!(nested.ptr_eq(&manager), "nested layers see the same manager");
    }

    #[test]
    fn recompose_reports_structural_changes() {
        let manager = manager();
        let layer = manager.create_layer(&AmbientContext::root());
        assert_eq!(layer.recompose(), Ok(None), "nothing pending yet");

        layer.set_content(Ok(3)).unwrap();
        assert_eq!(layer.recompose(), Ok(Some(3)));
        assert_eq!(layer.root().child_ids().len(), 3);
        assert_eq!(layer.recompose(), Ok(None), "pending work consumed");

        layer.set_content(Err("broken")).unwrap();
        assert_eq!(layer.recompose(), Err(Error::content("broken")));
    }

    #[test]
    fn isolated_layers_are_skipped_until_new_content() {
        let manager = manager();
        let layer = manager.create_layer(&AmbientContext::root());
        layer.set_content(Ok(1)).unwrap();
        layer.isolate();

        assert_eq!(layer.state(), LayerState::Failed);
        assert_eq!(layer.recompose(), Ok(None));

        layer.set_content(Ok(2)).unwrap();
        assert_eq!(layer.state(), LayerState::Active);
        assert_eq!(layer.recompose(), Ok(Some(2)));
    }

    #[test]
    fn close_all_closes_newest_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        let created = Arc::new(AtomicUsize::new(0));
        let manager = LayerManager::new(
            Arc::new(CountingEngine::default()),
            NodeHooks::new(
                move || {
                    created.fetch_add(1, Ordering::SeqCst);
                    TestNode::new()
                },
                move |root: &TestNode| log.lock().unwrap().push(root.id()),
            ),
            Invalidator::noop(),
            Tracer::none(),
        );
        let first = manager.create_layer(&AmbientContext::root());
        let second = manager.create_layer(&AmbientContext::root());

        manager.close_all();

        assert!(manager.is_empty());
        assert_eq!(*order.lock().unwrap(), [second.root().id(), first.root().id()]);
        assert!(first.is_closed() && second.is_closed(), "all layers disposed");
    }

    #[test]
    fn close_all_survives_layers_closed_by_the_host() {
        let victim: Arc<Mutex<Option<Layer<TestNode, CountingEngine>>>> =
            Arc::new(Mutex::new(None));
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let (hook_victim, log) = (victim.clone(), destroyed.clone());
        let manager = LayerManager::new(
            Arc::new(CountingEngine::default()),
            NodeHooks::new(TestNode::new, move |root: &TestNode| {
                log.lock().unwrap().push(root.id());
                let layer = hook_victim.lock().unwrap().take();
                if let Some(layer) = layer {
                    layer.close().unwrap();
                }
            }),
            Invalidator::noop(),
            Tracer::none(),
        );
        let first = manager.create_layer(&AmbientContext::root());
        let second = manager.create_layer(&AmbientContext::root());
        let third = manager.create_layer(&AmbientContext::root());
        // Destroying the newest root closes the oldest layer from the host.
        *victim.lock().unwrap() = Some(first.clone());

        manager.close_all();

        assert!(manager.is_empty(), "no layer left registered");
        assert_eq!(
            *destroyed.lock().unwrap(),
            [third.root().id(), first.root().id(), second.root().id()]
        );
        assert!([&first, &second, &third].iter().all(|l| l.is_closed()));
    }
}
