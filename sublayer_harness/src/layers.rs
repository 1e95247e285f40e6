// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layers as seen from inside content.
//!
//! A call site that wants a secondary tree remembers a layer through
//! [`Scope::remember_layer`] and feeds it through [`Scope::layer_content`].
//! The layer lives exactly as long as the call site stays in the
//! composition.

use sublayer_core::{Error, Layer, LayerManager};
use tracing::debug;

use crate::compose::{ComposeEngine, Content, Scope};
use crate::node::MemoryNode;

/// A layer created by a [`ComposeEngine`].
pub type HarnessLayer = Layer<MemoryNode, ComposeEngine>;

/// The registry of [`HarnessLayer`]s.
pub type HarnessLayerManager = LayerManager<MemoryNode, ComposeEngine>;

impl Scope<'_> {
    /// Returns the layer remembered under `key`, creating it on the first
    /// render that uses the key.
    ///
    /// The layer's composition sees the ambient values visible here. It is
    /// closed once a render no longer uses `key` or this composition is
    /// disposed. Fails with [`Error::NoLayerContext`] when no layer manager
    /// is in scope.
    pub fn remember_layer(&mut self, key: &str) -> Result<HarnessLayer, Error> {
        let manager = HarnessLayerManager::current(self.ambient())?;
        let parent = self.ambient().clone();
        let layer = self.remember(format!("{key}/layer"), move || manager.create_layer(&parent));
        let closing = HarnessLayer::clone(&layer);
        self.disposable_effect(format!("{key}/close"), move || {
            Box::new(move || {
                if let Err(error) = closing.close() {
                    debug!(layer = ?closing.id(), %error, "layer was closed elsewhere");
                }
            })
        });
        Ok(HarnessLayer::clone(&layer))
    }

    /// Makes `layer` render `content`.
    ///
    /// The layer reads its content from a state cell remembered under `key`,
    /// so passing new content later recomposes only the layer.
    pub fn layer_content(
        &mut self,
        layer: &HarnessLayer,
        key: &str,
        content: Content,
    ) -> Result<(), Error> {
        let system = self.system().clone();
        let initial = content.clone();
        let cell = self.remember(format!("{key}/content"), move || system.state(initial));
        if !cell.get_untracked().ptr_eq(&content) {
            cell.set(content);
        }

        let cell = cell.as_ref().clone();
        let target = HarnessLayer::clone(layer);
        let mut result = Ok(());
        self.disposable_effect(format!("{key}/set-content"), || {
            result = target.set_content(Content::new(move |scope| {
                let content = scope.read(&cell);
                content.render(scope)
            }));
            Box::new(|| {})
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sublayer_core::{AmbientContext, Composition, Engine, Invalidator, NodeApplier};
    use sublayer_core::trace::Tracer;
    use sublayer_core::{LayerState, NodeHooks, StateSystem};

    struct Fixture {
        engine: ComposeEngine,
        manager: HarnessLayerManager,
        ambient: AmbientContext,
    }

    fn fixture() -> Fixture {
        let engine = ComposeEngine::default();
        let manager = HarnessLayerManager::new(
            Arc::new(engine.clone()),
            NodeHooks::new(|| MemoryNode::new("layer"), |_| {}),
            Invalidator::noop(),
            Tracer::none(),
        );
        let ambient = manager.provide_to(&AmbientContext::root());
        Fixture {
            engine,
            manager,
            ambient,
        }
    }

    #[test]
    fn remember_layer_requires_a_manager() {
        let engine = ComposeEngine::default();
        let mut composition =
            engine.create_composition(&AmbientContext::root(), Invalidator::noop());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let log = seen.clone();
        composition.set_content(Content::new(move |scope| {
            *log.lock().unwrap() = Some(scope.remember_layer("popup").err());
            Ok(())
        }));

        composition
            .recompose(&mut NodeApplier::new(MemoryNode::new("root")))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(Some(Error::NoLayerContext)));
    }

    #[test]
    fn layer_lives_as_long_as_its_call_site() {
        let f = fixture();
        let show = f.engine.system().state(true);
        let reader = show.clone();
        let mut host = f.engine.create_composition(&f.ambient, Invalidator::noop());
        let mut applier = NodeApplier::new(MemoryNode::new("root"));
        host.set_content(Content::new(move |scope| {
            if scope.read(&reader) {
                scope.remember_layer("popup")?;
            }
            Ok(())
        }));

        host.recompose(&mut applier).unwrap();
        host.recompose(&mut applier).unwrap();
        let layers = f.manager.layers();
        assert_eq!(layers.len(), 1, "same key keeps one layer");

        show.set(false);
        f.engine.system().send_apply_notifications();
        host.recompose(&mut applier).unwrap();

        assert!(f.manager.is_empty());
        assert_eq!(layers[0].state(), LayerState::Disposed);
    }

    #[test]
    fn layer_closes_with_its_host() {
        let f = fixture();
        let mut host = f.engine.create_composition(&f.ambient, Invalidator::noop());
        let mut applier = NodeApplier::new(MemoryNode::new("root"));
        let label = f.engine.system().state("first");
        let reader = label.clone();
        host.set_content(Content::new(move |scope| {
            let text = scope.read(&reader);
            let layer = scope.remember_layer("popup")?;
            scope.layer_content(
                &layer,
                "popup",
                Content::new(move |scope| {
                    scope.leaf(text);
                    Ok(())
                }),
            )
        }));
        host.recompose(&mut applier).unwrap();
        let layer = f.manager.layers()[0].clone();

        assert_eq!(layer.state(), LayerState::Active);

        host.dispose(&mut applier);
        assert!(layer.is_closed());
        assert!(f.manager.is_empty());
    }
}
