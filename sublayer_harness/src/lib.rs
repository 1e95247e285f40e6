// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A reference engine and host for exercising `sublayer_core` end to end.
//!
//! - [`SnapshotSystem`] is a reactive state store whose change notifications
//!   are deferred until the controller flushes. Read dependencies are tracked
//!   with `understory_dirty`.
//! - [`ComposeEngine`] renders keyed [`Content`] closures into
//!   [`MemoryNode`] trees and reconciles them with minimal mutations.
//! - [`Scope::remember_layer`] and [`Scope::layer_content`] let content open
//!   secondary layers that close with their call site.
//! - [`HostScene`] plays the host: it creates and destroys layer roots and
//!   records every mutation through [`RecordingApplier`].
//! - [`RecordingSink`] captures the controller's trace events.

pub mod compose;
pub mod layers;
pub mod node;
pub mod recorder;
pub mod scene;
pub mod snapshot;

mod sync;

pub use compose::{ComposeEngine, Content, Scope, TreeComposition};
pub use layers::{HarnessLayer, HarnessLayerManager};
pub use node::MemoryNode;
pub use recorder::{OpLog, RecordedEvent, RecordedOp, RecordingApplier, RecordingSink};
pub use scene::{Destroyed, HostScene};
pub use snapshot::{SnapshotSystem, State};

use sublayer_core::{Controller, ControllerConfig};

/// A controller driving a [`ComposeEngine`] over [`MemoryNode`]s.
pub type HarnessController = Controller<MemoryNode, ComposeEngine>;

/// Creates an idle controller whose compositions share `system` and whose
/// layer roots live in `scene`.
///
/// The scene watches the controller's registry, so [`Destroyed::registered`]
/// reports what was still registered when each root was destroyed.
#[must_use]
pub fn controller(
    system: &SnapshotSystem,
    scene: &HostScene,
    config: ControllerConfig<Content>,
) -> HarnessController {
    let controller = Controller::new(
        ComposeEngine::new(system.clone()),
        system.clone(),
        scene.hooks(),
        config,
    );
    scene.watch(controller.layers());
    controller
}
