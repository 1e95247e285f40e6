// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame-synchronized recomposition and layered subcompositions.
//!
//! `sublayer_core` binds an external reactive engine to a retained-mode tree of
//! host-defined nodes. It decides *when* pending reactive invalidations are
//! applied, drives recomputation of declarative content into tree mutations,
//! and manages any number of independently lifecycled layers that share
//! ambient context with the main composition while mutating disjoint trees.
//!
//! # Architecture
//!
//! ```text
//!   FrameTiming (interval or host timestamps)
//!       │
//!       ▼
//!   Controller tick ──► ApplyGate::take() ──► StateSystem::send_apply_notifications()
//!       │                                         │ compositions invalidate
//!       ▼                                         ▼
//!   BroadcastFrameClock::send_frame() ◄── RecomposeScheduler::request()
//!       │
//!       ▼
//!   pass: for each Layer in LayerManager ──► Composition::recompose(&mut dyn Applier)
//!       │                                                  │
//!       ▼                                                  ▼
//!   on_nodes_changed() (once, if anything changed)     TreeNode mutations
//! ```
//!
//! **[`controller`]**: [`Controller`] owns the frame loop, the write observer,
//! the layer registry and the main layer.
//!
//! **[`layer`]**: [`LayerManager`] registry and [`Layer`] handles with their
//! close-before-dispose teardown ordering.
//!
//! **[`applier`]**: the [`Applier`] mutation-sink trait and the default
//! [`NodeApplier`], which enforces bottom-up insertion of unparented nodes.
//!
//! **[`node`]**: the [`TreeNode`] capability set hosts implement.
//!
//! **[`ambient`]**: [`AmbientContext`], the type-keyed values shared down a
//! composition hierarchy (including into layers).
//!
//! **[`engine`]**: contracts for the reactive [`StateSystem`] and the
//! recomputation [`Engine`].
//!
//! **[`clock`]**, **[`timing`]**, **[`scheduler`]**: the frame clock, frame
//! sources, and the gates that bound work to one flush and one pass per tick.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) hooks for tooling, with a
//! zero-overhead [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod ambient;
pub mod applier;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod error;
pub mod layer;
pub mod node;
pub mod scheduler;
pub mod time;
pub mod timing;
pub mod trace;

mod sync;
#[cfg(test)]
mod testing;

pub use ambient::AmbientContext;
pub use applier::{Applier, NodeApplier, TreeOp};
pub use clock::BroadcastFrameClock;
pub use controller::{Controller, ControllerConfig, ControllerState};
pub use engine::{Composition, Engine, Invalidator, StateSystem, Subscription, WriteObserver};
pub use error::{Error, ErrorKind};
pub use layer::{Layer, LayerId, LayerManager, LayerState, NodeHooks};
pub use node::TreeNode;
pub use scheduler::{ApplyGate, LayerFailurePolicy, PassReport};
pub use time::HostTime;
pub use timing::FrameTiming;
