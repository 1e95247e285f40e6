// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layers and the registry that owns them.
//!
//! A [`Layer`] is a subcomposition with its own root node and its own
//! reactive subscriptions. Layers share ambient context with whoever created
//! them (so values provided above a layer are visible inside it) while
//! mutating a tree the host can place anywhere, for example a popup surface
//! above the main content.
//!
//! The [`LayerManager`] is the ordered registry of live layers. It is provided
//! to every composition through the [`AmbientContext`](crate::AmbientContext),
//! which is how content creates further layers:
//!
//! ```text
//!   LayerManager ── registry (creation order) ──► [main, popup, tooltip]
//!        ▲                                          │
//!        └── LayerManager::current(ambient) ◄── composition of any layer
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   create_layer ──► set_content* ──► close
//!                                       ├─ 1. unregister (host node destructor runs)
//!                                       └─ 2. dispose composition
//! ```
//!
//! Unregistering first guarantees no recomposition pass, and no host
//! callback, sees a layer that is halfway torn down.

mod handle;
mod id;
mod manager;

pub use handle::{Layer, LayerState};
pub use id::LayerId;
pub use manager::{LayerManager, NodeHooks};

pub(crate) use manager::WeakLayerManager;
