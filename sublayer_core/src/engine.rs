// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contracts for the external reactive machinery.
//!
//! The runtime drives two collaborators it does not implement:
//!
//! - a [`StateSystem`], which tracks reactive state, tells the runtime when
//!   something was written, and delivers pending change notifications when
//!   asked to (the *flush*);
//! - an [`Engine`], which turns a content description into tree mutations.
//!   Each layer owns one [`Composition`] created by the engine.
//!
//! ```text
//!   write ──► WriteObserver ──► ApplyGate ──(tick)──► send_apply_notifications
//!                                                          │
//!                             Composition becomes invalid ◄┘
//!                                       │
//!                        Invalidator::invalidate ──► next tick's pass
//! ```

use core::fmt;
use std::sync::Arc;

use crate::ambient::AmbientContext;
use crate::applier::Applier;
use crate::error::Error;
use crate::node::TreeNode;

/// Callback invoked on every reactive write, from whatever thread wrote.
pub type WriteObserver = Arc<dyn Fn() + Send + Sync>;

/// The reactive state system the controller flushes once per tick.
pub trait StateSystem: Send + Sync + 'static {
    /// Registers a callback invoked on every write.
    ///
    /// The observer stays registered until the returned [`Subscription`] is
    /// disposed or dropped.
    fn register_write_observer(&self, observer: WriteObserver) -> Subscription;

    /// Delivers pending change notifications, invalidating the compositions
    /// that read changed state.
    fn send_apply_notifications(&self);
}

/// A scoped registration that is released exactly once.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `release` when disposed.
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Creates a subscription with nothing to release.
    #[must_use]
    pub const fn empty() -> Self {
        Self { release: None }
    }

    /// Releases the registration. Later calls do nothing.
    pub fn dispose(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Returns `true` once the registration has been released.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Requests a recomposition pass on the next frame.
///
/// Compositions call [`invalidate`](Self::invalidate) whenever they have
/// pending work; repeated calls before the pass runs are coalesced.
#[derive(Clone)]
pub struct Invalidator {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl Invalidator {
    /// Creates an invalidator that calls `notify`.
    #[must_use]
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Creates an invalidator that does nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Requests a pass.
    #[inline]
    pub fn invalidate(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidator").finish_non_exhaustive()
    }
}

/// Creates one [`Composition`] per layer.
pub trait Engine<N: TreeNode>: Send + Sync + 'static {
    /// The declarative content a composition is given.
    type Content: Send + 'static;

    /// The per-layer composition type.
    type Composition: Composition<N, Content = Self::Content>;

    /// Creates a composition that resolves ambient values through `parent`
    /// and calls `invalidator` whenever it needs to be recomposed.
    fn create_composition(
        &self,
        parent: &AmbientContext,
        invalidator: Invalidator,
    ) -> Self::Composition;
}

/// A recomposable description of one layer's node tree.
pub trait Composition<N>: Send + 'static {
    /// The declarative content type.
    type Content;

    /// Replaces the content. The composition must report pending changes
    /// afterwards.
    fn set_content(&mut self, content: Self::Content);

    /// Returns `true` if [`recompose`](Self::recompose) has work to do.
    fn has_pending_changes(&self) -> bool;

    /// Recomputes invalidated content and emits the resulting mutations.
    fn recompose(&mut self, applier: &mut dyn Applier<N>) -> Result<(), Error>;

    /// Releases every reactive subscription and removes emitted nodes.
    fn dispose(&mut self, applier: &mut dyn Applier<N>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let mut sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.dispose();
        sub.dispose();
        drop(sub);

        assert_eq!(released.load(Ordering::SeqCst), 1, "released exactly once");
    }

    #[test]
    fn dropping_subscription_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(Subscription::empty().is_disposed());
    }

    #[test]
    fn invalidator_calls_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let invalidator = Invalidator::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        invalidator.clone().invalidate();
        invalidator.invalidate();
        Invalidator::noop().invalidate();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
