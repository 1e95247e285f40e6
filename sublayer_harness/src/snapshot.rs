// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small reactive state system with deferred change delivery.
//!
//! Writes to a [`State`] take effect immediately but only *notify* readers
//! when the controller flushes by calling
//! [`send_apply_notifications`](StateSystem::send_apply_notifications).
//! Reads made while a composition renders are recorded as dependency edges in
//! an [`understory_dirty`] tracker; a flush marks every written state dirty
//! with eager propagation and invalidates the compositions that read them.
//!
//! ```text
//!   State::set ──► pending ──► write observers (any thread)
//!                    │
//!   flush ──► mark_with(state, READS, Eager) ──► drain ──► composition invalidated
//! ```

use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use sublayer_core::{StateSystem, Subscription, WriteObserver};
use understory_dirty::{Channel, CycleHandling, DirtyTracker, EagerPolicy};

use crate::sync::lock;

/// Dirty channel carrying "a state this composition read has changed".
pub const READS: Channel = Channel::new(0);

type Invalidate = Arc<dyn Fn() + Send + Sync>;

struct Registry {
    /// Edges run from compositions (dependents) to the states they read.
    tracker: DirtyTracker<u32>,
    reads: HashMap<u32, Vec<u32>>,
    compositions: HashMap<u32, Invalidate>,
}

struct SystemInner {
    next_key: AtomicU32,
    registry: Mutex<Registry>,
    pending: Mutex<Vec<u32>>,
    observers: Mutex<Vec<(u64, WriteObserver)>>,
    next_observer: AtomicU64,
    flushes: AtomicU64,
    writes: AtomicU64,
}

impl SystemInner {
    fn record_write(&self, state: u32) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = lock(&self.pending);
            if !pending.contains(&state) {
                pending.push(state);
            }
        }
        let observers: Vec<WriteObserver> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer();
        }
    }

    fn forget_state(&self, state: u32) {
        lock(&self.registry).tracker.remove_key(state);
        lock(&self.pending).retain(|key| *key != state);
    }
}

/// Reactive state store shared by every composition of a controller.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct SnapshotSystem {
    inner: Arc<SystemInner>,
}

impl Default for SnapshotSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSystem {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SystemInner {
                next_key: AtomicU32::new(0),
                registry: Mutex::new(Registry {
                    tracker: DirtyTracker::with_cycle_handling(CycleHandling::Error),
                    reads: HashMap::new(),
                    compositions: HashMap::new(),
                }),
                pending: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a state cell holding `initial`.
    #[must_use]
    pub fn state<T: Clone + Send + Sync + 'static>(&self, initial: T) -> State<T> {
        State {
            cell: Arc::new(StateCell {
                key: self.allocate_key(),
                value: Mutex::new(initial),
                system: Arc::downgrade(&self.inner),
            }),
        }
    }

    /// Returns how many times change notifications were sent.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    /// Returns how many writes have been made.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of registered write observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }

    /// Returns the number of distinct states written since the last flush.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Returns the number of live compositions.
    #[must_use]
    pub fn composition_count(&self) -> usize {
        lock(&self.inner.registry).compositions.len()
    }

    fn allocate_key(&self) -> u32 {
        self.inner.next_key.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_composition(&self, on_invalid: Invalidate) -> u32 {
        let key = self.allocate_key();
        lock(&self.inner.registry).compositions.insert(key, on_invalid);
        key
    }

    pub(crate) fn unregister_composition(&self, composition: u32) {
        let mut registry = lock(&self.inner.registry);
        registry.compositions.remove(&composition);
        registry.reads.remove(&composition);
        registry.tracker.remove_key(composition);
    }

    /// Drops every dependency recorded by the composition's previous render.
    pub(crate) fn clear_reads(&self, composition: u32) {
        let mut registry = lock(&self.inner.registry);
        let Some(states) = registry.reads.remove(&composition) else {
            return;
        };
        for state in states {
            registry.tracker.remove_dependency(composition, state, READS);
        }
    }

    pub(crate) fn record_read(&self, composition: u32, state: u32) {
        let mut registry = lock(&self.inner.registry);
        let reads = registry.reads.entry(composition).or_default();
        if reads.contains(&state) {
            return;
        }
        reads.push(state);
        // States never depend on anything, so a composition-to-state edge
        // cannot close a cycle.
        _ = registry.tracker.add_dependency(composition, state, READS);
    }
}

impl StateSystem for SnapshotSystem {
    fn register_write_observer(&self, observer: WriteObserver) -> Subscription {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).push((id, observer));
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.observers).retain(|(other, _)| *other != id);
            }
        })
    }

    fn send_apply_notifications(&self) {
        self.inner.flushes.fetch_add(1, Ordering::SeqCst);
        let pending = core::mem::take(&mut *lock(&self.inner.pending));
        if pending.is_empty() {
            return;
        }
        let invalidations: Vec<Invalidate> = {
            let mut registry = lock(&self.inner.registry);
            for state in pending {
                registry.tracker.mark_with(state, READS, &EagerPolicy);
            }
            let dirty: Vec<u32> = registry
                .tracker
                .drain(READS)
                .affected()
                .deterministic()
                .run()
                .collect();
            dirty
                .iter()
                .filter_map(|key| registry.compositions.get(key).cloned())
                .collect()
        };
        for invalidate in invalidations {
            invalidate();
        }
    }
}

impl fmt::Debug for SnapshotSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotSystem")
            .field("flushes", &self.flush_count())
            .field("pending_writes", &self.pending_writes())
            .field("compositions", &self.composition_count())
            .finish_non_exhaustive()
    }
}

struct StateCell<T> {
    key: u32,
    value: Mutex<T>,
    system: Weak<SystemInner>,
}

impl<T> Drop for StateCell<T> {
    fn drop(&mut self) {
        if let Some(system) = self.system.upgrade() {
            system.forget_state(self.key);
        }
    }
}

/// A reactive value. Cloning yields another handle to the same cell.
pub struct State<T> {
    cell: Arc<StateCell<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> State<T> {
    /// Returns the value without recording a dependency.
    #[must_use]
    pub fn get_untracked(&self) -> T {
        lock(&self.cell.value).clone()
    }

    /// Replaces the value and notifies write observers.
    pub fn set(&self, value: T) {
        *lock(&self.cell.value) = value;
        self.notify();
    }

    /// Mutates the value in place and notifies write observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut lock(&self.cell.value));
        self.notify();
    }

    pub(crate) fn key(&self) -> u32 {
        self.cell.key
    }

    fn notify(&self) {
        if let Some(system) = self.cell.system.upgrade() {
            system.record_write(self.cell.key);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("key", &self.cell.key)
            .field("value", &*lock(&self.cell.value))
            .finish()
    }
}
