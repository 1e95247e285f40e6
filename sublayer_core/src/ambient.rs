// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ambient values shared down a composition hierarchy.
//!
//! An [`AmbientContext`] is an immutable chain of type-keyed values. Providing
//! a value returns a new context whose lookups see that value first and fall
//! back to the enclosing chain; the enclosing context is unaffected:
//!
//! ```text
//!   root ◄── provide(Theme) ◄── provide(LayerManager) ◄── provide(Theme')
//!                                                              │
//!                                        get::<Theme>() ───────┘  → Theme'
//!                                        get::<LayerManager>()    → LayerManager
//! ```
//!
//! Every layer is created with a parent context, so values provided by the
//! host or by an enclosing composition are visible inside the layer even
//! though the layer mutates an unrelated node tree.

use core::any::{Any, TypeId, type_name};
use core::fmt;
use std::sync::Arc;

use crate::error::Error;

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// An immutable, cheaply cloned chain of ambient values.
#[derive(Clone, Default)]
pub struct AmbientContext {
    head: Option<Arc<Entry>>,
}

impl AmbientContext {
    /// Returns an empty context.
    #[inline]
    #[must_use]
    pub const fn root() -> Self {
        Self { head: None }
    }

    /// Returns a child context that provides `value`.
    #[must_use]
    pub fn provide<T: Any + Send + Sync>(&self, value: T) -> Self {
        self.provide_arc(Arc::new(value))
    }

    /// Returns a child context that provides an already shared `value`.
    #[must_use]
    pub fn provide_arc<T: Any + Send + Sync>(&self, value: Arc<T>) -> Self {
        Self {
            head: Some(Arc::new(Entry {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Looks up the nearest provided value of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let wanted = TypeId::of::<T>();
        self.entries()
            .find(|entry| entry.type_id == wanted)
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
    }

    /// Looks up the nearest provided value of type `T`, failing when absent.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, Error> {
        self.get::<T>().ok_or(Error::MissingAmbient {
            type_name: type_name::<T>(),
        })
    }

    /// Returns `true` if a value of type `T` is provided.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        let wanted = TypeId::of::<T>();
        self.entries().any(|entry| entry.type_id == wanted)
    }

    /// Returns the number of provided values, shadowed ones included.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries().count()
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        core::iter::successors(self.head.as_deref(), |entry| entry.parent.as_deref())
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries().map(|entry| entry.type_name))
            .finish()
    }
}
