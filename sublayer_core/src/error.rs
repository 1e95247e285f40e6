// Copyright 2026 the Sublayer Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Every fallible operation in the crate returns [`Error`]. Variants are
//! grouped into broad [`ErrorKind`]s so hosts can decide how to react without
//! matching on every variant.

use crate::layer::LayerId;

/// Broad classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required collaborator or ambient value was not provided.
    Configuration,
    /// A tree invariant would have been broken by an operation.
    InvariantViolation,
    /// An object was used or torn down after it was already torn down.
    Teardown,
    /// Recomputing a content description failed.
    Content,
}

/// Errors produced by the composition runtime.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Layer creation was attempted where no layer manager is in scope.
    #[error("no layer context provided")]
    NoLayerContext,

    /// A required ambient value was not provided by any enclosing scope.
    #[error("no ambient value of type `{type_name}` provided")]
    MissingAmbient {
        /// Name of the requested type.
        type_name: &'static str,
    },

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the frame loop")]
    NoRuntime,

    /// The layer manager in scope, or the one a layer belongs to, no longer
    /// exists.
    #[error("layer manager has been dropped")]
    ManagerDropped,

    /// A node that already has a parent was inserted as a child.
    #[error("node inserted at index {index} already has a parent")]
    AlreadyParented {
        /// Target index of the rejected insertion.
        index: usize,
    },

    /// The applier was asked to move up from the root node.
    #[error("applier navigation moved above the root node")]
    ApplierUnderflow,

    /// The layer is not (or no longer) registered with its manager.
    #[error("{0:?} is not registered with its layer manager")]
    LayerNotRegistered(LayerId),

    /// The layer has been closed and can no longer receive content.
    #[error("{0:?} has been closed")]
    LayerClosed(LayerId),

    /// The controller or clock has been closed.
    #[error("controller is closed")]
    Closed,

    /// A content description failed while being recomputed.
    #[error("content failed: {0}")]
    Content(String),
}

impl Error {
    /// Returns the broad classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoLayerContext
            | Self::MissingAmbient { .. }
            | Self::NoRuntime
            | Self::ManagerDropped => ErrorKind::Configuration,
            Self::AlreadyParented { .. } | Self::ApplierUnderflow => {
                ErrorKind::InvariantViolation
            }
            Self::LayerNotRegistered(_) | Self::LayerClosed(_) | Self::Closed => {
                ErrorKind::Teardown
            }
            Self::Content(_) => ErrorKind::Content,
        }
    }

    /// Creates a [`Error::Content`] from any displayable message.
    #[must_use]
    pub fn content(message: impl core::fmt::Display) -> Self {
        Self::Content(message.to_string())
    }
}
