// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability traits that collaborators implement.
//!
//! The engine asks very little of the outside world:
//!
//! - a [`Root`] that re-derives its children on every rebuild and registers
//!   each of them with the [`UpdateContext`];
//! - view objects that can update themselves in place and report whether
//!   reuse was possible ([`Validity`]).
//!
//! [`Reconcile`] is the bridge that lets a single `UpdateContext` type drive
//! any view capability. It is implemented for the trait objects
//! [`dyn View<C>`](crate::scene::View) and
//! [`dyn TreeRow<C>`](crate::tree::TreeRow); implement it for your own
//! `dyn Trait` to run a further instantiation of the engine.

use crate::ReconcileError;
use crate::context::UpdateContext;
use crate::id::SourceKey;

/// Outcome of updating a view in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Validity {
    /// The view now reflects its source object.
    Valid,
    /// The view cannot be patched to match its source object and must be
    /// rebuilt from scratch.
    ///
    /// Only meaningful for reused views; a freshly created view is never
    /// asked to justify itself.
    Rejected,
}

impl Validity {
    /// Returns `true` for [`Validity::Valid`].
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl From<bool> for Validity {
    fn from(valid: bool) -> Self {
        if valid { Self::Valid } else { Self::Rejected }
    }
}

/// Visibility and selection state a view exposes to mirroring structures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ViewState {
    /// Whether the view is hidden.
    pub hidden: bool,
    /// Whether the view is selected.
    pub selected: bool,
}

/// Read-only access to another structure's views by source key.
///
/// A [`Scene`](crate::scene::Scene) implements this so that a
/// [`TreeUpdater`](crate::tree::TreeUpdater) row can mirror the state of the
/// render view for the same source object without re-deriving it.
pub trait ViewSource {
    /// Returns the state of the view mapped to `key`.
    ///
    /// Returns `None` if there is no such view, or if it cannot be observed
    /// right now (for example because its structure is mid-rebuild).
    fn view_state(&self, key: SourceKey) -> Option<ViewState>;
}

/// The top of a source graph.
///
/// On every rebuild the root must re-derive its set of child source objects
/// and register each one with the context through
/// [`update_or_create`](UpdateContext::update_or_create),
/// [`add`](UpdateContext::add), or [`add_ref`](UpdateContext::add_ref).
pub trait Root<V: ?Sized, C: ?Sized> {
    /// Walks the source graph for one rebuild.
    fn refresh(
        &mut self,
        cx: &mut UpdateContext<'_, V, C>,
        value: &C,
    ) -> Result<(), ReconcileError>;
}

impl<V, C, F> Root<V, C> for F
where
    V: ?Sized,
    C: ?Sized,
    F: FnMut(&mut UpdateContext<'_, V, C>, &C) -> Result<(), ReconcileError>,
{
    fn refresh(
        &mut self,
        cx: &mut UpdateContext<'_, V, C>,
        value: &C,
    ) -> Result<(), ReconcileError> {
        self(cx, value)
    }
}

/// Dispatches an in-place update to a view capability.
pub trait Reconcile<C: ?Sized> {
    /// Updates `self` against the context value, recursing into `cx` for
    /// children.
    fn reconcile(
        &mut self,
        cx: &mut UpdateContext<'_, Self, C>,
        value: &C,
    ) -> Result<Validity, ReconcileError>;
}
