// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-rebuild update session.
//!
//! An [`UpdateContext`] wraps one [`IdentityMap`] for exactly one rebuild. It
//! opens the map's update window, hands out create-or-reuse operations to the
//! root and to every view it updates, records the order in which views are
//! visited, and finally [`commit`](UpdateContext::commit)s: the window is
//! closed, stale entries are swept, and the context is poisoned.
//!
//! # Traversal order
//!
//! A view is logged *before* its update runs, and its update recurses into the
//! same context for its children. The visit log is therefore a pre-order
//! depth-first walk of the reachable source graph.
//!
//! # Reuse rejection
//!
//! When a reused view reports [`Validity::Rejected`], everything logged since
//! the rejected call began is unwound: views created during the failed update
//! are dropped, and views reconfirmed during it become dirty again. The view
//! itself is dropped, a replacement is created, and the replacement's update
//! walks the children afresh.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::ReconcileError;
use crate::id::{SourceKey, ViewId};
use crate::map::{IdentityMap, Lookup};
use crate::trace::{
    RebuildEndEvent, RebuildFaultEvent, TargetKind, Tracer, ViewChange, ViewChangeKind,
};
use crate::view::{Reconcile, Validity, ViewSource, ViewState};

/// Counters describing one rebuild.
///
/// `created`, `reused`, `rejected`, and `shared` count work performed,
/// including work that a reuse rejection later rolled back. `visited` is the
/// length of the final visit order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RebuildSummary {
    /// Generation published by the rebuild.
    pub generation: u64,
    /// Number of views in the published order.
    pub visited: usize,
    /// Views created, including replacements for rejected views.
    pub created: usize,
    /// Dirty views updated in place and kept.
    pub reused: usize,
    /// Reused views that rejected their update.
    pub rejected: usize,
    /// Repeat visits to a view already confirmed in the same rebuild.
    pub shared: usize,
    /// Views dropped by the closing sweep.
    pub swept: usize,
}

/// The result of a committed rebuild.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rebuilt {
    /// Views in visitation order.
    pub order: Vec<ViewId>,
    /// Counters for the rebuild.
    pub summary: RebuildSummary,
}

#[derive(Clone, Copy, Debug)]
enum Prior {
    Created,
    Reconfirmed(u64),
}

/// A create-or-reuse session over one [`IdentityMap`] for one rebuild.
///
/// `V` is the view capability (a trait object such as
/// [`dyn View<C>`](crate::scene::View)), `C` the context value threaded
/// unchanged through every update.
pub struct UpdateContext<'a, V: ?Sized, C: ?Sized> {
    map: &'a mut IdentityMap<SourceKey, Box<V>>,
    value: &'a C,
    peer: Option<&'a dyn ViewSource>,
    tracer: Tracer<'a>,
    target: TargetKind,
    generation: u64,
    order: Vec<ViewId>,
    priors: Vec<Prior>,
    summary: RebuildSummary,
    expired: bool,
}

impl<V: ?Sized, C: ?Sized> fmt::Debug for UpdateContext<'_, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateContext")
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("order", &self.order)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl<'a, V, C> UpdateContext<'a, V, C>
where
    V: ?Sized + Reconcile<C>,
    C: ?Sized,
{
    /// Opens `map` for update and starts a session that will publish
    /// `generation`.
    pub fn open(
        map: &'a mut IdentityMap<SourceKey, Box<V>>,
        value: &'a C,
        generation: u64,
    ) -> Result<Self, ReconcileError> {
        map.begin_update()?;
        Ok(Self {
            map,
            value,
            peer: None,
            tracer: Tracer::none(),
            target: TargetKind::Scene,
            generation,
            order: Vec::new(),
            priors: Vec::new(),
            summary: RebuildSummary::default(),
            expired: false,
        })
    }

    /// Routes per-view and end-of-rebuild events to `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer<'a>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Tags emitted events with `target`.
    #[must_use]
    pub fn with_target(mut self, target: TargetKind) -> Self {
        self.target = target;
        self
    }

    /// Gives views read access to a peer structure through
    /// [`mirror`](Self::mirror).
    #[must_use]
    pub fn with_peer(mut self, peer: &'a dyn ViewSource) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Returns the generation this session will publish.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the context value.
    #[must_use]
    pub fn value(&self) -> &'a C {
        self.value
    }

    /// Returns the views visited so far, in visitation order.
    #[must_use]
    pub fn visited(&self) -> &[ViewId] {
        &self.order
    }

    /// Returns whether the session is poisoned.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Returns the view for `key` if it was already confirmed in this
    /// rebuild.
    ///
    /// Dirty entries read as absent: they have not been revisited yet and
    /// may be about to change or disappear.
    #[must_use]
    pub fn lookup(&self, key: SourceKey) -> Option<ViewId> {
        match self.map.lookup(&key)? {
            Lookup { id, dirty: false } => Some(id),
            Lookup { dirty: true, .. } => None,
        }
    }

    /// Reads the state of the peer structure's view for `key`.
    #[must_use]
    pub fn mirror(&self, key: SourceKey) -> Option<ViewState> {
        self.peer?.view_state(key)
    }

    /// Returns the view for `key`, creating or updating it as needed.
    ///
    /// - No entry: `create` builds the view, which is logged, updated, and
    ///   committed. Its reported validity is not questioned.
    /// - Dirty entry: the existing view is logged and updated. If it reports
    ///   [`Validity::Rejected`], the walk since this call began is rolled back,
    ///   the view is dropped, and `create` builds a replacement that is logged
    ///   and updated in its place.
    /// - Entry already confirmed in this rebuild (another path reached the
    ///   same source, or the source is an ancestor still being updated): the
    ///   existing view is returned untouched.
    ///
    /// # Panics
    ///
    /// Panics if a replacement view rejects its first update; `create` is
    /// required to produce views that are valid by construction.
    pub fn update_or_create<F>(
        &mut self,
        key: SourceKey,
        create: F,
    ) -> Result<ViewId, ReconcileError>
    where
        F: FnOnce() -> Box<V>,
    {
        self.ensure_live()?;
        match self.map.lookup(&key) {
            None => self.create(Some(key), create(), ViewChangeKind::Created),
            Some(Lookup { id, dirty: false }) => {
                self.summary.shared += 1;
                self.trace_view(Some(key), id, ViewChangeKind::Shared);
                Ok(id)
            }
            Some(Lookup { id, dirty: true }) => self.reuse(key, id, create),
        }
    }

    /// Logs, updates, and commits a view that has no source key of its own,
    /// such as a synthetic container.
    ///
    /// The entry lives until the next rebuild that does not add it again.
    pub fn add(&mut self, view: Box<V>) -> Result<ViewId, ReconcileError> {
        self.ensure_live()?;
        self.create(None, view, ViewChangeKind::Created)
    }

    /// Registers a reference to `key`, supplying the view to use if one has
    /// to be created.
    ///
    /// If `key` was already confirmed in this rebuild this is a no-op and
    /// `view` is dropped. Otherwise it behaves like
    /// [`update_or_create`](Self::update_or_create) with `view` as the
    /// result of the create function.
    ///
    /// # Panics
    ///
    /// Panics if `view` is used as a replacement and rejects its first
    /// update.
    pub fn add_ref(&mut self, key: SourceKey, view: Box<V>) -> Result<ViewId, ReconcileError> {
        self.update_or_create(key, move || view)
    }

    /// Poisons the context; every later call fails with
    /// [`ReconcileError::ContextExpired`].
    pub fn expire(&mut self) {
        self.expired = true;
    }

    /// Closes the update window, sweeping every entry the walk did not
    /// reach, and poisons the context.
    pub fn commit(&mut self) -> Result<Rebuilt, ReconcileError> {
        self.ensure_live()?;
        self.expired = true;
        let swept = self.map.end_update()?;
        for s in &swept {
            self.trace_view(s.key, s.id, ViewChangeKind::Swept);
        }
        let order = core::mem::take(&mut self.order);
        self.priors.clear();
        self.summary.generation = self.generation;
        self.summary.visited = order.len();
        self.summary.swept = swept.len();
        self.tracer.rebuild_end(&RebuildEndEvent {
            target: self.target,
            summary: self.summary,
        });
        Ok(Rebuilt {
            order,
            summary: self.summary,
        })
    }

    /// Reports `error` as the end of this rebuild and poisons the context.
    ///
    /// The map window is left open.
    pub(crate) fn abort(&mut self, error: ReconcileError) -> ReconcileError {
        self.expired = true;
        self.tracer.rebuild_fault(&RebuildFaultEvent {
            target: self.target,
            generation: self.generation,
            error,
        });
        error
    }

    // -- Internals --

    fn ensure_live(&self) -> Result<(), ReconcileError> {
        if self.expired {
            Err(ReconcileError::ContextExpired)
        } else {
            Ok(())
        }
    }

    fn log(&mut self, id: ViewId, prior: Prior) {
        self.order.push(id);
        self.priors.push(prior);
    }

    fn create(
        &mut self,
        key: Option<SourceKey>,
        view: Box<V>,
        kind: ViewChangeKind,
    ) -> Result<ViewId, ReconcileError> {
        let id = self.map.reserve(key)?;
        self.log(id, Prior::Created);
        self.summary.created += 1;
        self.trace_view(key, id, kind);
        let (view, result) = self.run_update(view);
        self.map.checkin(id, view);
        result.map(|_| id)
    }

    fn reuse<F>(&mut self, key: SourceKey, id: ViewId, create: F) -> Result<ViewId, ReconcileError>
    where
        F: FnOnce() -> Box<V>,
    {
        // Only confirmed entries are ever checked out, so a dirty one holds its view.
        let Some(view) = self.map.checkout(id) else {
            unreachable!("dirty entry {id:?} for {key:?} has no view to update");
        };
        let mark = self.order.len();
        let prior = self.map.confirm(id);
        self.log(id, Prior::Reconfirmed(prior));
        let (view, result) = self.run_update(view);
        let validity = match result {
            Ok(validity) => validity,
            Err(err) => {
                self.map.checkin(id, view);
                return Err(err);
            }
        };
        if validity.is_valid() {
            self.map.checkin(id, view);
            self.summary.reused += 1;
            self.trace_view(Some(key), id, ViewChangeKind::Reused);
            return Ok(id);
        }

        self.rollback(mark);
        drop(view);
        self.map.remove(id);
        self.summary.rejected += 1;
        self.trace_view(Some(key), id, ViewChangeKind::Rejected);

        let replacement = create();
        let new_id = self.map.reserve(Some(key))?;
        self.log(new_id, Prior::Created);
        self.summary.created += 1;
        self.trace_view(Some(key), new_id, ViewChangeKind::Replaced);
        let (replacement, result) = self.run_update(replacement);
        self.map.checkin(new_id, replacement);
        let validity = result?;
        assert!(
            validity.is_valid(),
            "replacement view for {key:?} rejected its first update"
        );
        Ok(new_id)
    }

    fn run_update(&mut self, mut view: Box<V>) -> (Box<V>, Result<Validity, ReconcileError>) {
        let value = self.value;
        let result = view.reconcile(self, value);
        (view, result)
    }

    /// Unwinds the visit log back to `mark`.
    fn rollback(&mut self, mark: usize) {
        while self.order.len() > mark {
            let (Some(id), Some(prior)) = (self.order.pop(), self.priors.pop()) else {
                break;
            };
            match prior {
                Prior::Created => {
                    self.map.remove(id);
                }
                Prior::Reconfirmed(confirmed) => self.map.restore(id, confirmed),
            }
        }
    }

    fn trace_view(&mut self, key: Option<SourceKey>, view: ViewId, kind: ViewChangeKind) {
        let change = ViewChange {
            target: self.target,
            generation: self.generation,
            key,
            view,
            kind,
        };
        #[cfg(feature = "trace-rich")]
        self.tracer.view_change(&change);
        #[cfg(not(feature = "trace-rich"))]
        {
            _ = change;
        }
    }
}
