// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The externally visible retained structure.
//!
//! A [`Scene`] owns a root, a context value, an [`IdentityMap`] of render
//! views, and the ordered view list published by the last completed rebuild.
//!
//! ```text
//!   caller mutates source graph
//!       │
//!       ▼
//!   Scene::invalidate() ── guards active? ──► pending (Rebuild::Deferred)
//!       │
//!       ▼  (map borrowed mutably for the whole body)
//!   begin_update ──► Root::refresh ──► View::update (recursive)
//!       │
//!       ▼
//!   end_update (sweep) ──► publish Rc<[ViewId]> ──► rebuild-completed listeners
//! ```
//!
//! # State machine
//!
//! A scene is `Idle`, `Rebuilding`, or notifying listeners. Calling
//! [`invalidate`](Scene::invalidate) while rebuilding is a contract fault
//! ([`ReconcileError::ReentrantRebuild`]). Calling it while a
//! [`for_each`](Scene::for_each) guard is active, or from a listener, defers
//! the rebuild until the guard is released or the listeners return.
//!
//! # Readers during a rebuild
//!
//! Every reader goes through a shared borrow of the map. While a rebuild
//! holds the map, lookups report "not found" rather than exposing a
//! half-updated view.
//!
//! # Faults
//!
//! If the root walk fails, the error is returned, the previously published
//! list stays visible, and the map is left with its update window open. Any
//! later rebuild on the same scene then fails with
//! [`ReconcileError::AlreadyUpdating`].

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::{Cell, Ref, RefCell};
use core::fmt;

use crate::ReconcileError;
use crate::config::SceneConfig;
use crate::context::{RebuildSummary, Rebuilt, UpdateContext};
use crate::id::{SourceKey, ViewId};
use crate::map::{IdentityMap, Lookup};
use crate::trace::{
    RebuildBeginEvent, RebuildDeferredEvent, RebuildFaultEvent, TargetKind, TraceSink, Tracer,
};
use crate::view::{Reconcile, Root, Validity, ViewSource, ViewState};

/// A render view owned by a [`Scene`].
///
/// `C` is the context value threaded through every update of one rebuild.
pub trait View<C>: Any {
    /// Brings the view in line with its source object.
    ///
    /// The view registers its children through `cx` before returning. A
    /// freshly created view must report [`Validity::Valid`]; a reused view
    /// reports [`Validity::Rejected`] when its source changed shape and the
    /// view must be rebuilt from scratch.
    fn update(
        &mut self,
        cx: &mut SceneContext<'_, C>,
        value: &C,
    ) -> Result<Validity, ReconcileError>;

    /// Returns the visibility and selection state mirrored by tree rows.
    fn state(&self) -> ViewState {
        ViewState::default()
    }
}

/// The update context handed to [`View::update`].
pub type SceneContext<'a, C> = UpdateContext<'a, dyn View<C>, C>;

impl<C: 'static> Reconcile<C> for dyn View<C> {
    fn reconcile(
        &mut self,
        cx: &mut UpdateContext<'_, Self, C>,
        value: &C,
    ) -> Result<Validity, ReconcileError> {
        self.update(cx, value)
    }
}

/// Outcome of [`Scene::invalidate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuild {
    /// The rebuild ran and its order is published.
    Completed(RebuildSummary),
    /// A guard or listener is active; the rebuild will run when it returns.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Rebuilding,
    Notifying,
}

type Listener<R, C> = Box<dyn FnMut(&Scene<R, C>, &RebuildSummary)>;

/// A retained list of render views kept in sync with a source graph.
pub struct Scene<R, C> {
    config: SceneConfig,
    root: RefCell<R>,
    value: C,
    map: RefCell<IdentityMap<SourceKey, Box<dyn View<C>>>>,
    ordered: RefCell<Rc<[ViewId]>>,
    phase: Cell<Phase>,
    guards: Cell<u32>,
    pending: Cell<bool>,
    generation: Cell<u64>,
    listeners: RefCell<Vec<Listener<R, C>>>,
    sink: RefCell<Option<Box<dyn TraceSink>>>,
}

impl<R, C: 'static> fmt::Debug for Scene<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("config", &self.config)
            .field("phase", &self.phase.get())
            .field("generation", &self.generation.get())
            .field("len", &self.len())
            .field("guards", &self.guards.get())
            .field("pending", &self.pending.get())
            .finish_non_exhaustive()
    }
}

impl<R, C: 'static> Scene<R, C> {
    /// Creates an empty scene with the default configuration.
    ///
    /// Nothing is built until the first [`invalidate`](Self::invalidate).
    #[must_use]
    pub fn new(root: R, value: C) -> Self {
        Self::with_config(root, value, SceneConfig::default())
    }

    /// Creates an empty scene with the given configuration.
    #[must_use]
    pub fn with_config(root: R, value: C, config: SceneConfig) -> Self {
        Self {
            config,
            root: RefCell::new(root),
            value,
            map: RefCell::new(IdentityMap::with_capacity(config.initial_capacity)),
            ordered: RefCell::new(Rc::from(Vec::new())),
            phase: Cell::new(Phase::Idle),
            guards: Cell::new(0),
            pending: Cell::new(false),
            generation: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
            sink: RefCell::new(None),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Returns the ordered view list of the last completed rebuild.
    ///
    /// The list is replaced, never mutated; a clone taken before a rebuild
    /// keeps describing the old state.
    #[must_use]
    pub fn ordered(&self) -> Rc<[ViewId]> {
        Rc::clone(&self.ordered.borrow())
    }

    /// Returns the number of published views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.borrow().len()
    }

    /// Returns `true` if the published list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the generation of the last completed rebuild (0 before the
    /// first).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Returns whether a rebuild is in progress.
    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.phase.get() == Phase::Rebuilding
    }

    /// Returns whether a deferred rebuild is waiting for guards to be
    /// released.
    #[must_use]
    pub fn has_pending_rebuild(&self) -> bool {
        self.pending.get()
    }

    /// Returns the number of entries in the identity map, or `None` during a
    /// rebuild.
    #[must_use]
    pub fn mapped_count(&self) -> Option<usize> {
        self.map.try_borrow().ok().map(|map| map.len())
    }

    /// Returns the context value.
    #[must_use]
    pub fn value(&self) -> &C {
        &self.value
    }

    /// Returns the context value mutably.
    #[must_use]
    pub fn value_mut(&mut self) -> &mut C {
        &mut self.value
    }

    /// Returns the root, or `None` during a rebuild.
    #[must_use]
    pub fn root(&self) -> Option<Ref<'_, R>> {
        self.root.try_borrow().ok()
    }

    /// Returns the root mutably, for editing the source graph between
    /// rebuilds.
    #[must_use]
    pub fn root_mut(&mut self) -> &mut R {
        self.root.get_mut()
    }

    /// Returns the view behind `id`.
    ///
    /// Returns `None` for stale handles, during a rebuild, and for the view
    /// a [`for_each`](Self::for_each) action is currently visiting.
    ///
    /// While the returned reference is alive, [`invalidate`](Self::invalidate)
    /// and [`for_each`](Self::for_each) fail with
    /// [`ReconcileError::BorrowHeld`].
    #[must_use]
    pub fn view(&self, id: ViewId) -> Option<Ref<'_, dyn View<C>>> {
        let map = self.map.try_borrow().ok()?;
        Ref::filter_map(map, |map| map.get(id).map(|view| &**view)).ok()
    }

    /// Returns the view mapped to `key` if it is present and not dirty.
    ///
    /// A dirty entry belongs to a rebuild that has not reached it yet and is
    /// reported as not found.
    #[must_use]
    pub fn try_get_view_for(&self, key: SourceKey) -> Option<Ref<'_, dyn View<C>>> {
        let map = self.map.try_borrow().ok()?;
        let Lookup { id, dirty: false } = map.lookup(&key)? else {
            return None;
        };
        Ref::filter_map(map, |map| map.get(id).map(|view| &**view)).ok()
    }

    /// Returns the handle of the view mapped to `key` if it is present and
    /// not dirty.
    #[must_use]
    pub fn view_id_for(&self, key: SourceKey) -> Option<ViewId> {
        let map = self.map.try_borrow().ok()?;
        match map.lookup(&key)? {
            Lookup { id, dirty: false } => Some(id),
            Lookup { dirty: true, .. } => None,
        }
    }

    /// Returns the source key of the view behind `id`.
    #[must_use]
    pub fn key_of(&self, id: ViewId) -> Option<SourceKey> {
        self.map.try_borrow().ok()?.key_of(id)
    }

    /// Registers a rebuild-completed listener.
    ///
    /// Listeners run after the new order is published, outside the
    /// rebuild. A listener may call [`invalidate`](Self::invalidate); the
    /// request is chained after the current notification round, up to
    /// [`SceneConfig::max_chained_rebuilds`] times.
    pub fn on_rebuilt(&self, listener: impl FnMut(&Self, &RebuildSummary) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Installs a trace sink, replacing any previous one.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        *self.sink.get_mut() = Some(sink);
    }

    /// Removes and returns the trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.sink.get_mut().take()
    }

    fn emit(&self, f: impl FnOnce(&mut Tracer<'_>)) {
        // The sink is held by the rebuild itself; nested events are dropped.
        let Ok(mut sink) = self.sink.try_borrow_mut() else {
            return;
        };
        if let Some(sink) = sink.as_mut() {
            f(&mut Tracer::new(&mut **sink));
        }
    }

    fn fault(&self, generation: u64, error: ReconcileError) -> ReconcileError {
        self.emit(|tracer| {
            tracer.rebuild_fault(&RebuildFaultEvent {
                target: TargetKind::Scene,
                generation,
                error,
            });
        });
        error
    }

    fn notify(&self, summary: &RebuildSummary) {
        self.phase.set(Phase::Notifying);
        let mut listeners = core::mem::take(&mut *self.listeners.borrow_mut());
        for listener in &mut listeners {
            listener(self, summary);
        }
        let mut added = core::mem::replace(&mut *self.listeners.borrow_mut(), listeners);
        self.listeners.borrow_mut().append(&mut added);
        self.phase.set(Phase::Idle);
    }
}

impl<R, C: 'static> Scene<R, C>
where
    R: Root<dyn View<C>, C>,
{
    /// Rebuilds the scene from its root.
    ///
    /// Returns [`Rebuild::Deferred`] if a [`for_each`](Self::for_each) guard
    /// or a rebuild-completed listener is active; the rebuild then runs when
    /// the outermost guard is released or the listeners return.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::ReentrantRebuild`] if called from inside this
    ///   scene's rebuild. The published list is unchanged.
    /// - [`ReconcileError::BorrowHeld`] if a reference returned by a reader
    ///   such as [`view`](Self::view) or [`root`](Self::root) is alive. Nothing
    ///   is rebuilt and the scene stays usable.
    /// - [`ReconcileError::RebuildLoop`] if listeners keep requesting
    ///   rebuilds past the configured limit.
    /// - Any error raised by the root walk, including
    ///   [`ReconcileError::AlreadyUpdating`] after an earlier fault left the
    ///   map open.
    pub fn invalidate(&self) -> Result<Rebuild, ReconcileError> {
        let generation = self.generation.get();
        match self.phase.get() {
            Phase::Rebuilding => {
                return Err(self.fault(generation + 1, ReconcileError::ReentrantRebuild));
            }
            Phase::Notifying => {
                self.defer();
                return Ok(Rebuild::Deferred);
            }
            Phase::Idle => {}
        }
        if self.guards.get() > 0 {
            self.defer();
            return Ok(Rebuild::Deferred);
        }
        self.run()
    }

    /// Runs `action` on every published view of concrete type `T`, in
    /// published order, and returns how many views it ran on.
    ///
    /// Rebuild requests made while the iteration is active are deferred and
    /// run once the outermost iteration finishes. Iterations may nest; the
    /// view an outer action is visiting is skipped by inner iterations.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::ReentrantIteration`] if called from inside a
    ///   rebuild.
    /// - [`ReconcileError::BorrowHeld`] if a reference returned by
    ///   [`view`](Self::view) or [`try_get_view_for`](Self::try_get_view_for)
    ///   is alive when a view has to be checked out. Views visited before
    ///   that point keep the changes `action` made to them.
    /// - Any error from the deferred rebuild run on release.
    ///
    /// # Panics
    ///
    /// Panics if `action` stores such a reference somewhere that outlives
    /// its call, since the visited view can then not be put back.
    pub fn for_each<T: Any>(
        &self,
        mut action: impl FnMut(ViewId, &mut T),
    ) -> Result<usize, ReconcileError> {
        if self.phase.get() == Phase::Rebuilding {
            return Err(ReconcileError::ReentrantIteration);
        }
        let snapshot = self.ordered();
        self.guards.set(self.guards.get() + 1);

        let mut visited = 0;
        let mut held = None;
        for &id in snapshot.iter() {
            let Ok(mut map) = self.map.try_borrow_mut() else {
                held = Some(ReconcileError::BorrowHeld);
                break;
            };
            let Some(mut view) = map.checkout(id) else {
                continue;
            };
            drop(map);
            let any: &mut dyn Any = &mut *view;
            if let Some(target) = any.downcast_mut::<T>() {
                action(id, target);
                visited += 1;
            }
            self.map.borrow_mut().checkin(id, view);
        }

        let guards = self.guards.get() - 1;
        self.guards.set(guards);
        if let Some(error) = held {
            return Err(error);
        }
        if guards == 0 && self.pending.get() && self.phase.get() == Phase::Idle {
            self.run()?;
        }
        Ok(visited)
    }

    fn defer(&self) {
        self.pending.set(true);
        let generation = self.generation.get();
        let guards = self.guards.get();
        self.emit(|tracer| {
            tracer.rebuild_deferred(&RebuildDeferredEvent {
                target: TargetKind::Scene,
                generation,
                guards,
            });
        });
    }

    /// Rebuilds, then keeps rebuilding while listeners ask for more.
    fn run(&self) -> Result<Rebuild, ReconcileError> {
        let limit = self.config.max_chained_rebuilds;
        let mut chained = 0;
        loop {
            self.pending.set(false);
            let summary = self.rebuild()?;
            self.notify(&summary);
            if !self.pending.get() {
                return Ok(Rebuild::Completed(summary));
            }
            if chained == limit {
                self.pending.set(false);
                let generation = self.generation.get() + 1;
                return Err(self.fault(generation, ReconcileError::RebuildLoop { limit }));
            }
            chained += 1;
        }
    }

    fn rebuild(&self) -> Result<RebuildSummary, ReconcileError> {
        let generation = self.generation.get() + 1;
        self.phase.set(Phase::Rebuilding);
        let result = self.walk(generation);
        self.phase.set(Phase::Idle);
        match result {
            Ok(summary) => {
                self.generation.set(generation);
                Ok(summary)
            }
            Err(error) => Err(self.fault(generation, error)),
        }
    }

    /// The critical section: the map stays borrowed from window open to
    /// publish.
    fn walk(&self, generation: u64) -> Result<RebuildSummary, ReconcileError> {
        let mut map = self
            .map
            .try_borrow_mut()
            .map_err(|_| ReconcileError::BorrowHeld)?;
        let mut root = self
            .root
            .try_borrow_mut()
            .map_err(|_| ReconcileError::BorrowHeld)?;
        let mut sink = self.sink.borrow_mut();
        let mut tracer = match sink.as_mut() {
            Some(sink) => Tracer::new(&mut **sink),
            None => Tracer::none(),
        };

        tracer.rebuild_begin(&RebuildBeginEvent {
            target: TargetKind::Scene,
            generation,
            entries: map.len(),
        });
        let mut cx = UpdateContext::open(&mut *map, &self.value, generation)?.with_tracer(tracer);
        root.refresh(&mut cx, &self.value)?;
        let Rebuilt { order, summary } = cx.commit()?;

        *self.ordered.borrow_mut() = Rc::from(order);
        Ok(summary)
    }
}

impl<R, C: 'static> ViewSource for Scene<R, C> {
    fn view_state(&self, key: SourceKey) -> Option<ViewState> {
        self.try_get_view_for(key).map(|view| view.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Weak;
    use alloc::vec;

    type TestScene = Scene<Items, Probe>;

    const REENTRANT: u64 = 999;

    /// Context value: counters and switches the test views read.
    #[derive(Default)]
    struct Probe {
        updates: Cell<u32>,
        reject: RefCell<Vec<u64>>,
        scene: RefCell<Weak<TestScene>>,
        propagate: Cell<bool>,
        reentry: Cell<Option<ReconcileError>>,
        iteration: Cell<Option<ReconcileError>>,
        seen_during_rebuild: Cell<Option<bool>>,
    }

    #[derive(Default)]
    struct Items {
        ids: Vec<u64>,
        grouped: bool,
        reentrant: bool,
    }

    impl Root<dyn View<Probe>, Probe> for Items {
        fn refresh(
            &mut self,
            cx: &mut SceneContext<'_, Probe>,
            _: &Probe,
        ) -> Result<(), ReconcileError> {
            if self.reentrant {
                cx.update_or_create(SourceKey::new(REENTRANT), || Box::new(Reentrant))?;
            }
            if self.grouped {
                cx.add(Box::new(Group {
                    ids: self.ids.clone(),
                }))?;
            } else {
                for &id in &self.ids {
                    leaf(cx, id)?;
                }
            }
            Ok(())
        }
    }

    fn leaf(cx: &mut SceneContext<'_, Probe>, id: u64) -> Result<ViewId, ReconcileError> {
        cx.update_or_create(SourceKey::new(id), || {
            Box::new(Leaf {
                id,
                fresh: true,
                selected: false,
            })
        })
    }

    struct Leaf {
        id: u64,
        fresh: bool,
        selected: bool,
    }

    impl View<Probe> for Leaf {
        fn update(
            &mut self,
            _: &mut SceneContext<'_, Probe>,
            probe: &Probe,
        ) -> Result<Validity, ReconcileError> {
            probe.updates.set(probe.updates.get() + 1);
            let fresh = core::mem::replace(&mut self.fresh, false);
            Ok(Validity::from(fresh || !probe.reject.borrow().contains(&self.id)))
        }

        fn state(&self) -> ViewState {
            ViewState {
                hidden: false,
                selected: self.selected,
            }
        }
    }

    struct Group {
        ids: Vec<u64>,
    }

    impl View<Probe> for Group {
        fn update(
            &mut self,
            cx: &mut SceneContext<'_, Probe>,
            _: &Probe,
        ) -> Result<Validity, ReconcileError> {
            for &id in &self.ids {
                leaf(cx, id)?;
            }
            Ok(Validity::Valid)
        }
    }

    /// Calls back into its own scene while being updated.
    struct Reentrant;

    impl View<Probe> for Reentrant {
        fn update(
            &mut self,
            _: &mut SceneContext<'_, Probe>,
            probe: &Probe,
        ) -> Result<Validity, ReconcileError> {
            let scene = probe.scene.borrow().upgrade();
            let Some(scene) = scene else {
                return Ok(Validity::Valid);
            };
            probe.seen_during_rebuild.set(Some(
                scene.try_get_view_for(SourceKey::new(1)).is_some()
                    || scene.mapped_count().is_some()
                    || scene.root().is_some(),
            ));
            probe.iteration.set(scene.for_each::<Leaf>(|_, _| {}).err());
            if let Err(err) = scene.invalidate() {
                probe.reentry.set(Some(err));
                if probe.propagate.get() {
                    return Err(err);
                }
            }
            Ok(Validity::Valid)
        }
    }

    fn scene(ids: &[u64]) -> TestScene {
        Scene::new(
            Items {
                ids: ids.to_vec(),
                ..Items::default()
            },
            Probe::default(),
        )
    }

    fn completed(result: Result<Rebuild, ReconcileError>) -> RebuildSummary {
        match result {
            Ok(Rebuild::Completed(summary)) => summary,
            other => panic!("expected a completed rebuild, got {other:?}"),
        }
    }

    fn keys(scene: &TestScene) -> Vec<u64> {
        scene
            .ordered()
            .iter()
            .map(|&id| scene.key_of(id).map_or(0, SourceKey::raw))
            .collect()
    }

    #[test]
    fn empty_root_publishes_empty_list() {
        let scene = scene(&[]);
        let summary = completed(scene.invalidate());
        assert!(scene.is_empty());
        assert_eq!(scene.mapped_count(), Some(0));
        assert_eq!(summary.generation, 1);
        assert_eq!(scene.generation(), 1);
    }

    #[test]
    fn removed_child_is_swept_and_sibling_kept() {
        let mut scene = scene(&[1, 2]);
        completed(scene.invalidate());
        let before = scene.ordered();
        assert_eq!(keys(&scene), vec![1, 2]);

        scene.root_mut().ids.retain(|&id| id != 1);
        let summary = completed(scene.invalidate());

        assert_eq!(&*scene.ordered(), &[before[1]], "same instance for B");
        assert_eq!(summary.swept, 1);
        assert_eq!(scene.mapped_count(), Some(1));
        assert!(scene.view(before[0]).is_none());
        assert!(scene.try_get_view_for(SourceKey::new(1)).is_none());
        assert_eq!(before.len(), 2, "old snapshot is untouched");
    }

    #[test]
    fn rejected_child_is_replaced_and_siblings_kept() {
        let scene = scene(&[1, 2, 3]);
        completed(scene.invalidate());
        let before = scene.ordered();

        scene.value().reject.borrow_mut().push(2);
        let summary = completed(scene.invalidate());
        let after = scene.ordered();

        assert_eq!(after.len(), 3);
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1], before[1], "new instance for the rejected key");
        assert_eq!(after[2], before[2]);
        assert_eq!(summary.rejected, 1);
        assert_eq!(scene.view_id_for(SourceKey::new(2)), Some(after[1]));
    }

    #[test]
    fn one_view_per_key_across_rebuilds() {
        let mut scene = scene(&[]);
        let rounds: [&[u64]; 5] = [&[1, 2, 3], &[3, 4], &[4, 4, 1], &[], &[2, 1, 2, 5]];
        for ids in rounds {
            scene.root_mut().ids = ids.to_vec();
            completed(scene.invalidate());

            let mut distinct = ids.to_vec();
            distinct.sort_unstable();
            distinct.dedup();
            assert_eq!(scene.mapped_count(), Some(distinct.len()));
            assert_eq!(scene.len(), distinct.len());
            for id in distinct {
                assert!(scene.view_id_for(SourceKey::new(id)).is_some());
            }
        }
    }

    #[test]
    fn reuse_returns_identical_instances() {
        let scene = scene(&[1, 2]);
        completed(scene.invalidate());
        let first = scene.ordered();
        let summary = completed(scene.invalidate());
        assert_eq!(first, scene.ordered());
        assert_eq!(summary.reused, 2);
        assert_eq!(summary.created, 0);
    }

    #[test]
    fn diamond_reference_updates_once() {
        let scene = scene(&[1, 2, 1]);
        completed(scene.invalidate());
        scene.value().updates.set(0);

        let summary = completed(scene.invalidate());
        assert_eq!(scene.value().updates.get(), 2);
        assert_eq!(summary.shared, 1);
        assert_eq!(keys(&scene), vec![1, 2]);
    }

    #[test]
    fn grouped_children_follow_their_container() {
        let scene = Scene::new(
            Items {
                ids: vec![1, 2],
                grouped: true,
                reentrant: false,
            },
            Probe::default(),
        );
        completed(scene.invalidate());
        let first = scene.ordered();
        let summary = completed(scene.invalidate());
        let second = scene.ordered();

        assert_eq!(keys(&scene), vec![0, 1, 2], "container is unkeyed");
        assert_ne!(first[0], second[0], "containers are rebuilt each time");
        assert_eq!(first[1..], second[1..]);
        assert_eq!(summary.swept, 1);
    }

    #[test]
    fn reentrant_calls_are_rejected_during_rebuild() {
        let scene = Rc::new(Scene::new(
            Items {
                ids: vec![1],
                grouped: false,
                reentrant: true,
            },
            Probe::default(),
        ));
        *scene.value().scene.borrow_mut() = Rc::downgrade(&scene);

        completed(scene.invalidate());
        let probe = scene.value();
        assert_eq!(probe.reentry.get(), Some(ReconcileError::ReentrantRebuild));
        assert_eq!(probe.iteration.get(), Some(ReconcileError::ReentrantIteration));
        assert_eq!(probe.seen_during_rebuild.get(), Some(false));
        assert_eq!(scene.len(), 2);
        assert!(!scene.is_rebuilding());
    }

    #[test]
    fn faulted_rebuild_keeps_previous_list() {
        let scene = Rc::new(Scene::new(
            Items {
                ids: vec![1, 2],
                grouped: false,
                reentrant: true,
            },
            Probe::default(),
        ));
        completed(scene.invalidate());
        let before = scene.ordered();

        *scene.value().scene.borrow_mut() = Rc::downgrade(&scene);
        scene.value().propagate.set(true);
        assert_eq!(scene.invalidate(), Err(ReconcileError::ReentrantRebuild));

        assert_eq!(scene.ordered(), before);
        assert_eq!(scene.generation(), 1);
        assert!(!scene.is_rebuilding());
        assert!(
            scene.try_get_view_for(SourceKey::new(1)).is_none(),
            "entries of the failed rebuild read as dirty"
        );
        assert_eq!(scene.invalidate(), Err(ReconcileError::AlreadyUpdating));
    }

    #[test]
    fn held_reader_blocks_rebuild_without_faulting_the_scene() {
        let scene = scene(&[1, 2]);
        completed(scene.invalidate());
        let id = scene.ordered()[0];

        let held = scene.view(id);
        assert!(held.is_some());
        assert_eq!(scene.invalidate(), Err(ReconcileError::BorrowHeld));
        assert!(!scene.is_rebuilding());
        assert_eq!(scene.generation(), 1);
        drop(held);

        let root = scene.root();
        assert_eq!(root.as_ref().map(|root| root.ids.len()), Some(2));
        assert_eq!(scene.invalidate(), Err(ReconcileError::BorrowHeld));
        drop(root);

        let summary = completed(scene.invalidate());
        assert_eq!(summary.generation, 2);
        assert_eq!(summary.reused, 2);
    }

    #[test]
    fn held_reader_blocks_iteration() {
        let scene = scene(&[1, 2]);
        completed(scene.invalidate());

        let held = scene.try_get_view_for(SourceKey::new(1));
        assert!(held.is_some());
        assert_eq!(
            scene.for_each::<Leaf>(|_, _| {}),
            Err(ReconcileError::BorrowHeld)
        );
        drop(held);

        assert_eq!(scene.for_each::<Leaf>(|_, _| {}), Ok(2));
        assert!(scene.view_id_for(SourceKey::new(1)).is_some(), "views were put back");
    }

    #[test]
    fn for_each_filters_by_type() {
        let scene = Scene::new(
            Items {
                ids: vec![1, 2, 3],
                grouped: true,
                reentrant: false,
            },
            Probe::default(),
        );
        completed(scene.invalidate());

        let mut seen = Vec::new();
        let leaves = scene
            .for_each::<Leaf>(|id, leaf| {
                leaf.selected = leaf.id != 2;
                seen.push(id);
            })
            .unwrap();
        assert_eq!(leaves, 3);
        assert_eq!(seen, scene.ordered()[1..]);
        assert_eq!(scene.for_each::<Group>(|_, _| {}), Ok(1));

        assert_eq!(
            scene.view_state(SourceKey::new(1)),
            Some(ViewState {
                hidden: false,
                selected: true
            })
        );
        assert_eq!(scene.view_state(SourceKey::new(2)), Some(ViewState::default()));
        assert_eq!(scene.view_state(SourceKey::new(4)), None);
    }

    #[test]
    fn rebuild_requested_during_iteration_is_deferred() {
        let scene = scene(&[1, 2]);
        completed(scene.invalidate());

        let mut requests = Vec::new();
        let visited = scene
            .for_each::<Leaf>(|_, _| {
                requests.push(scene.invalidate());
                assert!(scene.has_pending_rebuild());
            })
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(requests, vec![Ok(Rebuild::Deferred), Ok(Rebuild::Deferred)]);
        assert!(!scene.has_pending_rebuild());
        assert_eq!(scene.generation(), 2, "one rebuild after the guard drops");
    }

    #[test]
    fn nested_iteration_skips_the_visited_view() {
        let scene = scene(&[1, 2, 3]);
        completed(scene.invalidate());

        let mut inner = Vec::new();
        scene
            .for_each::<Leaf>(|id, _| {
                assert!(scene.view(id).is_none(), "checked out while visited");
                inner.push(scene.for_each::<Leaf>(|_, _| {}).unwrap());
            })
            .unwrap();
        assert_eq!(inner, vec![2, 2, 2]);
    }

    #[test]
    fn listeners_see_the_published_list() {
        let scene = scene(&[1, 2]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        scene.on_rebuilt(move |scene, summary| {
            log.borrow_mut().push((summary.generation, scene.len(), scene.is_rebuilding()));
        });

        completed(scene.invalidate());
        completed(scene.invalidate());
        assert_eq!(*seen.borrow(), vec![(1, 2, false), (2, 2, false)]);
    }

    #[test]
    fn listener_can_chain_one_rebuild() {
        let scene = scene(&[1]);
        let fired = Rc::new(Cell::new(0_u32));
        let count = Rc::clone(&fired);
        scene.on_rebuilt(move |scene, _| {
            count.set(count.get() + 1);
            if count.get() == 1 {
                assert_eq!(scene.invalidate(), Ok(Rebuild::Deferred));
            }
        });

        let summary = completed(scene.invalidate());
        assert_eq!(summary.generation, 2);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn runaway_listener_hits_chain_limit() {
        let scene = Scene::with_config(
            Items {
                ids: vec![1],
                ..Items::default()
            },
            Probe::default(),
            SceneConfig::new().with_max_chained_rebuilds(2),
        );
        let fired = Rc::new(Cell::new(0_u32));
        let count = Rc::clone(&fired);
        scene.on_rebuilt(move |scene, _| {
            count.set(count.get() + 1);
            assert_eq!(scene.invalidate(), Ok(Rebuild::Deferred));
        });

        assert_eq!(scene.invalidate(), Err(ReconcileError::RebuildLoop { limit: 2 }));
        assert_eq!(fired.get(), 3);
        assert_eq!(scene.generation(), 3);
        assert!(!scene.has_pending_rebuild());
    }

    #[test]
    fn listener_registered_during_notification_is_kept() {
        let scene = scene(&[]);
        let fired = Rc::new(Cell::new(0_u32));
        let count = Rc::clone(&fired);
        let registered = Cell::new(false);
        scene.on_rebuilt(move |scene, _| {
            if !registered.replace(true) {
                let count = Rc::clone(&count);
                scene.on_rebuilt(move |_, _| count.set(count.get() + 1));
            }
        });

        completed(scene.invalidate());
        assert_eq!(fired.get(), 0);
        completed(scene.invalidate());
        assert_eq!(fired.get(), 1);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn rebuilds_are_traced() {
        #[derive(Default)]
        struct Recording {
            begins: Vec<u64>,
            ends: Vec<RebuildSummary>,
            deferred: u32,
            faults: Vec<ReconcileError>,
        }
        impl TraceSink for Recording {
            fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
                self.begins.push(e.generation);
            }
            fn on_rebuild_end(&mut self, e: &crate::trace::RebuildEndEvent) {
                self.ends.push(e.summary);
            }
            fn on_rebuild_deferred(&mut self, _: &RebuildDeferredEvent) {
                self.deferred += 1;
            }
            fn on_rebuild_fault(&mut self, e: &RebuildFaultEvent) {
                self.faults.push(e.error);
            }
        }

        let recording = Rc::new(RefCell::new(Recording::default()));
        let mut scene = scene(&[1, 2]);
        scene.set_trace_sink(Box::new(Rc::clone(&recording)));

        completed(scene.invalidate());
        scene
            .for_each::<Leaf>(|_, _| {
                _ = scene.invalidate();
            })
            .unwrap();

        {
            let recording = recording.borrow();
            assert_eq!(recording.begins, vec![1, 2]);
            assert_eq!(recording.ends.len(), 2);
            assert_eq!(recording.ends[1].reused, 2);
            assert_eq!(recording.deferred, 2);
            assert!(recording.faults.is_empty());
        }
        assert!(scene.take_trace_sink().is_some());
    }
}
