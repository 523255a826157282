// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Auxiliary tree views built with the same create-or-reuse protocol.
//!
//! A [`TreeUpdater`] keeps its own [`IdentityMap`] of tree rows (for example
//! an outline or property panel) and rebuilds it from its own root. Rows can
//! read the state of another structure's view for the same source object
//! through [`UpdateContext::mirror`]; a [`Scene`](crate::scene::Scene) is the
//! usual peer.
//!
//! Unlike a scene, a tree updater is driven through `&mut self`, so
//! exclusive access during a rebuild is checked statically.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use crate::ReconcileError;
use crate::context::{RebuildSummary, Rebuilt, UpdateContext};
use crate::id::{SourceKey, ViewId};
use crate::map::{IdentityMap, Lookup};
use crate::trace::{RebuildBeginEvent, RebuildFaultEvent, TargetKind, Tracer};
use crate::view::{Reconcile, Root, Validity, ViewSource};

/// A row owned by a [`TreeUpdater`].
pub trait TreeRow<C>: Any {
    /// Brings the row in line with its source object, registering child rows
    /// through `cx`.
    fn update(
        &mut self,
        cx: &mut RowContext<'_, C>,
        value: &C,
    ) -> Result<Validity, ReconcileError>;
}

/// The update context handed to [`TreeRow::update`].
pub type RowContext<'a, C> = UpdateContext<'a, dyn TreeRow<C>, C>;

impl<C: 'static> Reconcile<C> for dyn TreeRow<C> {
    fn reconcile(
        &mut self,
        cx: &mut UpdateContext<'_, Self, C>,
        value: &C,
    ) -> Result<Validity, ReconcileError> {
        self.update(cx, value)
    }
}

/// A retained list of tree rows kept in sync with a source graph.
pub struct TreeUpdater<R, C> {
    root: R,
    map: IdentityMap<SourceKey, Box<dyn TreeRow<C>>>,
    rows: Vec<ViewId>,
    generation: u64,
}

impl<R, C> fmt::Debug for TreeUpdater<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeUpdater")
            .field("generation", &self.generation)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl<R, C: 'static> TreeUpdater<R, C> {
    /// Creates an empty updater.
    #[must_use]
    pub fn new(root: R) -> Self {
        Self::with_capacity(root, 0)
    }

    /// Creates an empty updater with room for `capacity` rows.
    #[must_use]
    pub fn with_capacity(root: R, capacity: usize) -> Self {
        Self {
            root,
            map: IdentityMap::with_capacity(capacity),
            rows: Vec::new(),
            generation: 0,
        }
    }

    /// Returns the rows of the last completed update, in visitation order.
    #[must_use]
    pub fn rows(&self) -> &[ViewId] {
        &self.rows
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the generation of the last completed update.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the root.
    #[must_use]
    pub fn root(&self) -> &R {
        &self.root
    }

    /// Returns the root mutably.
    #[must_use]
    pub fn root_mut(&mut self) -> &mut R {
        &mut self.root
    }

    /// Returns the row behind `id`.
    #[must_use]
    pub fn row(&self, id: ViewId) -> Option<&dyn TreeRow<C>> {
        self.map.get(id).map(|row| &**row)
    }

    /// Returns the row mapped to `key` if it is present and not dirty.
    #[must_use]
    pub fn row_for(&self, key: SourceKey) -> Option<&dyn TreeRow<C>> {
        self.row(self.row_id_for(key)?)
    }

    /// Returns the handle of the row mapped to `key` if it is present and not
    /// dirty.
    #[must_use]
    pub fn row_id_for(&self, key: SourceKey) -> Option<ViewId> {
        match self.map.lookup(&key)? {
            Lookup { id, dirty: false } => Some(id),
            Lookup { dirty: true, .. } => None,
        }
    }

    /// Returns the source key of the row behind `id`.
    #[must_use]
    pub fn key_of(&self, id: ViewId) -> Option<SourceKey> {
        self.map.key_of(id)
    }

    /// Runs `action` on every row of concrete type `T`, in row order, and
    /// returns how many rows it ran on.
    pub fn for_each_row<T: Any>(&mut self, mut action: impl FnMut(ViewId, &mut T)) -> usize {
        let mut visited = 0;
        for &id in &self.rows {
            let Some(row) = self.map.get_mut(id) else {
                continue;
            };
            let any: &mut dyn Any = &mut **row;
            if let Some(row) = any.downcast_mut::<T>() {
                action(id, row);
                visited += 1;
            }
        }
        visited
    }
}

impl<R, C: 'static> TreeUpdater<R, C>
where
    R: Root<dyn TreeRow<C>, C>,
{
    /// Rebuilds the rows from the root, mirroring state from `peer`.
    ///
    /// # Errors
    ///
    /// Any error raised by the root walk. The previous rows stay published
    /// and the row map is left open, so later updates fail with
    /// [`ReconcileError::AlreadyUpdating`].
    pub fn update(
        &mut self,
        peer: &dyn ViewSource,
        value: &C,
    ) -> Result<RebuildSummary, ReconcileError> {
        self.update_with_tracer(peer, value, &mut Tracer::none())
    }

    /// Like [`update`](Self::update), reporting to `tracer`.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub fn update_with_tracer(
        &mut self,
        peer: &dyn ViewSource,
        value: &C,
        tracer: &mut Tracer<'_>,
    ) -> Result<RebuildSummary, ReconcileError> {
        let generation = self.generation + 1;
        let mut tracer = tracer.reborrow();
        tracer.rebuild_begin(&RebuildBeginEvent {
            target: TargetKind::Tree,
            generation,
            entries: self.map.len(),
        });

        let mut cx = match UpdateContext::open(&mut self.map, value, generation) {
            Ok(cx) => cx
                .with_target(TargetKind::Tree)
                .with_peer(peer)
                .with_tracer(tracer),
            Err(error) => {
                tracer.rebuild_fault(&RebuildFaultEvent {
                    target: TargetKind::Tree,
                    generation,
                    error,
                });
                return Err(error);
            }
        };
        let committed = match self.root.refresh(&mut cx, value) {
            Ok(()) => cx.commit(),
            Err(error) => Err(error),
        };
        let Rebuilt { order, summary } = committed.map_err(|error| cx.abort(error))?;

        self.rows = order;
        self.generation = generation;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Scene, SceneContext, View};
    use crate::view::ViewState;
    use alloc::collections::BTreeMap;
    use alloc::vec;

    /// Source graph: top-level ids plus child lists.
    #[derive(Default)]
    struct Outline {
        top: Vec<u64>,
        children: BTreeMap<u64, Vec<u64>>,
    }

    struct Top;

    impl Root<dyn TreeRow<Outline>, Outline> for Top {
        fn refresh(
            &mut self,
            cx: &mut RowContext<'_, Outline>,
            outline: &Outline,
        ) -> Result<(), ReconcileError> {
            for &id in &outline.top {
                row(cx, id, 0)?;
            }
            Ok(())
        }
    }

    fn row(
        cx: &mut RowContext<'_, Outline>,
        id: u64,
        depth: usize,
    ) -> Result<ViewId, ReconcileError> {
        cx.update_or_create(SourceKey::new(id), || {
            Box::new(Row {
                id,
                depth,
                mirrored: None,
                updates: 0,
            })
        })
    }

    struct Row {
        id: u64,
        depth: usize,
        mirrored: Option<ViewState>,
        updates: u32,
    }

    impl TreeRow<Outline> for Row {
        fn update(
            &mut self,
            cx: &mut RowContext<'_, Outline>,
            outline: &Outline,
        ) -> Result<Validity, ReconcileError> {
            self.updates += 1;
            self.mirrored = cx.mirror(SourceKey::new(self.id));
            let children = outline.children.get(&self.id).cloned().unwrap_or_default();
            for child in children {
                row(cx, child, self.depth + 1)?;
            }
            Ok(Validity::Valid)
        }
    }

    /// A peer with fixed states.
    #[derive(Default)]
    struct States(BTreeMap<u64, ViewState>);

    impl ViewSource for States {
        fn view_state(&self, key: SourceKey) -> Option<ViewState> {
            self.0.get(&key.raw()).copied()
        }
    }

    fn outline(top: &[u64], children: &[(u64, &[u64])]) -> Outline {
        Outline {
            top: top.to_vec(),
            children: children.iter().map(|&(id, c)| (id, c.to_vec())).collect(),
        }
    }

    fn row_of(tree: &TreeUpdater<Top, Outline>, id: u64) -> &Row {
        let any: &dyn Any = tree.row_for(SourceKey::new(id)).unwrap();
        any.downcast_ref::<Row>().unwrap()
    }

    #[test]
    fn rows_follow_the_outline_in_preorder() {
        let mut tree = TreeUpdater::new(Top);
        let doc = outline(&[1, 4], &[(1, &[2, 3])]);
        let summary = tree.update(&States::default(), &doc).unwrap();

        let keys: Vec<_> = tree
            .rows()
            .iter()
            .map(|&id| tree.key_of(id).unwrap().raw())
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
        assert_eq!(summary.created, 4);
        assert_eq!(row_of(&tree, 3).depth, 1);
        assert_eq!(tree.generation(), 1);
    }

    #[test]
    fn rows_are_reused_and_swept() {
        let mut tree = TreeUpdater::with_capacity(Top, 8);
        let peer = States::default();
        tree.update(&peer, &outline(&[1, 2], &[(1, &[3])])).unwrap();
        let three = tree.row_id_for(SourceKey::new(3)).unwrap();
        let two = tree.row_id_for(SourceKey::new(2)).unwrap();

        let summary = tree.update(&peer, &outline(&[2], &[(2, &[3])])).unwrap();
        assert_eq!(tree.rows(), &[two, three], "3 moved under 2 keeps its row");
        assert_eq!(summary.swept, 1);
        assert!(tree.row_for(SourceKey::new(1)).is_none());
        assert_eq!(row_of(&tree, 3).updates, 2);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn rows_mirror_peer_state() {
        let mut tree = TreeUpdater::new(Top);
        let mut peer = States::default();
        peer.0.insert(
            1,
            ViewState {
                hidden: true,
                selected: false,
            },
        );
        let doc = outline(&[1, 2], &[]);
        tree.update(&peer, &doc).unwrap();
        assert_eq!(row_of(&tree, 1).mirrored.map(|s| s.hidden), Some(true));
        assert_eq!(row_of(&tree, 2).mirrored, None);
    }

    #[test]
    fn rows_mirror_a_live_scene() {
        struct Shapes(Vec<u64>);

        impl Root<dyn View<()>, ()> for Shapes {
            fn refresh(
                &mut self,
                cx: &mut SceneContext<'_, ()>,
                _: &(),
            ) -> Result<(), ReconcileError> {
                for &id in &self.0 {
                    cx.update_or_create(SourceKey::new(id), || {
                        Box::new(Shape {
                            id,
                            selected: false,
                        })
                    })?;
                }
                Ok(())
            }
        }

        struct Shape {
            id: u64,
            selected: bool,
        }

        impl View<()> for Shape {
            fn update(
                &mut self,
                _: &mut SceneContext<'_, ()>,
                _: &(),
            ) -> Result<Validity, ReconcileError> {
                Ok(Validity::Valid)
            }

            fn state(&self) -> ViewState {
                ViewState {
                    hidden: false,
                    selected: self.selected,
                }
            }
        }

        let scene = Scene::new(Shapes(vec![1, 2]), ());
        scene.invalidate().unwrap();
        let mut tree = TreeUpdater::new(Top);
        let doc = outline(&[1, 2, 3], &[]);

        tree.update(&scene, &doc).unwrap();
        assert_eq!(row_of(&tree, 2).mirrored, Some(ViewState::default()));
        assert_eq!(row_of(&tree, 3).mirrored, None, "no render view for 3");

        scene
            .for_each::<Shape>(|_, shape| shape.selected = shape.id == 2)
            .unwrap();
        let summary = tree.update(&scene, &doc).unwrap();
        assert_eq!(summary.reused, 3);
        assert_eq!(row_of(&tree, 2).mirrored.map(|s| s.selected), Some(true));
        assert_eq!(row_of(&tree, 1).mirrored.map(|s| s.selected), Some(false));
    }

    #[test]
    fn for_each_row_visits_every_row() {
        let mut tree = TreeUpdater::new(Top);
        tree.update(&States::default(), &outline(&[1, 2], &[(2, &[5])]))
            .unwrap();
        let mut depths = Vec::new();
        let visited = tree.for_each_row::<Row>(|_, row| {
            row.updates = 0;
            depths.push(row.depth);
        });
        assert_eq!(visited, 3);
        assert_eq!(depths, vec![0, 0, 1]);
        assert_eq!(row_of(&tree, 5).updates, 0);
    }

    #[test]
    fn failed_update_keeps_previous_rows() {
        struct Failing;

        impl Root<dyn TreeRow<Outline>, Outline> for Failing {
            fn refresh(
                &mut self,
                cx: &mut RowContext<'_, Outline>,
                outline: &Outline,
            ) -> Result<(), ReconcileError> {
                for &id in &outline.top {
                    row(cx, id, 0)?;
                }
                if outline.top.is_empty() {
                    return Err(ReconcileError::ContextExpired);
                }
                Ok(())
            }
        }

        let mut tree = TreeUpdater::new(Failing);
        let peer = States::default();
        tree.update(&peer, &outline(&[1], &[])).unwrap();
        let before = tree.rows().to_vec();

        assert_eq!(
            tree.update(&peer, &outline(&[], &[])),
            Err(ReconcileError::ContextExpired)
        );
        assert_eq!(tree.rows(), before.as_slice());
        assert_eq!(tree.generation(), 1);
        assert_eq!(
            tree.update(&peer, &outline(&[1], &[])),
            Err(ReconcileError::AlreadyUpdating)
        );
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tree_events_are_tagged() {
        use crate::trace::{RebuildEndEvent, TraceSink};

        #[derive(Default)]
        struct Targets(Vec<TargetKind>);
        impl TraceSink for Targets {
            fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
                self.0.push(e.target);
            }
            fn on_rebuild_end(&mut self, e: &RebuildEndEvent) {
                self.0.push(e.target);
            }
        }

        let mut sink = Targets::default();
        let mut tracer = Tracer::new(&mut sink);
        let mut tree = TreeUpdater::new(Top);
        let doc = outline(&[1], &[]);
        tree.update_with_tracer(&States::default(), &doc, &mut tracer)
            .unwrap();
        tree.update_with_tracer(&States::default(), &doc, &mut tracer)
            .unwrap();
        drop(tracer);
        assert_eq!(sink.0, vec![TargetKind::Tree; 4]);
    }
}
