// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identity-keyed incremental reconciliation of retained view trees.
//!
//! `canopy_core` rebuilds a retained list of derived *view* objects from a
//! mutable source graph, reusing each view while its source object is still
//! reachable and dropping it once nothing reaches it. It is `no_std`
//! compatible (with `alloc`).
//!
//! # Architecture
//!
//! ```text
//!   caller edits source graph
//!       │
//!       ▼
//!   Scene::invalidate() ──► UpdateContext::open() ──► IdentityMap::begin_update()
//!                                  │
//!                 ┌────────────────┘
//!                 ▼
//!   Root::refresh() ──► update_or_create() ──► View::update() ──┐
//!                              ▲                                │
//!                              └──────── children ──────────────┘
//!                 │
//!                 ▼
//!   UpdateContext::commit() ──► IdentityMap::end_update() (sweep)
//!                 │
//!                 ▼
//!   publish Rc<[ViewId]> ──► rebuild-completed listeners
//! ```
//!
//! **[`map`]**: [`IdentityMap`] is a generational slot store keyed by source
//! identity, with epoch-based mark-and-sweep update windows.
//!
//! **[`context`]**: [`UpdateContext`] is the per-rebuild session. Create or
//! reuse views, record pre-order visitation, roll back and rebuild a view
//! that rejects reuse, and poison itself once the rebuild is committed.
//!
//! **[`scene`]**: [`Scene`] is the externally visible structure. One rebuild
//! entry point, reentrancy detection, read access to the published list, and
//! guarded iteration that defers rebuilds.
//!
//! **[`tree`]**: [`TreeUpdater`] is the same protocol one layer up, for rows
//! that mirror the state of a scene's views.
//!
//! **[`view`]**: The capability traits collaborators implement.
//!
//! **[`config`]**: [`SceneConfig`] presets.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! rebuild instrumentation, with zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Example
//!
//! ```
//! use canopy_core::scene::{Rebuild, Scene, SceneContext, View};
//! use canopy_core::{ReconcileError, SourceKey, Validity};
//!
//! struct Label;
//!
//! impl View<()> for Label {
//!     fn update(
//!         &mut self,
//!         _: &mut SceneContext<'_, ()>,
//!         _: &(),
//!     ) -> Result<Validity, ReconcileError> {
//!         Ok(Validity::Valid)
//!     }
//! }
//!
//! struct Doc(Vec<u64>);
//!
//! impl canopy_core::Root<dyn View<()>, ()> for Doc {
//!     fn refresh(
//!         &mut self,
//!         cx: &mut SceneContext<'_, ()>,
//!         _: &(),
//!     ) -> Result<(), ReconcileError> {
//!         for &id in &self.0 {
//!             cx.update_or_create(SourceKey::new(id), || Box::new(Label))?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut scene = Scene::new(Doc(vec![1, 2]), ());
//! assert!(matches!(scene.invalidate(), Ok(Rebuild::Completed(_))));
//! let kept = scene.view_id_for(SourceKey::new(2));
//!
//! scene.root_mut().0.retain(|&id| id != 1);
//! scene.invalidate()?;
//! assert_eq!(scene.len(), 1);
//! assert_eq!(scene.view_id_for(SourceKey::new(2)), kept);
//! # Ok::<(), ReconcileError>(())
//! ```
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-view
//!   change events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod config;
pub mod context;
pub mod map;
pub mod scene;
pub mod trace;
pub mod tree;
pub mod view;

mod error;
mod id;

pub use config::SceneConfig;
pub use context::{RebuildSummary, Rebuilt, UpdateContext};
pub use error::ReconcileError;
pub use id::{SourceKey, ViewId};
pub use map::IdentityMap;
pub use scene::{Rebuild, Scene, SceneContext, View};
pub use tree::{RowContext, TreeRow, TreeUpdater};
pub use view::{Reconcile, Root, Validity, ViewSource, ViewState};
