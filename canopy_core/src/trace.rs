// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for rebuilds.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! [`Scene`](crate::scene::Scene), the [`TreeUpdater`](crate::tree::TreeUpdater)
//! and the [`UpdateContext`](crate::context::UpdateContext) call at each stage
//! of a rebuild. All method bodies default to no-ops, so implementing only the
//! events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates the per-view [`ViewChange`] events
//!   and the corresponding `TraceSink` method.

use alloc::rc::Rc;
use core::cell::RefCell;

use crate::ReconcileError;
use crate::context::RebuildSummary;
use crate::id::{SourceKey, ViewId};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which structure an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A [`Scene`](crate::scene::Scene) of render views.
    Scene,
    /// A [`TreeUpdater`](crate::tree::TreeUpdater) of tree rows.
    Tree,
}

/// What happened to a single view during a rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewChangeKind {
    /// A view was created for a key with no entry.
    Created,
    /// A dirty view was updated in place and kept.
    Reused,
    /// A view already confirmed in this rebuild was reached again.
    Shared,
    /// A reused view reported that it cannot be patched.
    Rejected,
    /// A replacement was built for a rejected view.
    Replaced,
    /// A view was dropped because nothing reached it.
    Swept,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a rebuild opens its update window.
#[derive(Clone, Copy, Debug)]
pub struct RebuildBeginEvent {
    /// Which structure is rebuilding.
    pub target: TargetKind,
    /// Generation the rebuild will publish if it completes.
    pub generation: u64,
    /// Number of entries in the identity map before the walk.
    pub entries: usize,
}

/// Emitted after a rebuild swept stale entries and published its order.
#[derive(Clone, Copy, Debug)]
pub struct RebuildEndEvent {
    /// Which structure rebuilt.
    pub target: TargetKind,
    /// Counters for the completed rebuild.
    pub summary: RebuildSummary,
}

/// Emitted when a rebuild request is postponed by guarded iteration.
#[derive(Clone, Copy, Debug)]
pub struct RebuildDeferredEvent {
    /// Which structure deferred.
    pub target: TargetKind,
    /// Generation of the last published rebuild.
    pub generation: u64,
    /// Number of active iteration guards.
    pub guards: u32,
}

/// Emitted when a rebuild request fails with a contract error.
#[derive(Clone, Copy, Debug)]
pub struct RebuildFaultEvent {
    /// Which structure faulted.
    pub target: TargetKind,
    /// Generation the failed rebuild would have published.
    pub generation: u64,
    /// The reported error.
    pub error: ReconcileError,
}

/// A per-view change record.
#[derive(Clone, Copy, Debug)]
pub struct ViewChange {
    /// Which structure the view belongs to.
    pub target: TargetKind,
    /// Generation of the rebuild in progress.
    pub generation: u64,
    /// Source key of the view, or `None` for unkeyed views.
    pub key: Option<SourceKey>,
    /// The view the change applies to.
    pub view: ViewId,
    /// What happened.
    pub kind: ViewChangeKind,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from rebuilds.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a rebuild opens its update window.
    fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
        _ = e;
    }

    /// Called when a rebuild completes.
    fn on_rebuild_end(&mut self, e: &RebuildEndEvent) {
        _ = e;
    }

    /// Called when a rebuild is deferred.
    fn on_rebuild_deferred(&mut self, e: &RebuildDeferredEvent) {
        _ = e;
    }

    /// Called when a rebuild fails.
    fn on_rebuild_fault(&mut self, e: &RebuildFaultEvent) {
        _ = e;
    }

    /// Called for each per-view change (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_view_change(&mut self, e: &ViewChange) {
        _ = e;
    }
}

/// Shares a sink between the structure that emits into it and the caller
/// that inspects it.
impl<S: TraceSink + ?Sized> TraceSink for Rc<RefCell<S>> {
    fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
        self.borrow_mut().on_rebuild_begin(e);
    }

    fn on_rebuild_end(&mut self, e: &RebuildEndEvent) {
        self.borrow_mut().on_rebuild_end(e);
    }

    fn on_rebuild_deferred(&mut self, e: &RebuildDeferredEvent) {
        self.borrow_mut().on_rebuild_deferred(e);
    }

    fn on_rebuild_fault(&mut self, e: &RebuildFaultEvent) {
        self.borrow_mut().on_rebuild_fault(e);
    }

    #[cfg(feature = "trace-rich")]
    fn on_view_change(&mut self, e: &ViewChange) {
        self.borrow_mut().on_view_change(e);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer for an optional sink.
    #[inline]
    #[must_use]
    pub fn from_option(sink: Option<&'a mut dyn TraceSink>) -> Self {
        match sink {
            Some(sink) => Self::new(sink),
            None => Self::none(),
        }
    }

    /// Lends this tracer's sink out for a shorter lifetime.
    #[inline]
    #[must_use]
    pub fn reborrow(&mut self) -> Tracer<'_> {
        #[cfg(feature = "trace")]
        {
            Tracer {
                sink: self
                    .sink
                    .as_mut()
                    .map(|sink| &mut **sink as &mut dyn TraceSink),
            }
        }
        #[cfg(not(feature = "trace"))]
        {
            Tracer::none()
        }
    }

    /// Emits a [`RebuildBeginEvent`].
    #[inline]
    pub fn rebuild_begin(&mut self, e: &RebuildBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_rebuild_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RebuildEndEvent`].
    #[inline]
    pub fn rebuild_end(&mut self, e: &RebuildEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_rebuild_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RebuildDeferredEvent`].
    #[inline]
    pub fn rebuild_deferred(&mut self, e: &RebuildDeferredEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_rebuild_deferred(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RebuildFaultEvent`].
    #[inline]
    pub fn rebuild_fault(&mut self, e: &RebuildFaultEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_rebuild_fault(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ViewChange`] (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn view_change(&mut self, e: &ViewChange) {
        if let Some(s) = &mut self.sink {
            s.on_view_change(e);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_begin() -> RebuildBeginEvent {
        RebuildBeginEvent {
            target: TargetKind::Scene,
            generation: 3,
            entries: 12,
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_rebuild_begin(&sample_begin());
        sink.on_rebuild_end(&RebuildEndEvent {
            target: TargetKind::Tree,
            summary: RebuildSummary::default(),
        });
        sink.on_rebuild_fault(&RebuildFaultEvent {
            target: TargetKind::Scene,
            generation: 1,
            error: ReconcileError::ReentrantRebuild,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.rebuild_begin(&sample_begin());
        tracer.rebuild_deferred(&RebuildDeferredEvent {
            target: TargetKind::Scene,
            generation: 0,
            guards: 1,
        });
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            generations: Vec<u64>,
        }
        impl TraceSink for RecordingSink {
            fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
                self.generations.push(e.generation);
            }
        }

        let mut sink = RecordingSink {
            generations: Vec::new(),
        };
        let mut tracer = Tracer::new(&mut sink);
        tracer.rebuild_begin(&sample_begin());
        // Access sink after tracer is dropped.
        drop(tracer);
        assert_eq!(sink.generations, &[3]);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn shared_sink_stays_inspectable() {
        #[derive(Default)]
        struct Counter {
            faults: u32,
        }
        impl TraceSink for Counter {
            fn on_rebuild_fault(&mut self, _: &RebuildFaultEvent) {
                self.faults += 1;
            }
        }

        let shared = Rc::new(RefCell::new(Counter::default()));
        let mut handle = Rc::clone(&shared);
        let mut tracer = Tracer::new(&mut handle);
        tracer.rebuild_fault(&RebuildFaultEvent {
            target: TargetKind::Tree,
            generation: 2,
            error: ReconcileError::AlreadyUpdating,
        });
        drop(tracer);
        assert_eq!(shared.borrow().faults, 1);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn reborrowed_tracer_reaches_the_same_sink() {
        #[derive(Default)]
        struct Counter {
            begins: u32,
        }
        impl TraceSink for Counter {
            fn on_rebuild_begin(&mut self, _: &RebuildBeginEvent) {
                self.begins += 1;
            }
        }

        let mut sink = Counter::default();
        let mut tracer = Tracer::new(&mut sink);
        tracer.reborrow().rebuild_begin(&sample_begin());
        tracer.reborrow().rebuild_begin(&sample_begin());
        tracer.rebuild_begin(&sample_begin());
        drop(tracer);
        assert_eq!(sink.begins, 3);
    }
}
