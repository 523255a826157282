// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as tagged little-endian records. Every record starts with its tag
//! and the nanoseconds elapsed since the recorder was created. [`decode`]
//! reads them back as an iterator of [`Record`].

use std::time::Instant;

use canopy_core::trace::{
    RebuildBeginEvent, RebuildDeferredEvent, RebuildEndEvent, RebuildFaultEvent, TargetKind,
    TraceSink, ViewChange, ViewChangeKind,
};
use canopy_core::{RebuildSummary, ReconcileError, SourceKey, ViewId};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_REBUILD_BEGIN: u8 = 1;
const TAG_REBUILD_END: u8 = 2;
const TAG_REBUILD_DEFERRED: u8 = 3;
const TAG_REBUILD_FAULT: u8 = 4;
const TAG_VIEW_CHANGE: u8 = 5;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug)]
pub struct RecorderSink {
    buf: Vec<u8>,
    start: Instant,
    records: usize,
}

impl Default for RecorderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderSink {
    /// Creates an empty recorder whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            start: Instant::now(),
            records: 0,
        }
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the number of records written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    // -- encoding helpers --------------------------------------------------

    fn header(&mut self, tag: u8) {
        // Saturates after ~584 years.
        let nanos = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.records += 1;
        self.write_u8(tag);
        self.write_u64(nanos);
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_count(&mut self, v: usize) {
        self.write_u64(u64::try_from(v).unwrap_or(u64::MAX));
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_target(&mut self, t: TargetKind) {
        self.write_u8(match t {
            TargetKind::Scene => 0,
            TargetKind::Tree => 1,
        });
    }

    fn write_change(&mut self, k: ViewChangeKind) {
        self.write_u8(match k {
            ViewChangeKind::Created => 0,
            ViewChangeKind::Reused => 1,
            ViewChangeKind::Shared => 2,
            ViewChangeKind::Rejected => 3,
            ViewChangeKind::Replaced => 4,
            ViewChangeKind::Swept => 5,
        });
    }

    fn write_error(&mut self, e: ReconcileError) {
        let (code, limit) = match e {
            ReconcileError::AlreadyUpdating => (0, 0),
            ReconcileError::NoUpdateOpen => (1, 0),
            ReconcileError::UpdateWindowClosed => (2, 0),
            ReconcileError::ContextExpired => (3, 0),
            ReconcileError::ReentrantRebuild => (4, 0),
            ReconcileError::ReentrantIteration => (5, 0),
            ReconcileError::RebuildLoop { limit } => (6, limit),
            ReconcileError::BorrowHeld => (7, 0),
        };
        self.write_u8(code);
        self.write_u32(limit);
    }
}

impl TraceSink for RecorderSink {
    fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
        self.header(TAG_REBUILD_BEGIN);
        self.write_target(e.target);
        self.write_u64(e.generation);
        self.write_count(e.entries);
    }

    fn on_rebuild_end(&mut self, e: &RebuildEndEvent) {
        let s = e.summary;
        self.header(TAG_REBUILD_END);
        self.write_target(e.target);
        self.write_u64(s.generation);
        self.write_count(s.visited);
        self.write_count(s.created);
        self.write_count(s.reused);
        self.write_count(s.rejected);
        self.write_count(s.shared);
        self.write_count(s.swept);
    }

    fn on_rebuild_deferred(&mut self, e: &RebuildDeferredEvent) {
        self.header(TAG_REBUILD_DEFERRED);
        self.write_target(e.target);
        self.write_u64(e.generation);
        self.write_u32(e.guards);
    }

    fn on_rebuild_fault(&mut self, e: &RebuildFaultEvent) {
        self.header(TAG_REBUILD_FAULT);
        self.write_target(e.target);
        self.write_u64(e.generation);
        self.write_error(e.error);
    }

    fn on_view_change(&mut self, e: &ViewChange) {
        self.header(TAG_VIEW_CHANGE);
        self.write_target(e.target);
        self.write_u64(e.generation);
        self.write_option_u64(e.key.map(SourceKey::raw));
        self.write_u32(e.view.index());
        self.write_u32(e.view.generation());
        self.write_change(e.kind);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Copy, Debug)]
pub enum RecordedEvent {
    /// A [`RebuildBeginEvent`].
    RebuildBegin(RebuildBeginEvent),
    /// A [`RebuildEndEvent`].
    RebuildEnd(RebuildEndEvent),
    /// A [`RebuildDeferredEvent`].
    RebuildDeferred(RebuildDeferredEvent),
    /// A [`RebuildFaultEvent`].
    RebuildFault(RebuildFaultEvent),
    /// A [`ViewChange`].
    ViewChange(ViewChange),
}

/// One decoded record: an event and when it was recorded.
#[derive(Clone, Copy, Debug)]
pub struct Record {
    /// Nanoseconds between the recorder's creation and the event.
    pub nanos: u64,
    /// The recorded event.
    pub event: RecordedEvent,
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`Record`].
///
/// Iteration stops at the first unknown tag or truncated record.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded records.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[v]| v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_count(&mut self) -> Option<usize> {
        usize::try_from(self.read_u64()?).ok()
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_target(&mut self) -> Option<TargetKind> {
        match self.read_u8()? {
            0 => Some(TargetKind::Scene),
            1 => Some(TargetKind::Tree),
            _ => None,
        }
    }

    fn read_change(&mut self) -> Option<ViewChangeKind> {
        Some(match self.read_u8()? {
            0 => ViewChangeKind::Created,
            1 => ViewChangeKind::Reused,
            2 => ViewChangeKind::Shared,
            3 => ViewChangeKind::Rejected,
            4 => ViewChangeKind::Replaced,
            5 => ViewChangeKind::Swept,
            _ => return None,
        })
    }

    fn read_error(&mut self) -> Option<ReconcileError> {
        let code = self.read_u8()?;
        let limit = self.read_u32()?;
        Some(match code {
            0 => ReconcileError::AlreadyUpdating,
            1 => ReconcileError::NoUpdateOpen,
            2 => ReconcileError::UpdateWindowClosed,
            3 => ReconcileError::ContextExpired,
            4 => ReconcileError::ReentrantRebuild,
            5 => ReconcileError::ReentrantIteration,
            6 => ReconcileError::RebuildLoop { limit },
            7 => ReconcileError::BorrowHeld,
            _ => return None,
        })
    }

    fn decode_rebuild_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RebuildBegin(RebuildBeginEvent {
            target: self.read_target()?,
            generation: self.read_u64()?,
            entries: self.read_count()?,
        }))
    }

    fn decode_rebuild_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RebuildEnd(RebuildEndEvent {
            target: self.read_target()?,
            summary: RebuildSummary {
                generation: self.read_u64()?,
                visited: self.read_count()?,
                created: self.read_count()?,
                reused: self.read_count()?,
                rejected: self.read_count()?,
                shared: self.read_count()?,
                swept: self.read_count()?,
            },
        }))
    }

    fn decode_rebuild_deferred(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RebuildDeferred(RebuildDeferredEvent {
            target: self.read_target()?,
            generation: self.read_u64()?,
            guards: self.read_u32()?,
        }))
    }

    fn decode_rebuild_fault(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RebuildFault(RebuildFaultEvent {
            target: self.read_target()?,
            generation: self.read_u64()?,
            error: self.read_error()?,
        }))
    }

    fn decode_view_change(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ViewChange(ViewChange {
            target: self.read_target()?,
            generation: self.read_u64()?,
            key: self.read_option_u64()?.map(SourceKey::new),
            view: ViewId::from_parts(self.read_u32()?, self.read_u32()?),
            kind: self.read_change()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        let nanos = self.read_u64()?;
        let event = match tag {
            TAG_REBUILD_BEGIN => self.decode_rebuild_begin(),
            TAG_REBUILD_END => self.decode_rebuild_end(),
            TAG_REBUILD_DEFERRED => self.decode_rebuild_deferred(),
            TAG_REBUILD_FAULT => self.decode_rebuild_fault(),
            TAG_VIEW_CHANGE => self.decode_view_change(),
            _ => None,
        }?;
        Some(Record { nanos, event })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
