// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr).

use std::io::Write;

use canopy_core::trace::{
    RebuildBeginEvent, RebuildDeferredEvent, RebuildEndEvent, RebuildFaultEvent, TargetKind,
    TraceSink, ViewChange, ViewChangeKind,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    lines: u64,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer, lines: 0 }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    /// Returns the number of lines written so far.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Consumes the sink and returns its writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if writeln!(self.writer, "{args}").is_ok() {
            self.lines += 1;
        }
    }
}

pub(crate) fn target_name(target: TargetKind) -> &'static str {
    match target {
        TargetKind::Scene => "scene",
        TargetKind::Tree => "tree",
    }
}

pub(crate) fn change_name(kind: ViewChangeKind) -> &'static str {
    match kind {
        ViewChangeKind::Created => "created",
        ViewChangeKind::Reused => "reused",
        ViewChangeKind::Shared => "shared",
        ViewChangeKind::Rejected => "rejected",
        ViewChangeKind::Replaced => "replaced",
        ViewChangeKind::Swept => "swept",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_rebuild_begin(&mut self, e: &RebuildBeginEvent) {
        self.line(format_args!(
            "[rebuild:begin] {} gen={} entries={}",
            target_name(e.target),
            e.generation,
            e.entries,
        ));
    }

    fn on_rebuild_end(&mut self, e: &RebuildEndEvent) {
        let s = &e.summary;
        self.line(format_args!(
            "[rebuild:end] {} gen={} visited={} created={} reused={} rejected={} \
             shared={} swept={}",
            target_name(e.target),
            s.generation,
            s.visited,
            s.created,
            s.reused,
            s.rejected,
            s.shared,
            s.swept,
        ));
    }

    fn on_rebuild_deferred(&mut self, e: &RebuildDeferredEvent) {
        self.line(format_args!(
            "[rebuild:deferred] {} gen={} guards={}",
            target_name(e.target),
            e.generation,
            e.guards,
        ));
    }

    fn on_rebuild_fault(&mut self, e: &RebuildFaultEvent) {
        self.line(format_args!(
            "[rebuild:FAULT] {} gen={} error={}",
            target_name(e.target),
            e.generation,
            e.error,
        ));
    }

    fn on_view_change(&mut self, e: &ViewChange) {
        let view = e.view;
        match e.key {
            Some(key) => self.line(format_args!(
                "[view] {} gen={} {} view={}@{} key={:#x}",
                target_name(e.target),
                e.generation,
                change_name(e.kind),
                view.index(),
                view.generation(),
                key.raw(),
            )),
            None => self.line(format_args!(
                "[view] {} gen={} {} view={}@{} unkeyed",
                target_name(e.target),
                e.generation,
                change_name(e.kind),
                view.index(),
                view.generation(),
            )),
        }
    }
}
