// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each rebuild becomes a `B`/`E` duration pair on its own thread lane (scene
//! rebuilds on lane 0, tree updates on lane 1). Deferrals, faults, and view
//! changes become instant events on the same lane.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use canopy_core::trace::TargetKind;

use crate::pretty::{change_name, target_name};
use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for record in decode(bytes) {
        let ts = nanos_to_us(record.nanos);
        match record.event {
            RecordedEvent::RebuildBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": "Rebuild",
                    "cat": target_name(e.target),
                    "ts": ts,
                    "pid": 0,
                    "tid": lane(e.target),
                    "args": {
                        "generation": e.generation,
                        "entries": e.entries,
                    }
                }));
            }
            RecordedEvent::RebuildEnd(e) => {
                let s = e.summary;
                events.push(json!({
                    "ph": "E",
                    "name": "Rebuild",
                    "cat": target_name(e.target),
                    "ts": ts,
                    "pid": 0,
                    "tid": lane(e.target),
                    "args": {
                        "generation": s.generation,
                        "visited": s.visited,
                        "created": s.created,
                        "reused": s.reused,
                        "rejected": s.rejected,
                        "shared": s.shared,
                        "swept": s.swept,
                    }
                }));
            }
            RecordedEvent::RebuildDeferred(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Deferred",
                    "cat": target_name(e.target),
                    "ts": ts,
                    "pid": 0,
                    "tid": lane(e.target),
                    "s": "t",
                    "args": {
                        "generation": e.generation,
                        "guards": e.guards,
                    }
                }));
            }
            RecordedEvent::RebuildFault(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Fault",
                    "cat": target_name(e.target),
                    "ts": ts,
                    "pid": 0,
                    "tid": lane(e.target),
                    "s": "p",
                    "args": {
                        "generation": e.generation,
                        "error": e.error.to_string(),
                    }
                }));
            }
            RecordedEvent::ViewChange(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": change_name(e.kind),
                    "cat": "View",
                    "ts": ts,
                    "pid": 0,
                    "tid": lane(e.target),
                    "s": "t",
                    "args": {
                        "generation": e.generation,
                        "key": e.key.map(|k| format!("{:#x}", k.raw())),
                        "view": format!("{}@{}", e.view.index(), e.view.generation()),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn lane(target: TargetKind) -> u32 {
    match target {
        TargetKind::Scene => 0,
        TargetKind::Tree => 1,
    }
}

fn nanos_to_us(nanos: u64) -> f64 {
    nanos as f64 / 1000.0
}
