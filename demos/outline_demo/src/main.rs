// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated document editor that exercises a scene and its outline.
//!
//! A small document of shapes and groups is rendered through a
//! [`Scene`] of views. An outline [`TreeUpdater`] mirrors the hidden and
//! selected state of those views. A few edits follow (select, hide, change a
//! shape's kind, remove a group) and every step is printed.
//!
//! Tree updates go to a [`PrettyPrintSink`] on stdout; scene rebuilds go to a
//! [`RecorderSink`], which is exported as a Chrome trace at the end.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::rc::Rc;

use canopy_core::trace::Tracer;
use canopy_core::{
    Rebuild, ReconcileError, Root, RowContext, Scene, SceneContext, SourceKey, TreeRow,
    TreeUpdater, Validity, View, ViewState,
};
use canopy_debug::pretty::PrettyPrintSink;
use canopy_debug::recorder::RecorderSink;
use kurbo::Rect;

const TRACE_PATH: &str = "canopy-trace.json";

const LEFT: u64 = 1;
const RIGHT: u64 = 2;
const HEADER: u64 = 10;
const LOGO: u64 = 11;
const FOOTER: u64 = 12;

// ---------------------------------------------------------------------------
// Source graph
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShapeKind {
    Rect,
    Ellipse,
}

#[derive(Debug)]
enum Node {
    Shape {
        kind: ShapeKind,
        bounds: Rect,
        hidden: bool,
    },
    Group {
        name: &'static str,
        children: Vec<u64>,
    },
}

/// The edited document: an arena of nodes plus the top-level order.
#[derive(Debug, Default)]
struct Document {
    nodes: BTreeMap<u64, Node>,
    top: Vec<u64>,
}

impl Document {
    fn sample() -> Self {
        let mut doc = Self::default();
        let shape = |kind, x0, y0, x1, y1| Node::Shape {
            kind,
            bounds: Rect::new(x0, y0, x1, y1),
            hidden: false,
        };
        doc.nodes.insert(HEADER, shape(ShapeKind::Rect, 0.0, 0.0, 800.0, 60.0));
        doc.nodes.insert(LOGO, shape(ShapeKind::Ellipse, 10.0, 10.0, 50.0, 50.0));
        doc.nodes.insert(FOOTER, shape(ShapeKind::Rect, 0.0, 540.0, 800.0, 600.0));
        doc.nodes.insert(
            LEFT,
            Node::Group {
                name: "left",
                children: vec![HEADER, LOGO],
            },
        );
        // LOGO is reachable from both groups.
        doc.nodes.insert(
            RIGHT,
            Node::Group {
                name: "right",
                children: vec![LOGO, FOOTER],
            },
        );
        doc.top = vec![LEFT, RIGHT];
        doc
    }

    fn bounds(&self, id: u64) -> Option<Rect> {
        match self.nodes.get(&id)? {
            Node::Shape { bounds, .. } => Some(*bounds),
            Node::Group { children, .. } => children
                .iter()
                .filter_map(|&child| self.bounds(child))
                .reduce(|acc, r| acc.union(r)),
        }
    }
}

// ---------------------------------------------------------------------------
// Scene views
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ShapeView {
    id: u64,
    kind: ShapeKind,
    bounds: Rect,
    hidden: bool,
    selected: bool,
}

impl View<Document> for ShapeView {
    fn update(
        &mut self,
        _: &mut SceneContext<'_, Document>,
        doc: &Document,
    ) -> Result<Validity, ReconcileError> {
        let Some(&Node::Shape {
            kind,
            bounds,
            hidden,
        }) = doc.nodes.get(&self.id)
        else {
            return Ok(Validity::Rejected);
        };
        // A view draws one kind of shape; a kind change needs a new view.
        if kind != self.kind {
            return Ok(Validity::Rejected);
        }
        self.bounds = bounds;
        self.hidden = hidden;
        Ok(Validity::Valid)
    }

    fn state(&self) -> ViewState {
        ViewState {
            hidden: self.hidden,
            selected: self.selected,
        }
    }
}

#[derive(Debug)]
struct GroupView {
    id: u64,
    bounds: Option<Rect>,
}

impl View<Document> for GroupView {
    fn update(
        &mut self,
        cx: &mut SceneContext<'_, Document>,
        doc: &Document,
    ) -> Result<Validity, ReconcileError> {
        let Some(Node::Group { children, .. }) = doc.nodes.get(&self.id) else {
            return Ok(Validity::Rejected);
        };
        for &child in children {
            node_view(cx, doc, child)?;
        }
        self.bounds = doc.bounds(self.id);
        Ok(Validity::Valid)
    }
}

fn node_view(
    cx: &mut SceneContext<'_, Document>,
    doc: &Document,
    id: u64,
) -> Result<(), ReconcileError> {
    let key = SourceKey::new(id);
    match doc.nodes.get(&id) {
        Some(&Node::Shape { kind, bounds, .. }) => {
            cx.update_or_create(key, || {
                Box::new(ShapeView {
                    id,
                    kind,
                    bounds,
                    hidden: false,
                    selected: false,
                })
            })?;
        }
        Some(Node::Group { .. }) => {
            cx.update_or_create(key, || Box::new(GroupView { id, bounds: None }))?;
        }
        None => {}
    }
    Ok(())
}

/// Scene root: walks the document's top-level nodes.
#[derive(Debug)]
struct Canvas;

impl Root<dyn View<Document>, Document> for Canvas {
    fn refresh(
        &mut self,
        cx: &mut SceneContext<'_, Document>,
        doc: &Document,
    ) -> Result<(), ReconcileError> {
        for &id in &doc.top {
            node_view(cx, doc, id)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outline rows
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OutlineRow {
    id: u64,
    depth: usize,
    label: String,
    state: Option<ViewState>,
}

impl TreeRow<Document> for OutlineRow {
    fn update(
        &mut self,
        cx: &mut RowContext<'_, Document>,
        doc: &Document,
    ) -> Result<Validity, ReconcileError> {
        let Some(node) = doc.nodes.get(&self.id) else {
            return Ok(Validity::Rejected);
        };
        self.label = label(node);
        self.state = cx.mirror(SourceKey::new(self.id));
        if let Node::Group { children, .. } = node {
            for &child in children {
                outline_row(cx, doc, child, self.depth + 1)?;
            }
        }
        Ok(Validity::Valid)
    }
}

fn label(node: &Node) -> String {
    match node {
        Node::Shape { kind, bounds, .. } => {
            format!("{kind:?} {}x{}", bounds.width(), bounds.height())
        }
        Node::Group { name, children } => format!("group {name} ({})", children.len()),
    }
}

fn outline_row(
    cx: &mut RowContext<'_, Document>,
    doc: &Document,
    id: u64,
    depth: usize,
) -> Result<(), ReconcileError> {
    if doc.nodes.contains_key(&id) {
        cx.update_or_create(SourceKey::new(id), || {
            Box::new(OutlineRow {
                id,
                depth,
                label: String::new(),
                state: None,
            })
        })?;
    }
    Ok(())
}

/// Outline root: one row per top-level node.
#[derive(Debug)]
struct Outline;

impl Root<dyn TreeRow<Document>, Document> for Outline {
    fn refresh(
        &mut self,
        cx: &mut RowContext<'_, Document>,
        doc: &Document,
    ) -> Result<(), ReconcileError> {
        for &id in &doc.top {
            outline_row(cx, doc, id, 0)?;
        }
        Ok(())
    }
}

fn print_outline(outline: &TreeUpdater<Outline, Document>) {
    for &id in outline.rows() {
        let Some(row) = outline.row(id) else {
            continue;
        };
        let Some(row) = (row as &dyn Any).downcast_ref::<OutlineRow>() else {
            continue;
        };
        let flags = match row.state {
            Some(ViewState { hidden, selected }) => format!(
                "{}{}",
                if hidden { " [hidden]" } else { "" },
                if selected { " [selected]" } else { "" },
            ),
            None => " [no view]".to_owned(),
        };
        println!("  {:indent$}{}{flags}", "", row.label, indent = row.depth * 2);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    // -- sinks -------------------------------------------------------------
    let mut pretty = PrettyPrintSink::new(Box::new(std::io::stdout()));
    let recorder = Rc::new(RefCell::new(RecorderSink::new()));

    // -- structures --------------------------------------------------------
    let mut scene = Scene::new(Canvas, Document::sample());
    scene.set_trace_sink(Box::new(Rc::clone(&recorder)));
    let rebuilds = Rc::new(Cell::new(0_u32));
    let counter = Rc::clone(&rebuilds);
    scene.on_rebuilt(move |scene, summary| {
        counter.set(counter.get() + 1);
        println!(
            "scene gen={} views={} created={} reused={} rejected={} shared={} swept={}",
            summary.generation,
            scene.len(),
            summary.created,
            summary.reused,
            summary.rejected,
            summary.shared,
            summary.swept,
        );
    });
    let mut outline = TreeUpdater::new(Outline);

    // -- 1. initial build --------------------------------------------------
    println!("== initial build");
    scene.invalidate()?;
    outline.update_with_tracer(&scene, scene.value(), &mut Tracer::new(&mut pretty))?;
    print_outline(&outline);

    // -- 2. select the logo from inside an iteration ------------------------
    println!("== select logo");
    let mut requested = None;
    scene.for_each::<ShapeView>(|_, shape| {
        if shape.id == LOGO {
            shape.selected = true;
            requested = Some(scene.invalidate());
        }
    })?;
    assert!(
        matches!(requested, Some(Ok(Rebuild::Deferred))),
        "rebuilds requested mid-iteration are deferred"
    );
    outline.update_with_tracer(&scene, scene.value(), &mut Tracer::new(&mut pretty))?;
    print_outline(&outline);

    // -- 3. edit the document ----------------------------------------------
    println!("== hide footer, turn header into an ellipse, drop the right group");
    {
        let doc = scene.value_mut();
        if let Some(Node::Shape { hidden, .. }) = doc.nodes.get_mut(&FOOTER) {
            *hidden = true;
        }
        if let Some(Node::Shape { kind, .. }) = doc.nodes.get_mut(&HEADER) {
            *kind = ShapeKind::Ellipse;
        }
    }
    scene.invalidate()?;
    outline.update_with_tracer(&scene, scene.value(), &mut Tracer::new(&mut pretty))?;
    print_outline(&outline);

    scene.value_mut().top.retain(|&id| id != RIGHT);
    scene.invalidate()?;
    outline.update_with_tracer(&scene, scene.value(), &mut Tracer::new(&mut pretty))?;
    print_outline(&outline);
    if let Some(group) = scene.try_get_view_for(SourceKey::new(LEFT)) {
        let any: &dyn Any = &*group;
        if let Some(GroupView {
            bounds: Some(bounds),
            ..
        }) = any.downcast_ref::<GroupView>()
        {
            println!("left group bounds: {bounds:?}");
        }
    }
    let mut visible_area = 0.0;
    scene.for_each::<ShapeView>(|_, shape| {
        if !shape.hidden {
            visible_area += shape.bounds.area();
        }
    })?;
    println!("visible shape area: {visible_area}");

    // -- export Chrome trace -----------------------------------------------
    drop(scene.take_trace_sink());
    let file = File::create(TRACE_PATH)?;
    let mut writer = BufWriter::new(file);
    let recorder = recorder.borrow();
    canopy_debug::chrome::export(recorder.as_bytes(), &mut writer)?;

    println!(
        "Wrote {TRACE_PATH} ({} scene rebuilds, {} records)",
        rebuilds.get(),
        recorder.len(),
    );
    Ok(())
}
