// dot.rs — Graphviz DOT output for the annotated call graph
//
// Renders one cluster per function holding its loop constructs (labelled
// with their effective level), plus call edges between functions. Offload-
// callable functions are filled; external names are drawn as plain text.
//
// Preconditions: `attrs` was built from `graph`.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::attrs::AttributeMap;
use crate::events::UseKind;
use crate::graph::{ConstructKind, ProgramGraph, UseTarget};
use crate::id::ConstructId;

/// Emit the annotated program graph as a Graphviz DOT string.
pub fn emit_dot(graph: &ProgramGraph, attrs: &AttributeMap) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph accinfer {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for func in &graph.functions {
        let fa = attrs.function(func.id);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{} {{", func.id).unwrap();
        writeln!(buf, "        label=\"{}\";", escape(&func.name)).unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        let label = match fa.routine_level {
            Some(level) if fa.offload_callable => format!("{}\\nroutine({level})", escape(&func.name)),
            _ => escape(&func.name),
        };
        let style = if fa.offload_callable {
            "shape=box, style=filled, fillcolor=lightblue"
        } else {
            "shape=box"
        };
        writeln!(buf, "        {} [label=\"{label}\", {style}];", func.id).unwrap();
        for &root in &func.body {
            write_construct(&mut buf, graph, attrs, root, &func.id.to_string());
        }
        writeln!(buf, "    }}").unwrap();
    }

    let externals: BTreeSet<_> = graph
        .uses
        .iter()
        .filter_map(|u| match u.target {
            UseTarget::External(id) if u.kind.is_use() => Some(id),
            _ => None,
        })
        .collect();
    if !externals.is_empty() {
        writeln!(buf).unwrap();
        for id in &externals {
            let name = &graph.externals[id.index()].name;
            writeln!(buf, "    {id} [label=\"{}\", shape=plaintext];", escape(name)).unwrap();
        }
    }

    // One edge per (caller, target, kind), in use order.
    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();
    for site in &graph.uses {
        let (Some(caller), true) = (site.caller, site.kind.is_use()) else {
            continue;
        };
        let target = match site.target {
            UseTarget::Function(id) => id.to_string(),
            UseTarget::External(id) => id.to_string(),
        };
        let from = site
            .construct
            .map_or_else(|| caller.to_string(), |c| c.to_string());
        if seen.insert((from.clone(), target.clone(), site.kind == UseKind::AddressOf)) {
            edges.push((from, target, site.kind));
        }
    }
    if !edges.is_empty() {
        writeln!(buf).unwrap();
        for (from, to, kind) in edges {
            let style = match kind {
                UseKind::AddressOf => " [style=dashed, label=\"addr\"]",
                _ => "",
            };
            writeln!(buf, "    {from} -> {to}{style};").unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

fn write_construct(
    buf: &mut String,
    graph: &ProgramGraph,
    attrs: &AttributeMap,
    id: ConstructId,
    parent: &str,
) {
    let construct = graph.construct(id);
    let (label, shape) = match &construct.kind {
        ConstructKind::Region { kind, .. } => (kind.to_string(), "hexagon"),
        ConstructKind::Loop { label, .. } => {
            let name = label.as_deref().unwrap_or("loop");
            let level = match attrs.loop_attrs(id) {
                Some(l) if l.is_auto() => "auto".to_string(),
                Some(l) => match (l.effective_level(), l.is_inferred()) {
                    (Some(level), true) => format!("{level}*"),
                    (Some(level), false) => level.to_string(),
                    (None, _) => String::new(),
                },
                None => String::new(),
            };
            (format!("{}\\n{level}", escape(name)), "ellipse")
        }
    };
    writeln!(buf, "        {id} [label=\"{label}\", shape={shape}];").unwrap();
    writeln!(buf, "        {parent} -> {id} [style=dotted, arrowhead=none];").unwrap();
    for &child in &construct.children {
        write_construct(buf, graph, attrs, child, &id.to_string());
    }
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

// ── Tests ───────────────────────────────────────────────────────────────────
