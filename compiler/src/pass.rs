// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the engine's passes (parse is outside the runner), their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass (parse excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Lower,
    BuildGraph,
    PropagateRoutines,
    AssignLevels,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Events,     // Vec<Event>
    Graph,      // ProgramGraph
    Routines,   // RoutineInfo
    Levels,     // LoopLevels
    Attributes, // AttributeMap
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[],
            outputs: &[ArtifactId::Events],
            invariants: "clauses validated, events well nested",
        },
        PassId::BuildGraph => PassDescriptor {
            name: "build_graph",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Graph],
            invariants: "identities merged, nesting and callees resolved",
        },
        PassId::PropagateRoutines => PassDescriptor {
            name: "propagate_routines",
            inputs: &[PassId::BuildGraph],
            outputs: &[ArtifactId::Routines],
            invariants: "offload-callable set closed under callee edges",
        },
        PassId::AssignLevels => PassDescriptor {
            name: "assign_levels",
            inputs: &[PassId::PropagateRoutines],
            outputs: &[ArtifactId::Levels, ArtifactId::Attributes],
            invariants: "every non-auto loop has exactly one effective level",
        },
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Lower,
    PassId::BuildGraph,
    PassId::PropagateRoutines,
    PassId::AssignLevels,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
