// levels.rs — Implicit parallelism levels for loop constructs
//
// Every position in the program carries a ceiling: the coarsest level a loop
// there may take. Compute region bodies start at gang. A loop without an
// explicit level or `auto` takes the ceiling and lowers it by one for its
// body; an explicit level `X` lowers the body ceiling to at most the level
// below `X`; `auto` passes it through. Function bodies enter at the finest
// ceiling among their call contexts, so loops in called functions nest under
// the calling loop exactly as if they were written at the call site.
//
// Preconditions: `graph` is fully built; `routines` is the final propagation
//                result for the same graph.
// Postconditions: every loop with neither an explicit level nor `auto` has an
//                 inferred level; every other construct has none.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

use crate::clause::{LoopClauses, ParallelismLevel};
use crate::events::UseKind;
use crate::graph::{ConstructKind, ProgramGraph, UseSite};
use crate::id::{ConstructId, FuncId, UseId};
use crate::routine::{FuncWorklist, RoutineInfo};

use ParallelismLevel::{Gang, Seq, Vector, Worker};

// ── Options ─────────────────────────────────────────────────────────────────

/// Which levels inference may produce. Gang and seq are always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferOptions {
    pub implicit_worker: bool,
    pub implicit_vector: bool,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            implicit_worker: true,
            implicit_vector: true,
        }
    }
}

impl InferOptions {
    pub fn allows(&self, level: ParallelismLevel) -> bool {
        match level {
            Gang | Seq => true,
            Worker => self.implicit_worker,
            Vector => self.implicit_vector,
        }
    }

    /// The coarsest allowed level at or below `level`.
    pub fn clamp(&self, level: ParallelismLevel) -> ParallelismLevel {
        let mut level = level;
        while !self.allows(level) {
            level = level.below();
        }
        level
    }

    /// The coarsest allowed level strictly below `level` (`Seq` for `Seq`).
    pub fn below(&self, level: ParallelismLevel) -> ParallelismLevel {
        self.clamp(level.below())
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Inferred levels per construct and entry ceilings per function.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopLevels {
    /// Indexed by `ConstructId`. `None` for regions, explicit-level loops and
    /// `auto` loops.
    pub inferred: Vec<Option<ParallelismLevel>>,
    /// Indexed by `FuncId`.
    pub entry_ceilings: Vec<ParallelismLevel>,
}

impl LoopLevels {
    pub fn inferred(&self, id: ConstructId) -> Option<ParallelismLevel> {
        self.inferred[id.index()]
    }

    pub fn entry_ceiling(&self, id: FuncId) -> ParallelismLevel {
        self.entry_ceilings[id.index()]
    }
}

/// Compute entry ceilings, then assign every loop top-down.
pub fn assign_levels(
    graph: &ProgramGraph,
    routines: &RoutineInfo,
    options: InferOptions,
) -> LoopLevels {
    let assigner = LevelAssigner {
        graph,
        routines,
        options,
    };
    let entry_ceilings = assigner.entry_ceilings();
    let inferred = assigner.assign(&entry_ceilings);
    tracing::debug!(
        inferred = inferred.iter().filter(|l| l.is_some()).count(),
        "loop levels assigned"
    );
    LoopLevels {
        inferred,
        entry_ceilings,
    }
}

// ── Assigner ────────────────────────────────────────────────────────────────

struct LevelAssigner<'a> {
    graph: &'a ProgramGraph,
    routines: &'a RoutineInfo,
    options: InferOptions,
}

impl LevelAssigner<'_> {
    fn region_ceiling(&self) -> ParallelismLevel {
        self.options.clamp(Gang)
    }

    /// Ceiling inside the body of a loop with `clauses` at ceiling `outer`.
    fn body_ceiling(&self, clauses: &LoopClauses, outer: ParallelismLevel) -> ParallelismLevel {
        if clauses.is_auto() {
            return outer;
        }
        match clauses.explicit_level() {
            Some(level) => outer.min(self.options.below(level)),
            None => self.options.below(outer),
        }
    }

    /// Ceiling for code directly inside `construct`, in a function entered at
    /// `entry`.
    fn ceiling_inside(&self, construct: ConstructId, entry: ParallelismLevel) -> ParallelismLevel {
        let mut loops = Vec::new();
        let mut ceiling = entry;
        let mut current = Some(construct);
        while let Some(id) = current {
            let c = self.graph.construct(id);
            if c.is_region() {
                ceiling = self.region_ceiling();
                break;
            }
            loops.push(id);
            current = c.parent;
        }
        for id in loops.into_iter().rev() {
            if let Some(clauses) = self.graph.construct(id).loop_clauses() {
                ceiling = self.body_ceiling(clauses, ceiling);
            }
        }
        ceiling
    }

    fn site_ceiling(&self, site: &UseSite, entry: ParallelismLevel) -> ParallelismLevel {
        match site.construct {
            Some(c) => self.ceiling_inside(c, entry),
            None => entry,
        }
    }

    /// Decreasing fixed point: each function's entry ceiling is the minimum
    /// over its explicit routine level and the ceilings at its call sites in
    /// offloaded code. Functions with no such context enter at `Seq`.
    fn entry_ceilings(&self) -> Vec<ParallelismLevel> {
        let n = self.graph.functions.len();
        let mut entry: Vec<Option<ParallelismLevel>> = self
            .graph
            .functions
            .iter()
            .map(|f| f.explicit_level.map(|l| self.options.clamp(l)))
            .collect();
        // Call sites outside compute regions in offload-callable callers.
        let mut calls_from: Vec<Vec<UseId>> = vec![Vec::new(); n];

        for site in &self.graph.uses {
            if site.kind != UseKind::Call {
                continue;
            }
            let Some(callee) = site.callee() else {
                continue;
            };
            if site.region.is_some() {
                let ceiling = self.site_ceiling(site, Seq);
                lower_to(&mut entry[callee.index()], ceiling);
            } else if let Some(caller) = site.caller {
                if self.routines.is_offload_callable(caller) {
                    calls_from[caller.index()].push(site.id);
                }
            }
        }

        let mut worklist = FuncWorklist::default();
        for f in self.routines.offload_functions() {
            if entry[f.index()].is_some() {
                worklist.push(f);
            }
        }
        self.drain(&mut entry, &calls_from, &mut worklist);

        // Reached only through address-of or a context-free cycle.
        for f in self.routines.offload_functions() {
            if entry[f.index()].is_none() {
                entry[f.index()] = Some(Seq);
                worklist.push(f);
            }
        }
        if !worklist.is_empty() {
            self.drain(&mut entry, &calls_from, &mut worklist);
        }

        entry.into_iter().map(|e| e.unwrap_or(Seq)).collect()
    }

    fn drain(
        &self,
        entry: &mut [Option<ParallelismLevel>],
        calls_from: &[Vec<UseId>],
        worklist: &mut FuncWorklist,
    ) {
        while let Some(caller) = worklist.pop() {
            let Some(ceiling) = entry[caller.index()] else {
                continue;
            };
            for &site_id in &calls_from[caller.index()] {
                let site = self.graph.use_site(site_id);
                let Some(callee) = site.callee() else {
                    continue;
                };
                if lower_to(&mut entry[callee.index()], self.site_ceiling(site, ceiling)) {
                    worklist.push(callee);
                }
            }
        }
    }

    /// Top-down walk of every function body. Siblings receive the same
    /// ceiling and only affect their own descendants.
    fn assign(&self, entry: &[ParallelismLevel]) -> Vec<Option<ParallelismLevel>> {
        let mut inferred = vec![None; self.graph.constructs.len()];
        for func in &self.graph.functions {
            let start = entry[func.id.index()];
            let mut stack: Vec<(ConstructId, ParallelismLevel)> =
                func.body.iter().rev().map(|&c| (c, start)).collect();
            while let Some((id, ceiling)) = stack.pop() {
                let construct = self.graph.construct(id);
                let inner = match &construct.kind {
                    ConstructKind::Region { .. } => self.region_ceiling(),
                    ConstructKind::Loop { clauses, .. } => {
                        if !clauses.is_auto() && clauses.explicit_level().is_none() {
                            inferred[id.index()] = Some(ceiling);
                        }
                        self.body_ceiling(clauses, ceiling)
                    }
                };
                stack.extend(construct.children.iter().rev().map(|&c| (c, inner)));
            }
        }
        inferred
    }
}

/// Lower `slot` to `value` if that is finer. Returns true on change.
fn lower_to(slot: &mut Option<ParallelismLevel>, value: ParallelismLevel) -> bool {
    match slot {
        Some(current) if *current <= value => false,
        _ => {
            *slot = Some(value);
            true
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
