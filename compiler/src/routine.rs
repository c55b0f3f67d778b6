// routine.rs — Offload-callable propagation over the call graph
//
// Decides which functions must be compiled for the offload target. Seeds are
// functions with an explicit routine directive and functions called or
// address-taken inside a compute construct; marks then flow along callee
// edges until nothing changes. Marking is monotone and driven by a FIFO
// worklist, so call cycles terminate without recursion.
//
// Also computes the level an implicit routine directive would carry for each
// offload-callable function (`implicit_routine_levels`), once loop levels are
// known.
//
// Preconditions: `graph` is a fully built `ProgramGraph`.
// Postconditions: `RoutineInfo` marks exactly the functions reachable along
//                 callee edges from a seed, each with the first reason found.
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;

use crate::clause::ParallelismLevel;
use crate::events::UseKind;
use crate::graph::{ProgramGraph, UseTarget};
use crate::id::{ConstructId, FuncId, UseId};

// ── Public types ────────────────────────────────────────────────────────────

/// Why a function became offload-callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OffloadReason {
    /// An explicit routine directive.
    Explicit,
    /// Called or address-taken inside a compute construct.
    ComputeUse {
        caller: Option<FuncId>,
        site: UseId,
    },
    /// Called or address-taken by a function that is already offload-callable.
    CalledFrom { caller: FuncId, site: UseId },
}

/// Final propagation result, indexed by `FuncId`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineInfo {
    pub offload: Vec<bool>,
    pub reasons: Vec<Option<OffloadReason>>,
}

impl RoutineInfo {
    pub fn is_offload_callable(&self, id: FuncId) -> bool {
        self.offload[id.index()]
    }

    pub fn reason(&self, id: FuncId) -> Option<OffloadReason> {
        self.reasons[id.index()]
    }

    /// Offload-callable functions in id order.
    pub fn offload_functions(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.offload
            .iter()
            .enumerate()
            .filter(|(_, &marked)| marked)
            .map(|(i, _)| FuncId(i as u32))
    }

    /// Follow `CalledFrom` reasons back to the explicit directive or compute
    /// construct that caused `id` to be marked. Starts with `id` itself.
    pub fn reason_chain(&self, id: FuncId) -> Vec<(FuncId, OffloadReason)> {
        walk_reasons(id, self.offload.len(), |f| self.reason(f))
    }
}

/// Walk `CalledFrom` links starting at `id`. Each caller was marked before
/// its callee, so the walk ends; `limit` bounds it regardless.
pub fn walk_reasons(
    id: FuncId,
    limit: usize,
    reason_of: impl Fn(FuncId) -> Option<OffloadReason>,
) -> Vec<(FuncId, OffloadReason)> {
    let mut chain = Vec::new();
    let mut current = id;
    while let Some(reason) = reason_of(current) {
        chain.push((current, reason));
        match reason {
            OffloadReason::CalledFrom { caller, .. } if chain.len() <= limit => current = caller,
            _ => break,
        }
    }
    chain
}

/// Run seeding and propagation to completion.
pub fn propagate_routines(graph: &ProgramGraph) -> RoutineInfo {
    let mut propagator = RoutinePropagator::new(graph);
    let seeded = propagator.seed();
    let propagated = propagator.propagate();
    tracing::debug!(seeded, propagated, "routine propagation complete");
    propagator.finish()
}

// ── Worklist ────────────────────────────────────────────────────────────────

/// FIFO worklist of functions with membership tracking, so a function is
/// queued at most once at a time.
#[derive(Debug, Default)]
pub(crate) struct FuncWorklist {
    queue: VecDeque<FuncId>,
    queued: HashSet<FuncId>,
}

impl FuncWorklist {
    pub(crate) fn pop(&mut self) -> Option<FuncId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    pub(crate) fn push(&mut self, id: FuncId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ── Propagator ──────────────────────────────────────────────────────────────

/// Incremental offload-callable propagation.
///
/// `seed` and `mark` only enqueue; `propagate` drains the worklist. Marks are
/// never cleared, so any interleaving of `mark` and `propagate` converges to
/// the same set.
pub struct RoutinePropagator<'g> {
    graph: &'g ProgramGraph,
    offload: Vec<bool>,
    reasons: Vec<Option<OffloadReason>>,
    /// First call/address-of site per (caller, callee), for `CalledFrom`.
    first_site: Vec<BTreeMap<FuncId, UseId>>,
    worklist: FuncWorklist,
}

impl<'g> RoutinePropagator<'g> {
    pub fn new(graph: &'g ProgramGraph) -> Self {
        let n = graph.functions.len();
        let mut first_site: Vec<BTreeMap<FuncId, UseId>> = vec![BTreeMap::new(); n];
        for site in &graph.uses {
            if !site.kind.is_use() {
                continue;
            }
            if let (Some(caller), UseTarget::Function(callee)) = (site.caller, site.target) {
                first_site[caller.index()].entry(callee).or_insert(site.id);
            }
        }
        Self {
            graph,
            offload: vec![false; n],
            reasons: vec![None; n],
            first_site,
            worklist: FuncWorklist::default(),
        }
    }

    /// Mark every seed: explicit routine directives first (id order), then
    /// compute-construct uses (program order). Returns the number newly marked.
    pub fn seed(&mut self) -> usize {
        let mut marked = 0;
        for func in &self.graph.functions {
            if func.explicit_level.is_some() && self.mark(func.id, OffloadReason::Explicit) {
                marked += 1;
            }
        }
        for site in &self.graph.uses {
            if !site.is_compute_use() {
                continue;
            }
            let Some(callee) = site.callee() else {
                continue;
            };
            let reason = OffloadReason::ComputeUse {
                caller: site.caller,
                site: site.id,
            };
            if self.mark(callee, reason) {
                marked += 1;
            }
        }
        marked
    }

    /// Mark `id` offload-callable. Returns false if it already was; the
    /// recorded reason is never replaced.
    pub fn mark(&mut self, id: FuncId, reason: OffloadReason) -> bool {
        if self.offload[id.index()] {
            return false;
        }
        tracing::trace!(function = %self.graph.function(id).name, ?reason, "marked offload-callable");
        self.offload[id.index()] = true;
        self.reasons[id.index()] = Some(reason);
        self.worklist.push(id);
        true
    }

    /// Propagate marks along callee edges until no change. Every marked
    /// function is revisited once, so calling this again on a stable set is a
    /// full pass that returns 0.
    pub fn propagate(&mut self) -> usize {
        for index in 0..self.offload.len() {
            if self.offload[index] {
                self.worklist.push(FuncId(index as u32));
            }
        }
        let mut marked = 0;
        while let Some(caller) = self.worklist.pop() {
            let callees: Vec<(FuncId, UseId)> = self.first_site[caller.index()]
                .iter()
                .map(|(&callee, &site)| (callee, site))
                .collect();
            for (callee, site) in callees {
                if self.mark(callee, OffloadReason::CalledFrom { caller, site }) {
                    marked += 1;
                }
            }
        }
        marked
    }

    pub fn is_offload_callable(&self, id: FuncId) -> bool {
        self.offload[id.index()]
    }

    pub fn finish(self) -> RoutineInfo {
        RoutineInfo {
            offload: self.offload,
            reasons: self.reasons,
        }
    }
}

// ── Implicit routine levels ─────────────────────────────────────────────────

/// Level an implicit routine directive carries for each function.
///
/// Explicit levels are reported unchanged. An offload-callable function
/// without one gets the coarsest effective level among its loops outside
/// compute constructs and the routine levels of functions it calls outside
/// compute constructs, or `Seq` if there are none. Host functions get `None`.
///
/// `loop_level(construct)` must return the loop's effective level, `None`
/// for `auto` loops.
pub fn implicit_routine_levels(
    graph: &ProgramGraph,
    routines: &RoutineInfo,
    loop_level: impl Fn(ConstructId) -> Option<ParallelismLevel>,
) -> Vec<Option<ParallelismLevel>> {
    let n = graph.functions.len();
    let mut levels: Vec<Option<ParallelismLevel>> = vec![None; n];
    // callers[g] = offload functions calling g outside compute constructs
    let mut callers: Vec<Vec<FuncId>> = vec![Vec::new(); n];
    let mut worklist = FuncWorklist::default();

    for func in &graph.functions {
        if !routines.is_offload_callable(func.id) {
            continue;
        }
        let own = graph
            .loops()
            .filter(|c| c.function == func.id && c.enclosing_region.is_none())
            .filter_map(|c| loop_level(c.id))
            .max();
        levels[func.id.index()] = Some(
            func.explicit_level
                .unwrap_or_else(|| own.unwrap_or(ParallelismLevel::Seq)),
        );
        worklist.push(func.id);
    }
    for site in &graph.uses {
        if site.kind != UseKind::Call || site.region.is_some() {
            continue;
        }
        if let (Some(caller), Some(callee)) = (site.caller, site.callee()) {
            if routines.is_offload_callable(caller) && !callers[callee.index()].contains(&caller) {
                callers[callee.index()].push(caller);
            }
        }
    }

    while let Some(callee) = worklist.pop() {
        let Some(level) = levels[callee.index()] else {
            continue;
        };
        for &caller in &callers[callee.index()] {
            if graph.function(caller).explicit_level.is_some() {
                continue;
            }
            let current = levels[caller.index()];
            if current.map_or(true, |c| c < level) {
                levels[caller.index()] = Some(level);
                worklist.push(caller);
            }
        }
    }
    levels
}

// ── Tests ───────────────────────────────────────────────────────────────────
