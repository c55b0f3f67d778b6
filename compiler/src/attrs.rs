// attrs.rs — Read-only attribute map handed to code generation
//
// Folds the program graph, the routine propagation result and the loop level
// assignment into one queryable, serializable map: per function whether it
// is offload-callable, why, and its routine level; per loop its explicit
// clauses, inferred level, effective level and the matching resource count
// of its enclosing compute region.
//
// Preconditions: all inputs were computed from the same `ProgramGraph`.
// Postconditions: a loop has an effective level unless it is `auto`; a loop
//                 never carries both an explicit and an inferred level.
// Failure modes: JSON serialization errors surface as `serde_json::Error`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::clause::{LoopClauses, ParallelismLevel};
use crate::graph::{ConstructKind, ProgramGraph};
use crate::id::{ConstructId, FuncId};
use crate::levels::LoopLevels;
use crate::routine::{walk_reasons, OffloadReason, RoutineInfo};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionAttrs {
    pub id: FuncId,
    pub name: String,
    pub defined: bool,
    pub explicit_level: Option<ParallelismLevel>,
    pub offload_callable: bool,
    /// Level of the explicit or implicit routine directive. `None` for host
    /// functions.
    pub routine_level: Option<ParallelismLevel>,
    pub reason: Option<OffloadReason>,
    /// Ceiling the function body is entered at.
    pub entry_ceiling: ParallelismLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopAttrs {
    pub id: ConstructId,
    pub function: FuncId,
    pub label: Option<String>,
    pub explicit_clauses: LoopClauses,
    pub inferred_level: Option<ParallelismLevel>,
    pub effective_level: Option<ParallelismLevel>,
    pub auto: bool,
    /// Innermost lexically enclosing compute region.
    pub region: Option<ConstructId>,
    /// That region's resource count for `effective_level`.
    pub region_count: Option<u32>,
}

impl LoopAttrs {
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// Explicit level if written, else the inferred one. `None` iff `auto`.
    pub fn effective_level(&self) -> Option<ParallelismLevel> {
        self.effective_level
    }

    pub fn is_inferred(&self) -> bool {
        self.inferred_level.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeMap {
    pub functions: Vec<FunctionAttrs>,
    /// Loops only, in construct id order.
    pub loops: Vec<LoopAttrs>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    source_sha256: &'a str,
    functions: &'a [FunctionAttrs],
    loops: &'a [LoopAttrs],
}

// ── Construction ────────────────────────────────────────────────────────────

impl AttributeMap {
    pub fn build(
        graph: &ProgramGraph,
        routines: &RoutineInfo,
        levels: &LoopLevels,
        routine_levels: &[Option<ParallelismLevel>],
    ) -> Self {
        let functions = graph
            .functions
            .iter()
            .map(|f| FunctionAttrs {
                id: f.id,
                name: f.name.clone(),
                defined: f.is_defined(),
                explicit_level: f.explicit_level,
                offload_callable: routines.is_offload_callable(f.id),
                routine_level: routine_levels[f.id.index()],
                reason: routines.reason(f.id),
                entry_ceiling: levels.entry_ceiling(f.id),
            })
            .collect();

        let loops = graph
            .constructs
            .iter()
            .filter_map(|c| {
                let ConstructKind::Loop { label, clauses } = &c.kind else {
                    return None;
                };
                let inferred = levels.inferred(c.id);
                let effective = clauses.explicit_level().or(inferred);
                let region_count = c.enclosing_region.and_then(|r| {
                    let ConstructKind::Region { clauses, .. } = &graph.construct(r).kind else {
                        return None;
                    };
                    effective.and_then(|level| clauses.count_for(level))
                });
                Some(LoopAttrs {
                    id: c.id,
                    function: c.function,
                    label: label.clone(),
                    explicit_clauses: clauses.clone(),
                    inferred_level: inferred,
                    effective_level: effective,
                    auto: clauses.is_auto(),
                    region: c.enclosing_region,
                    region_count,
                })
            })
            .collect();

        Self { functions, loops }
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl AttributeMap {
    pub fn function(&self, id: FuncId) -> &FunctionAttrs {
        &self.functions[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionAttrs> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn is_offload_callable(&self, id: FuncId) -> bool {
        self.function(id).offload_callable
    }

    pub fn routine_level(&self, id: FuncId) -> Option<ParallelismLevel> {
        self.function(id).routine_level
    }

    /// `None` if `id` is not a loop construct.
    pub fn loop_attrs(&self, id: ConstructId) -> Option<&LoopAttrs> {
        self.loops
            .binary_search_by_key(&id, |l| l.id)
            .ok()
            .map(|i| &self.loops[i])
    }

    /// First loop carrying `label`, in program order.
    pub fn loop_by_label(&self, label: &str) -> Option<&LoopAttrs> {
        self.loops.iter().find(|l| l.label.as_deref() == Some(label))
    }

    pub fn effective_level(&self, id: ConstructId) -> Option<ParallelismLevel> {
        self.loop_attrs(id).and_then(LoopAttrs::effective_level)
    }

    pub fn is_auto(&self, id: ConstructId) -> bool {
        self.loop_attrs(id).is_some_and(LoopAttrs::is_auto)
    }

    pub fn loops_in(&self, function: FuncId) -> impl Iterator<Item = &LoopAttrs> {
        self.loops.iter().filter(move |l| l.function == function)
    }

    /// Human-readable chain of reasons, from `id` back to its seed.
    pub fn reason_chain(&self, id: FuncId) -> Vec<String> {
        walk_reasons(id, self.functions.len(), |f| self.function(f).reason)
            .into_iter()
            .map(|(f, reason)| format!("'{}' {}", self.function(f).name, self.describe(reason)))
            .collect()
    }

    fn describe(&self, reason: OffloadReason) -> String {
        match reason {
            OffloadReason::Explicit => "has an explicit routine directive".to_string(),
            OffloadReason::ComputeUse {
                caller: Some(caller),
                ..
            } => format!("is used in a compute construct in '{}'", self.function(caller).name),
            OffloadReason::ComputeUse { caller: None, .. } => {
                "is used in a compute construct".to_string()
            }
            OffloadReason::CalledFrom { caller, .. } => {
                format!("is called from '{}'", self.function(caller).name)
            }
        }
    }

    pub fn to_json(&self, source_sha256: &str) -> Result<String, serde_json::Error> {
        let report = JsonReport {
            version: env!("CARGO_PKG_VERSION"),
            source_sha256,
            functions: &self.functions,
            loops: &self.loops,
        };
        serde_json::to_string_pretty(&report)
    }
}

fn count_clause_name(level: ParallelismLevel) -> &'static str {
    match level {
        ParallelismLevel::Gang => "num_gangs",
        ParallelismLevel::Worker => "num_workers",
        ParallelismLevel::Vector => "vector_length",
        ParallelismLevel::Seq => "",
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            write!(f, "fn {}: ", func.name)?;
            match (func.offload_callable, func.routine_level, func.reason) {
                (true, Some(level), Some(reason)) => {
                    writeln!(f, "routine({level}), {}", self.describe(reason))?;
                }
                _ => writeln!(f, "host")?,
            }
        }
        for lp in &self.loops {
            write!(f, "loop {}", lp.id)?;
            if let Some(label) = &lp.label {
                write!(f, " {label}")?;
            }
            write!(f, " in {}: ", self.function(lp.function).name)?;
            match (lp.effective_level, lp.is_inferred()) {
                (None, _) => write!(f, "auto")?,
                (Some(level), true) => write!(f, "{level} (inferred)")?,
                (Some(level), false) => write!(f, "{level} (explicit)")?,
            }
            if let (Some(level), Some(count)) = (lp.effective_level, lp.region_count) {
                write!(f, ", {}({count})", count_clause_name(level))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
