// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Also provides the one-call entry points `infer_source`
// (outline text) and `infer_events` (an event stream from an embedder).
//
// Preconditions: the program must be parsed before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; malformed event
//                streams surface as E0201 diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::ast::Program;
use crate::attrs::AttributeMap;
use crate::clause::ParallelismLevel;
use crate::diag::{codes, has_errors, Diagnostic};
use crate::events::Event;
use crate::graph::{GraphError, ProgramGraph};
use crate::id::ConstructId;
use crate::levels::{InferOptions, LoopLevels};
use crate::pass::{descriptor, required_passes, PassId};
use crate::routine::{implicit_routine_levels, RoutineInfo};

// ── Options ────────────────────────────────────────────────────────────────

/// Driver configuration, filled from CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub infer: InferOptions,
    /// Report per-pass timing at info level instead of debug.
    pub verbose: bool,
}

// ── Artifact storage ───────────────────────────────────────────────────────

pub struct Artifacts {
    pub program: Program,
    pub events: Option<Vec<Event>>,
    pub graph: Option<ProgramGraph>,
    pub routines: Option<RoutineInfo>,
    pub levels: Option<LoopLevels>,
    pub attrs: Option<AttributeMap>,
}

/// Provenance metadata for reproducible output.
///
/// `source_hash`: SHA-256 of the raw `.acc` source text.
/// `version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

/// Compute provenance from source text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            artifacts: Artifacts {
                program,
                events: None,
                graph: None,
                routines: None,
                levels: None,
                attrs: None,
            },
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pass produced error-level diagnostics; they are in
    /// `CompilationState.diagnostics`.
    #[error("pass '{failing_pass}' reported errors")]
    PassFailed { failing_pass: PassId },
    #[error("source has {count} syntax error(s)")]
    Syntax {
        count: usize,
        diagnostics: Vec<Diagnostic>,
    },
    /// A pass ran without producing its artifact; a runner bug.
    #[error("artifact of pass '{pass}' is missing")]
    MissingArtifact { pass: PassId },
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    let name = descriptor(pass_id).name;
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    if verbose {
        tracing::info!(pass = name, elapsed_ms, "pass complete");
    } else {
        tracing::debug!(pass = name, elapsed_ms, "pass complete");
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError::PassFailed {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn graph_error_diagnostic(err: &GraphError) -> Diagnostic {
    Diagnostic::error(err.span(), err.to_string())
        .with_code(codes::E0201)
        .with_hint("the event stream must be well nested and validated")
}

fn effective_level_of(
    graph: &ProgramGraph,
    levels: &LoopLevels,
    id: ConstructId,
) -> Option<ParallelismLevel> {
    let clauses = graph.construct(id).loop_clauses()?;
    clauses.explicit_level().or(levels.inferred(id))
}

/// Routine levels need final loop levels; the attribute map folds it all.
fn build_attributes(graph: &ProgramGraph, routines: &RoutineInfo, levels: &LoopLevels) -> AttributeMap {
    let routine_levels =
        implicit_routine_levels(graph, routines, |c| effective_level_of(graph, levels, c));
    AttributeMap::build(graph, routines, levels, &routine_levels)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let _span = tracing::debug_span!("pass", name = descriptor(pass_id).name).entered();
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Lower => {
                let result = crate::lower::lower(&state.artifacts.program);
                state.artifacts.events = Some(result.events);
                result.diagnostics
            }
            PassId::BuildGraph => {
                let events = state
                    .artifacts
                    .events
                    .as_ref()
                    .ok_or(PipelineError::MissingArtifact {
                        pass: PassId::Lower,
                    })?;
                match crate::graph::build_graph(events) {
                    Ok(graph) => {
                        state.artifacts.graph = Some(graph);
                        Vec::new()
                    }
                    Err(err) => vec![graph_error_diagnostic(&err)],
                }
            }
            PassId::PropagateRoutines => {
                let graph = state.artifacts.graph.as_ref().ok_or(
                    PipelineError::MissingArtifact {
                        pass: PassId::BuildGraph,
                    },
                )?;
                state.artifacts.routines = Some(crate::routine::propagate_routines(graph));
                Vec::new()
            }
            PassId::AssignLevels => {
                let (Some(graph), Some(routines)) =
                    (&state.artifacts.graph, &state.artifacts.routines)
                else {
                    return Err(PipelineError::MissingArtifact {
                        pass: PassId::PropagateRoutines,
                    });
                };
                let levels = crate::levels::assign_levels(graph, routines, options.infer);
                state.artifacts.attrs = Some(build_attributes(graph, routines, &levels));
                state.artifacts.levels = Some(levels);
                Vec::new()
            }
        };
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

// ── One-call entry points ──────────────────────────────────────────────────

/// Everything inference produces for one translation unit.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub graph: ProgramGraph,
    pub routines: RoutineInfo,
    pub levels: LoopLevels,
    pub attrs: AttributeMap,
    /// Warnings from lowering; errors abort instead.
    pub diagnostics: Vec<Diagnostic>,
    pub provenance: Provenance,
}

/// Parse, validate and run full inference over outline source text.
pub fn infer_source(source: &str, options: &PipelineOptions) -> Result<InferenceResult, PipelineError> {
    let parsed = crate::parser::parse(source);
    let program = match parsed.program {
        Some(program) if parsed.errors.is_empty() => program,
        _ => {
            let diagnostics: Vec<Diagnostic> = parsed
                .errors
                .iter()
                .map(|e| Diagnostic::error(*e.span(), e.to_string()))
                .collect();
            return Err(PipelineError::Syntax {
                count: diagnostics.len().max(1),
                diagnostics,
            });
        }
    };

    let mut state = CompilationState::new(program);
    state.provenance = Some(compute_provenance(source));
    run_pipeline(&mut state, PassId::AssignLevels, options, |_, _| {})?;

    let Artifacts {
        graph,
        routines,
        levels,
        attrs,
        ..
    } = state.artifacts;
    match (graph, routines, levels, attrs, state.provenance) {
        (Some(graph), Some(routines), Some(levels), Some(attrs), Some(provenance)) => {
            Ok(InferenceResult {
                graph,
                routines,
                levels,
                attrs,
                diagnostics: state.diagnostics,
                provenance,
            })
        }
        _ => Err(PipelineError::MissingArtifact {
            pass: PassId::AssignLevels,
        }),
    }
}

/// Run full inference over an event stream supplied directly by an embedder.
/// The stream is not clause-validated beyond `LoopClauses::check`.
pub fn infer_events(
    events: &[Event],
    options: InferOptions,
) -> Result<(ProgramGraph, AttributeMap), GraphError> {
    let graph = crate::graph::build_graph(events)?;
    let routines = crate::routine::propagate_routines(&graph);
    let levels = crate::levels::assign_levels(&graph, &routines, options);
    let attrs = build_attributes(&graph, &routines, &levels);
    Ok((graph, attrs))
}

// ── Tests ──────────────────────────────────────────────────────────────────
