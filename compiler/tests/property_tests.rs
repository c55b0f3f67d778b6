// Property-based tests for inference invariants.
//
// Programs are generated as small outline trees, rendered to source text and
// run through the full pipeline. Four categories:
// 1. Order independence: permuting functions and sibling statements leaves
//    every offload mark, routine level and loop level unchanged
// 2. Propagation: the offload set is the callee closure of the seeds, and a
//    second propagation round changes nothing
// 3. Monotonicity: extra seeds never unmark a function
// 4. Level rules: inferred levels step down one level per nesting, never
//    exceed an explicit outer level, and `seq` forces `seq` below it
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::{BTreeMap, HashSet, VecDeque};

use accinfer::clause::ParallelismLevel;
use accinfer::graph::ProgramGraph;
use accinfer::id::FuncId;
use accinfer::pipeline::{infer_source, InferenceResult, PipelineOptions};
use accinfer::routine::{OffloadReason, RoutinePropagator};
use proptest::prelude::*;

// ── Generated outlines ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum GenClause {
    None,
    Gang,
    Worker,
    Vector,
    Seq,
    Auto,
    Independent,
}

#[derive(Debug, Clone, Copy)]
enum GenUse {
    Call,
    Addr,
    Sizeof,
}

#[derive(Debug, Clone)]
enum GenStmt {
    Loop {
        clause: GenClause,
        label: usize,
        body: Vec<GenStmt>,
    },
    Region(Vec<GenStmt>),
    /// Target index; one past the last function names an undeclared external.
    Use(GenUse, usize),
}

#[derive(Debug, Clone)]
struct GenFunc {
    routine: Option<ParallelismLevel>,
    body: Vec<GenStmt>,
}

#[derive(Debug, Clone)]
struct GenProgram {
    funcs: Vec<GenFunc>,
}

fn arb_level() -> impl Strategy<Value = ParallelismLevel> {
    prop_oneof![
        Just(ParallelismLevel::Gang),
        Just(ParallelismLevel::Worker),
        Just(ParallelismLevel::Vector),
        Just(ParallelismLevel::Seq),
    ]
}

fn arb_clause() -> impl Strategy<Value = GenClause> {
    prop_oneof![
        4 => Just(GenClause::None),
        1 => Just(GenClause::Gang),
        1 => Just(GenClause::Worker),
        1 => Just(GenClause::Vector),
        1 => Just(GenClause::Seq),
        1 => Just(GenClause::Auto),
        1 => Just(GenClause::Independent),
    ]
}

fn arb_stmt(targets: usize) -> impl Strategy<Value = GenStmt> {
    let leaf = (
        prop_oneof![
            3 => Just(GenUse::Call),
            1 => Just(GenUse::Addr),
            1 => Just(GenUse::Sizeof),
        ],
        0..targets,
    )
        .prop_map(|(kind, target)| GenStmt::Use(kind, target));
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            3 => (arb_clause(), prop::collection::vec(inner.clone(), 0..3)).prop_map(
                |(clause, body)| GenStmt::Loop {
                    clause,
                    label: 0,
                    body,
                }
            ),
            1 => prop::collection::vec(inner, 0..3).prop_map(GenStmt::Region),
        ]
    })
}

fn arb_program() -> impl Strategy<Value = GenProgram> {
    (1..5usize)
        .prop_flat_map(|n| {
            prop::collection::vec(
                (
                    prop::option::weighted(0.2, arb_level()),
                    prop::collection::vec(arb_stmt(n + 1), 0..4),
                ),
                n,
            )
        })
        .prop_map(|funcs| {
            let mut program = GenProgram {
                funcs: funcs
                    .into_iter()
                    .map(|(routine, body)| GenFunc { routine, body })
                    .collect(),
            };
            let mut next = 0;
            for func in &mut program.funcs {
                number_loops(&mut func.body, &mut next);
            }
            program
        })
}

fn number_loops(stmts: &mut [GenStmt], next: &mut usize) {
    for stmt in stmts {
        match stmt {
            GenStmt::Loop { label, body, .. } => {
                *label = *next;
                *next += 1;
                number_loops(body, next);
            }
            GenStmt::Region(body) => number_loops(body, next),
            GenStmt::Use(..) => {}
        }
    }
}

/// Rotate every list in the program (functions and sibling statements).
/// Returns the rotated program and, per position, the original index of the
/// function now at that position, so names stay attached to their bodies.
fn rotate(program: &GenProgram, by: usize) -> (GenProgram, Vec<usize>) {
    fn rotate_stmts(stmts: &[GenStmt], by: usize) -> Vec<GenStmt> {
        let mut out: Vec<GenStmt> = stmts
            .iter()
            .map(|s| match s {
                GenStmt::Loop {
                    clause,
                    label,
                    body,
                } => GenStmt::Loop {
                    clause: *clause,
                    label: *label,
                    body: rotate_stmts(body, by),
                },
                GenStmt::Region(body) => GenStmt::Region(rotate_stmts(body, by)),
                GenStmt::Use(kind, target) => GenStmt::Use(*kind, *target),
            })
            .collect();
        if !out.is_empty() {
            let k = by % out.len();
            out.rotate_left(k);
        }
        out
    }

    let mut funcs: Vec<(usize, GenFunc)> = program
        .funcs
        .iter()
        .map(|f| GenFunc {
            routine: f.routine,
            body: rotate_stmts(&f.body, by),
        })
        .enumerate()
        .collect();
    let k = by % funcs.len();
    funcs.rotate_left(k);
    let order = funcs.iter().map(|(i, _)| *i).collect();
    let program = GenProgram {
        funcs: funcs.into_iter().map(|(_, f)| f).collect(),
    };
    (program, order)
}

fn render(program: &GenProgram, order: &[usize]) -> String {
    fn render_stmts(stmts: &[GenStmt], n: usize, out: &mut String) {
        for stmt in stmts {
            match stmt {
                GenStmt::Loop {
                    clause,
                    label,
                    body,
                } => {
                    let clause = match clause {
                        GenClause::None => "",
                        GenClause::Gang => " gang",
                        GenClause::Worker => " worker",
                        GenClause::Vector => " vector",
                        GenClause::Seq => " seq",
                        GenClause::Auto => " auto",
                        GenClause::Independent => " independent",
                    };
                    out.push_str(&format!("l{label}: loop{clause} {{ "));
                    render_stmts(body, n, out);
                    out.push_str("} ");
                }
                GenStmt::Region(body) => {
                    out.push_str("parallel { ");
                    render_stmts(body, n, out);
                    out.push_str("} ");
                }
                GenStmt::Use(kind, target) => {
                    let kw = match kind {
                        GenUse::Call => "call",
                        GenUse::Addr => "addr",
                        GenUse::Sizeof => "sizeof",
                    };
                    if *target < n {
                        out.push_str(&format!("{kw} f{target}; "));
                    } else {
                        out.push_str(&format!("{kw} ext; "));
                    }
                }
            }
        }
    }

    let n = program.funcs.len();
    let mut out = String::new();
    for (pos, func) in program.funcs.iter().enumerate() {
        let name = order[pos];
        if let Some(level) = func.routine {
            out.push_str(&format!("routine({level}) "));
        }
        out.push_str(&format!("fn f{name} {{ "));
        render_stmts(&func.body, n, &mut out);
        out.push_str("}\n");
    }
    out
}

fn identity_order(program: &GenProgram) -> Vec<usize> {
    (0..program.funcs.len()).collect()
}

fn infer(source: &str) -> InferenceResult {
    infer_source(source, &PipelineOptions::default())
        .unwrap_or_else(|e| panic!("inference failed: {e}\nsource:\n{source}"))
}

type FuncSummary = BTreeMap<String, (bool, Option<ParallelismLevel>, ParallelismLevel)>;
type LoopSummary = BTreeMap<String, (Option<ParallelismLevel>, bool)>;

/// Name-keyed view of the results, independent of id numbering.
fn summarize(result: &InferenceResult) -> (FuncSummary, LoopSummary) {
    let funcs = result
        .attrs
        .functions
        .iter()
        .map(|f| {
            (
                f.name.clone(),
                (f.offload_callable, f.routine_level, f.entry_ceiling),
            )
        })
        .collect();
    let loops = result
        .attrs
        .loops
        .iter()
        .map(|l| {
            (
                l.label.clone().unwrap_or_default(),
                (l.effective_level, l.is_auto()),
            )
        })
        .collect();
    (funcs, loops)
}

/// Offload set computed directly: seeds, then breadth-first over callees.
fn reference_offload(graph: &ProgramGraph) -> Vec<bool> {
    let mut marked = vec![false; graph.functions.len()];
    let mut queue = VecDeque::new();
    for f in &graph.functions {
        if f.explicit_level.is_some() {
            queue.push_back(f.id);
        }
    }
    for site in &graph.uses {
        if site.is_compute_use() {
            if let Some(callee) = site.callee() {
                queue.push_back(callee);
            }
        }
    }
    while let Some(f) = queue.pop_front() {
        if std::mem::replace(&mut marked[f.index()], true) {
            continue;
        }
        queue.extend(graph.function(f).callees.iter().copied());
    }
    marked
}

// ── Category 1: Order independence ──────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn permuting_siblings_and_functions_keeps_results(program in arb_program(), by in 1..4usize) {
        let original = render(&program, &identity_order(&program));

        let (rotated, order) = rotate(&program, by);
        let permuted = render(&rotated, &order);

        let a = summarize(&infer(&original));
        let b = summarize(&infer(&permuted));
        prop_assert_eq!(a, b, "\noriginal:\n{}\npermuted:\n{}", original, permuted);
    }

    #[test]
    fn inference_is_deterministic(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let a = infer(&source);
        let b = infer(&source);
        prop_assert_eq!(a.attrs.to_string(), b.attrs.to_string());
        prop_assert_eq!(
            a.attrs.to_json("0").expect("json"),
            b.attrs.to_json("0").expect("json")
        );
    }
}

// ── Category 2: Propagation ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn offload_set_is_callee_closure_of_seeds(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        let expected = reference_offload(&result.graph);
        for f in &result.graph.functions {
            prop_assert_eq!(
                result.routines.is_offload_callable(f.id),
                expected[f.id.index()],
                "function {} in\n{}", f.name, source
            );
        }
    }

    #[test]
    fn second_propagation_changes_nothing(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        let mut propagator = RoutinePropagator::new(&result.graph);
        propagator.seed();
        propagator.propagate();
        prop_assert_eq!(propagator.propagate(), 0);
        prop_assert_eq!(propagator.seed(), 0);
    }

    #[test]
    fn every_offload_function_has_a_reason_chain_to_a_seed(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        for id in result.routines.offload_functions() {
            let chain = result.routines.reason_chain(id);
            prop_assert!(!chain.is_empty());
            let (_, last) = chain[chain.len() - 1];
            prop_assert!(
                !matches!(last, OffloadReason::CalledFrom { .. }),
                "chain for {} ends in a call edge", result.graph.function(id).name
            );
            for (f, _) in &chain {
                prop_assert!(result.routines.is_offload_callable(*f));
            }
        }
    }
}

// ── Category 3: Monotonicity ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn extra_seeds_only_grow_the_offload_set(
        program in arb_program(),
        extra in prop::collection::vec(0..8usize, 0..3),
    ) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        let graph = &result.graph;

        let mut propagator = RoutinePropagator::new(graph);
        propagator.seed();
        propagator.propagate();
        let before: HashSet<FuncId> = graph
            .functions
            .iter()
            .map(|f| f.id)
            .filter(|&id| propagator.is_offload_callable(id))
            .collect();

        for pick in extra {
            let id = graph.functions[pick % graph.functions.len()].id;
            propagator.mark(id, OffloadReason::Explicit);
        }
        propagator.propagate();
        let info = propagator.finish();

        for id in &before {
            prop_assert!(info.is_offload_callable(*id));
        }
        // The grown set is still closed under callee edges.
        for id in info.offload_functions() {
            for callee in &graph.function(id).callees {
                prop_assert!(info.is_offload_callable(*callee));
            }
        }
    }
}

// ── Category 4: Level rules ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn inferred_levels_follow_nesting(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        let graph = &result.graph;
        let attrs = &result.attrs;

        for lp in &attrs.loops {
            // Exactly one of: auto, or a single effective level.
            prop_assert_eq!(lp.is_auto(), lp.effective_level.is_none());
            let Some(level) = lp.inferred_level else { continue };
            prop_assert!(!lp.is_auto());
            prop_assert!(lp.explicit_clauses.explicit_level().is_none());

            let construct = graph.construct(lp.id);
            match construct.parent.map(|p| graph.construct(p)) {
                Some(parent) if parent.is_region() => {
                    prop_assert_eq!(level, ParallelismLevel::Gang, "\n{}", source);
                }
                Some(parent) => {
                    let pa = attrs.loop_attrs(parent.id).expect("parent loop");
                    match (pa.inferred_level, pa.explicit_clauses.explicit_level()) {
                        (Some(outer), _) => {
                            prop_assert_eq!(level, outer.below(), "\n{}", source);
                        }
                        (None, Some(outer)) => {
                            prop_assert!(level <= outer.below(), "\n{}", source);
                        }
                        (None, None) => {}
                    }
                }
                None => {
                    prop_assert_eq!(
                        level,
                        attrs.function(construct.function).entry_ceiling,
                        "\n{}", source
                    );
                }
            }
        }
    }

    #[test]
    fn seq_forces_seq_below_it(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        let graph = &result.graph;
        let attrs = &result.attrs;

        for lp in &attrs.loops {
            let Some(level) = lp.inferred_level else { continue };
            // Walk outward until a compute construct or the function body.
            let mut cursor = graph.construct(lp.id).parent;
            while let Some(id) = cursor {
                let c = graph.construct(id);
                if c.is_region() {
                    break;
                }
                if attrs.effective_level(id) == Some(ParallelismLevel::Seq) {
                    prop_assert_eq!(level, ParallelismLevel::Seq, "\n{}", source);
                    break;
                }
                cursor = c.parent;
            }
        }
    }

    #[test]
    fn host_functions_run_their_loops_sequentially(program in arb_program()) {
        let source = render(&program, &identity_order(&program));
        let result = infer(&source);
        for lp in &result.attrs.loops {
            let host = !result.attrs.is_offload_callable(lp.function);
            if host && lp.region.is_none() {
                if let Some(level) = lp.inferred_level {
                    prop_assert_eq!(level, ParallelismLevel::Seq, "\n{}", source);
                }
                prop_assert_eq!(result.attrs.routine_level(lp.function), None);
            }
        }
    }
}
