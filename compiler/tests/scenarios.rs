// End-to-end inference scenarios.
//
// Each test feeds a small outline through `infer_source` and checks the
// offload-callable set and the loop levels it produces. Loops are looked up
// by label so the tests do not depend on construct numbering.

use accinfer::attrs::AttributeMap;
use accinfer::clause::ParallelismLevel::{self, Gang, Seq, Vector, Worker};
use accinfer::levels::InferOptions;
use accinfer::pipeline::{infer_source, InferenceResult, PipelineError, PipelineOptions};
use accinfer::routine::OffloadReason;

fn infer(source: &str) -> InferenceResult {
    infer_with(source, InferOptions::default())
}

fn infer_with(source: &str, infer: InferOptions) -> InferenceResult {
    let options = PipelineOptions {
        infer,
        verbose: false,
    };
    infer_source(source, &options)
        .unwrap_or_else(|e| panic!("inference failed: {e}\nsource:\n{source}"))
}

fn level(attrs: &AttributeMap, label: &str) -> Option<ParallelismLevel> {
    attrs
        .loop_by_label(label)
        .unwrap_or_else(|| panic!("no loop labelled '{label}'"))
        .effective_level
}

fn offload(attrs: &AttributeMap, name: &str) -> bool {
    attrs
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function '{name}'"))
        .offload_callable
}

fn routine(attrs: &AttributeMap, name: &str) -> Option<ParallelismLevel> {
    attrs
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function '{name}'"))
        .routine_level
}

// ── Loop levels ─────────────────────────────────────────────────────────────

#[test]
fn single_loop_in_region_is_gang() {
    let r = infer("fn main { parallel num_gangs(2) { l: loop { } } }");
    assert_eq!(level(&r.attrs, "l"), Some(Gang));
    let l = r.attrs.loop_by_label("l").unwrap();
    assert!(l.is_inferred());
    assert_eq!(l.region_count, Some(2));
}

#[test]
fn nested_loops_step_down_one_level() {
    let r = infer(
        "fn main { parallel { a: loop { b: loop { c: loop { d: loop { } } } } } }",
    );
    assert_eq!(level(&r.attrs, "a"), Some(Gang));
    assert_eq!(level(&r.attrs, "b"), Some(Worker));
    assert_eq!(level(&r.attrs, "c"), Some(Vector));
    assert_eq!(level(&r.attrs, "d"), Some(Seq));
}

#[test]
fn loops_inside_seq_are_seq() {
    let r = infer("fn main { kernels { outer: loop seq { inner: loop { } } } }");
    assert_eq!(level(&r.attrs, "outer"), Some(Seq));
    assert!(!r.attrs.loop_by_label("outer").unwrap().is_inferred());
    assert_eq!(level(&r.attrs, "inner"), Some(Seq));
}

#[test]
fn explicit_vector_leaves_only_seq_below() {
    let r = infer("fn main { parallel { v: loop vector { s: loop { } } } }");
    assert_eq!(level(&r.attrs, "v"), Some(Vector));
    assert_eq!(level(&r.attrs, "s"), Some(Seq));
}

#[test]
fn auto_loop_is_left_alone_and_passes_through() {
    let r = infer("fn main { parallel { a: loop auto { b: loop { } } } }");
    assert!(r.attrs.loop_by_label("a").unwrap().is_auto());
    assert_eq!(level(&r.attrs, "a"), None);
    assert_eq!(level(&r.attrs, "b"), Some(Gang));
}

#[test]
fn independent_is_not_a_level() {
    let r = infer("fn main { parallel { a: loop independent { b: loop independent { } } } }");
    assert_eq!(level(&r.attrs, "a"), Some(Gang));
    assert_eq!(level(&r.attrs, "b"), Some(Worker));
}

#[test]
fn sibling_loops_get_the_same_level() {
    let r = infer("fn main { parallel { a: loop { } b: loop { c: loop { } } } }");
    assert_eq!(level(&r.attrs, "a"), Some(Gang));
    assert_eq!(level(&r.attrs, "b"), Some(Gang));
    assert_eq!(level(&r.attrs, "c"), Some(Worker));
}

#[test]
fn a_nested_region_starts_again_at_gang() {
    let r = infer(
        "fn main { parallel { a: loop { b: loop { kernels { c: loop { } } } } } }",
    );
    assert_eq!(level(&r.attrs, "b"), Some(Worker));
    assert_eq!(level(&r.attrs, "c"), Some(Gang));
}

#[test]
fn host_loops_outside_regions_are_seq() {
    let r = infer("fn main { h: loop { parallel { g: loop { } } } }");
    assert_eq!(level(&r.attrs, "h"), Some(Seq));
    assert_eq!(level(&r.attrs, "g"), Some(Gang));
    assert!(!offload(&r.attrs, "main"));
}

// ── Routine propagation ─────────────────────────────────────────────────────

#[test]
fn callee_of_compute_region_inherits_worker_context() {
    let r = infer(
        "fn h { hl: loop { } }\n\
         fn g { call h; }\n\
         fn main { parallel { outer: loop { call g; } } }",
    );
    assert!(offload(&r.attrs, "g"));
    assert!(offload(&r.attrs, "h"));
    assert!(!offload(&r.attrs, "main"));
    assert_eq!(level(&r.attrs, "outer"), Some(Gang));
    assert_eq!(level(&r.attrs, "hl"), Some(Worker));
    assert_eq!(routine(&r.attrs, "h"), Some(Worker));
    assert_eq!(routine(&r.attrs, "g"), Some(Worker));
    assert_eq!(routine(&r.attrs, "main"), None);
}

#[test]
fn mutual_recursion_terminates_with_both_marked() {
    let r = infer(
        "fn q;\n\
         fn p { call q; }\n\
         fn q { call p; }\n\
         fn main { parallel { call p; } }",
    );
    assert!(offload(&r.attrs, "p"));
    assert!(offload(&r.attrs, "q"));
    assert_eq!(routine(&r.attrs, "p"), Some(Seq));
    assert_eq!(routine(&r.attrs, "q"), Some(Seq));
}

#[test]
fn recursive_loop_settles_at_seq() {
    let r = infer("fn r { l: loop { call r; } }\nfn main { parallel { call r; } }");
    assert_eq!(level(&r.attrs, "l"), Some(Seq));
}

#[test]
fn declarations_merge_across_the_file() {
    let r = infer(
        "fn g;\n\
         fn main { parallel { call g; } }\n\
         fn g;\n\
         fn g { call h; }\n\
         fn h;",
    );
    assert_eq!(r.graph.functions.len(), 3);
    assert!(r.graph.function_by_name("g").unwrap().is_defined());
    assert!(offload(&r.attrs, "g"));
    assert!(offload(&r.attrs, "h"));
    assert!(r.diagnostics.is_empty());
}

#[test]
fn sizeof_is_not_a_use() {
    let r = infer("fn g;\nfn main { parallel { sizeof g; } }");
    assert!(!offload(&r.attrs, "g"));
}

#[test]
fn address_taken_in_region_is_a_use() {
    let r = infer("fn g { l: loop { } }\nfn main { parallel { loop { addr g; } } }");
    assert!(offload(&r.attrs, "g"));
    assert!(matches!(
        r.attrs.function_by_name("g").unwrap().reason,
        Some(OffloadReason::ComputeUse { .. })
    ));
    // An address gives no calling context, so the routine runs sequentially.
    assert_eq!(level(&r.attrs, "l"), Some(Seq));
}

#[test]
fn uses_outside_regions_do_not_seed() {
    let r = infer("fn g;\nfn main { call g; addr g; }");
    assert!(!offload(&r.attrs, "g"));
}

#[test]
fn explicit_routine_directive_seeds_and_caps_level() {
    let r = infer(
        "routine(vector) fn v { a: loop { } }\n\
         fn w { call v; }\n",
    );
    assert!(offload(&r.attrs, "v"));
    assert!(!offload(&r.attrs, "w"));
    assert_eq!(level(&r.attrs, "a"), Some(Vector));
    assert_eq!(routine(&r.attrs, "v"), Some(Vector));
}

#[test]
fn explicit_routine_callees_follow_transitively() {
    let r = infer(
        "fn leaf;\n\
         fn mid { call leaf; }\n\
         routine(gang) fn top { loop { call mid; } }",
    );
    assert!(offload(&r.attrs, "mid"));
    assert!(offload(&r.attrs, "leaf"));
    assert_eq!(
        r.attrs.reason_chain(r.graph.function_by_name("leaf").unwrap().id),
        vec![
            "'leaf' is called from 'mid'".to_string(),
            "'mid' is called from 'top'".to_string(),
            "'top' has an explicit routine directive".to_string(),
        ]
    );
}

#[test]
fn calls_to_undeclared_names_are_external() {
    let r = infer("fn main { parallel { call puts; } }");
    assert_eq!(r.graph.externals.len(), 1);
    assert_eq!(r.graph.externals[0].name, "puts");
    assert!(!offload(&r.attrs, "main"));
    let codes: Vec<&str> = r.diagnostics.iter().filter_map(|d| d.code.map(|c| c.0)).collect();
    assert_eq!(codes, vec!["W0202"]);
}

// ── Order independence ──────────────────────────────────────────────────────

#[test]
fn finest_calling_context_wins_regardless_of_order() {
    let a = infer(
        "fn g { l: loop { } }\n\
         fn main { parallel { call g; x: loop { y: loop { call g; } } } }",
    );
    let b = infer(
        "fn g { l: loop { } }\n\
         fn main { parallel { x: loop { y: loop { call g; } } call g; } }",
    );
    assert_eq!(level(&a.attrs, "l"), Some(Vector));
    assert_eq!(level(&b.attrs, "l"), Some(Vector));
}

#[test]
fn definition_order_does_not_change_results() {
    let a = infer(
        "fn h { hl: loop { } }\n\
         fn g { gl: loop { call h; } }\n\
         fn main { parallel { call g; } }",
    );
    let b = infer(
        "fn main { parallel { call g; } }\n\
         fn g { gl: loop { call h; } }\n\
         fn h { hl: loop { } }",
    );
    for label in ["hl", "gl"] {
        assert_eq!(level(&a.attrs, label), level(&b.attrs, label), "loop {label}");
    }
    for name in ["g", "h", "main"] {
        assert_eq!(offload(&a.attrs, name), offload(&b.attrs, name), "fn {name}");
        assert_eq!(routine(&a.attrs, name), routine(&b.attrs, name), "fn {name}");
    }
    assert_eq!(level(&a.attrs, "gl"), Some(Gang));
    assert_eq!(level(&a.attrs, "hl"), Some(Worker));
}

// ── Options ─────────────────────────────────────────────────────────────────

#[test]
fn disabling_worker_skips_to_vector() {
    let r = infer_with(
        "fn main { parallel { a: loop { b: loop { c: loop { } } } } }",
        InferOptions {
            implicit_worker: false,
            implicit_vector: true,
        },
    );
    assert_eq!(level(&r.attrs, "a"), Some(Gang));
    assert_eq!(level(&r.attrs, "b"), Some(Vector));
    assert_eq!(level(&r.attrs, "c"), Some(Seq));
}

#[test]
fn disabling_both_leaves_gang_then_seq() {
    let r = infer_with(
        "fn main { parallel { a: loop { b: loop { } } } }",
        InferOptions {
            implicit_worker: false,
            implicit_vector: false,
        },
    );
    assert_eq!(level(&r.attrs, "a"), Some(Gang));
    assert_eq!(level(&r.attrs, "b"), Some(Seq));
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[test]
fn syntax_errors_are_reported() {
    let err = infer_source("fn main { parallel { loop } }", &PipelineOptions::default())
        .err()
        .expect("should fail");
    assert!(matches!(err, PipelineError::Syntax { .. }), "{err}");
}

#[test]
fn conflicting_loop_clauses_fail_lowering() {
    let err = infer_source(
        "fn main { parallel { loop gang seq { } } }",
        &PipelineOptions::default(),
    )
    .err()
    .expect("should fail");
    assert!(matches!(err, PipelineError::PassFailed { .. }), "{err}");
}
