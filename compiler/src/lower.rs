// lower.rs — Lower the outline AST into the typed event stream
//
// Walks items and statements in source order and emits the matching
// `Event`s. This is also where clause validation happens: misplaced clauses,
// conflicting loop clauses, bad resource counts and disagreeing routine
// levels are reported here so that graph construction only ever sees a
// consistent stream.
//
// Preconditions: `program` is a parsed AST.
// Postconditions: returns the event stream in program order plus diagnostics;
//                 if no error diagnostic is present the stream is well nested
//                 and every clause set passes `LoopClauses::check`.
// Failure modes: clause problems produce `Diagnostic` errors (E01xx); uses of
//                undeclared names produce W0202 warnings.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::clause::{LoopClause, LoopClauses, ParallelismLevel, RegionClauses};
use crate::diag::{codes, Diagnostic};
use crate::events::{Event, UseKind};

/// Result of lowering.
#[derive(Debug)]
pub struct LowerResult {
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower a parsed outline into its event stream.
pub fn lower(program: &Program) -> LowerResult {
    let mut ctx = LowerCtx {
        declared: program.items.iter().map(|i| i.name.name.clone()).collect(),
        ..Default::default()
    };
    for item in &program.items {
        ctx.lower_item(item);
    }
    tracing::debug!(
        events = ctx.events.len(),
        diagnostics = ctx.diagnostics.len(),
        "lowered outline"
    );
    LowerResult {
        events: ctx.events,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

#[derive(Default)]
struct LowerCtx {
    events: Vec<Event>,
    diagnostics: Vec<Diagnostic>,
    /// First routine directive seen per function name.
    routine_levels: HashMap<String, (ParallelismLevel, Span)>,
    /// Every name declared or defined anywhere in the outline.
    declared: HashSet<String>,
}

impl LowerCtx {
    fn lower_item(&mut self, item: &Item) {
        let routine = item.routine.as_ref().map(|attr| {
            self.check_routine_level(&item.name.name, attr);
            attr.level
        });
        let name = item.name.name.clone();
        match &item.body {
            None => self.events.push(Event::Declare {
                name,
                routine,
                span: item.span,
            }),
            Some(body) => {
                self.events.push(Event::DefineBegin {
                    name,
                    routine,
                    span: item.span,
                });
                self.lower_block(body);
                self.events.push(Event::DefineEnd { span: body.span });
            }
        }
    }

    fn check_routine_level(&mut self, name: &str, attr: &RoutineAttr) {
        match self.routine_levels.get(name) {
            Some(&(level, _)) if level == attr.level => {}
            Some(&(level, span)) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        attr.span,
                        format!(
                            "routine directive for '{}' specifies '{}' but a previous one specifies '{}'",
                            name, attr.level, level
                        ),
                    )
                    .with_code(codes::E0106)
                    .with_related(span, "previous routine directive here"),
                );
            }
            None => {
                self.routine_levels
                    .insert(name.to_string(), (attr.level, attr.span));
            }
        }
    }

    fn lower_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Compute(region) => {
                let clauses = self.region_clauses(&region.clauses);
                self.events.push(Event::RegionBegin {
                    kind: region.kind,
                    clauses,
                    span: stmt.span,
                });
                self.lower_block(&region.body);
                self.events.push(Event::RegionEnd {
                    span: region.body.span,
                });
            }
            StmtKind::Loop(lp) => {
                let clauses = self.loop_clauses(&lp.clauses, stmt.span);
                self.events.push(Event::LoopBegin {
                    label: lp.label.as_ref().map(|l| l.name.clone()),
                    clauses,
                    span: stmt.span,
                });
                self.lower_block(&lp.body);
                self.events.push(Event::LoopEnd { span: lp.body.span });
            }
            StmtKind::Use(u) => {
                let kind = match u.kind {
                    UseKeyword::Call => UseKind::Call,
                    UseKeyword::Addr => UseKind::AddressOf,
                    UseKeyword::Sizeof => UseKind::Reference,
                };
                if !self.declared.contains(&u.target.name) {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            u.target.span,
                            format!("'{}' is never declared; treated as external", u.target.name),
                        )
                        .with_code(codes::W0202),
                    );
                }
                self.events.push(Event::Use {
                    callee: u.target.name.clone(),
                    kind,
                    span: u.target.span,
                });
            }
            StmtKind::Block(block) => self.lower_block(block),
        }
    }

    fn region_clauses(&mut self, clauses: &[Clause]) -> RegionClauses {
        let mut out = RegionClauses::default();
        for clause in clauses {
            let (slot, value) = match clause.kind {
                ClauseKind::NumGangs(n) => (&mut out.num_gangs, n),
                ClauseKind::NumWorkers(n) => (&mut out.num_workers, n),
                ClauseKind::VectorLength(n) => (&mut out.vector_length, n),
                other => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            clause.span,
                            format!("'{}' clause is not allowed on a compute construct", other.name()),
                        )
                        .with_code(codes::E0101)
                        .with_hint("place level clauses on a loop construct inside the region"),
                    );
                    continue;
                }
            };
            if value == 0 {
                self.diagnostics.push(
                    Diagnostic::error(
                        clause.span,
                        format!("'{}' argument must be positive", clause.kind.name()),
                    )
                    .with_code(codes::E0105),
                );
                continue;
            }
            if slot.is_some() {
                self.diagnostics.push(
                    Diagnostic::error(
                        clause.span,
                        format!("duplicated '{}' clause", clause.kind.name()),
                    )
                    .with_code(codes::E0104),
                );
                continue;
            }
            *slot = Some(value);
        }
        out
    }

    fn loop_clauses(&mut self, clauses: &[Clause], loop_span: Span) -> LoopClauses {
        let mut out = LoopClauses::new();
        for clause in clauses {
            let lc = match clause.kind {
                ClauseKind::Gang => LoopClause::Gang,
                ClauseKind::Worker => LoopClause::Worker,
                ClauseKind::Vector => LoopClause::Vector,
                ClauseKind::Seq => LoopClause::Seq,
                ClauseKind::Auto => LoopClause::Auto,
                ClauseKind::Independent => LoopClause::Independent,
                other => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            clause.span,
                            format!("'{}' clause is not allowed on a loop construct", other.name()),
                        )
                        .with_code(codes::E0102)
                        .with_hint("resource clauses belong on the enclosing compute construct"),
                    );
                    continue;
                }
            };
            if !out.insert(lc) {
                self.diagnostics.push(
                    Diagnostic::warning(clause.span, format!("duplicated '{}' clause", lc))
                        .with_code(codes::W0201),
                );
            }
        }
        if let Err(conflict) = out.check() {
            self.diagnostics
                .push(Diagnostic::error(loop_span, conflict.to_string()).with_code(codes::E0103));
        }
        out
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
