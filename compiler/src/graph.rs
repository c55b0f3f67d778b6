// graph.rs — Program graph construction from the event stream
//
// Builds the arenas the analyses run on: one `FunctionEntity` per function
// identity (all declarations and definitions merged), one `Construct` per
// compute region or loop construct with its lexical nesting resolved, and
// one `UseSite` per function use with its callee resolved.
//
// Identity resolution runs as a pre-pass over the whole stream, so a use that
// precedes the callee's first declaration still finds it and no callee edge
// is ever attached to a stale declaration. Names that are never declared
// become opaque external entities.
//
// Preconditions: `events` is in program order.
// Postconditions: returns an immutable `ProgramGraph`; every construct has its
//                 enclosing construct, region and function resolved; callee
//                 sets contain every call/address-of target.
// Failure modes: malformed streams (unbalanced begin/end, nested definitions,
//                constructs outside functions, conflicting clauses or routine
//                levels) → `GraphError`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

use crate::ast::Span;
use crate::clause::{ClauseConflict, LoopClauses, ParallelismLevel, RegionClauses, RegionKind};
use crate::events::{Event, UseKind};
use crate::id::{ConstructId, ExternId, FuncId, IdAllocator, UseId};

// ── Public types ────────────────────────────────────────────────────────────

/// One function identity.
#[derive(Debug, Clone)]
pub struct FunctionEntity {
    pub id: FuncId,
    pub name: String,
    /// Level from an explicit routine directive on any declaration.
    pub explicit_level: Option<ParallelismLevel>,
    /// Spans of every declaration and definition, in program order.
    pub declarations: Vec<Span>,
    /// Spans of definitions only. Empty for prototypes.
    pub definitions: Vec<Span>,
    /// Outermost constructs of the body, in program order.
    pub body: Vec<ConstructId>,
    /// Uses in the body that are not inside any construct.
    pub body_uses: Vec<UseId>,
    /// Every function called or address-taken anywhere in the body.
    pub callees: BTreeSet<FuncId>,
}

impl FunctionEntity {
    pub fn is_defined(&self) -> bool {
        !self.definitions.is_empty()
    }
}

/// A name used in the program but never declared.
#[derive(Debug, Clone)]
pub struct ExternalEntity {
    pub id: ExternId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructKind {
    Region {
        kind: RegionKind,
        clauses: RegionClauses,
    },
    Loop {
        label: Option<String>,
        clauses: LoopClauses,
    },
}

/// A compute region or loop construct.
#[derive(Debug, Clone)]
pub struct Construct {
    pub id: ConstructId,
    pub kind: ConstructKind,
    /// Nearest lexically enclosing construct.
    pub parent: Option<ConstructId>,
    /// Nearest lexically enclosing compute region, excluding the construct itself.
    pub enclosing_region: Option<ConstructId>,
    pub function: FuncId,
    /// Directly nested constructs, in program order.
    pub children: Vec<ConstructId>,
    /// Uses directly inside this construct (not inside a child).
    pub uses: Vec<UseId>,
    pub span: Span,
}

impl Construct {
    pub fn is_loop(&self) -> bool {
        matches!(self.kind, ConstructKind::Loop { .. })
    }

    pub fn is_region(&self) -> bool {
        matches!(self.kind, ConstructKind::Region { .. })
    }

    pub fn loop_clauses(&self) -> Option<&LoopClauses> {
        match &self.kind {
            ConstructKind::Loop { clauses, .. } => Some(clauses),
            ConstructKind::Region { .. } => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            ConstructKind::Loop { label, .. } => label.as_deref(),
            ConstructKind::Region { .. } => None,
        }
    }

    /// The region whose body this construct's contents execute in: itself
    /// for a region, otherwise its enclosing region.
    pub fn region_scope(&self) -> Option<ConstructId> {
        if self.is_region() {
            Some(self.id)
        } else {
            self.enclosing_region
        }
    }
}

/// What a use site refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseTarget {
    Function(FuncId),
    External(ExternId),
}

/// One use of a function name.
#[derive(Debug, Clone)]
pub struct UseSite {
    pub id: UseId,
    /// Function whose definition contains the use; `None` at file scope.
    pub caller: Option<FuncId>,
    /// Innermost enclosing construct.
    pub construct: Option<ConstructId>,
    /// Innermost enclosing compute region, if any.
    pub region: Option<ConstructId>,
    pub target: UseTarget,
    pub kind: UseKind,
    pub span: Span,
}

impl UseSite {
    /// A call or address-of inside a compute region.
    pub fn is_compute_use(&self) -> bool {
        self.region.is_some() && self.kind.is_use()
    }

    pub fn callee(&self) -> Option<FuncId> {
        match self.target {
            UseTarget::Function(id) => Some(id),
            UseTarget::External(_) => None,
        }
    }
}

/// The complete, immutable program graph.
#[derive(Debug, Clone, Default)]
pub struct ProgramGraph {
    pub functions: Vec<FunctionEntity>,
    pub externals: Vec<ExternalEntity>,
    pub constructs: Vec<Construct>,
    pub uses: Vec<UseSite>,
}

/// A malformed event stream. Upstream validation guarantees these never
/// occur for lowered outlines; embedders feeding events directly can hit them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("'{found}' does not close the innermost open {expected}")]
    MismatchedEnd {
        expected: &'static str,
        found: &'static str,
        span: Span,
    },
    #[error("{what} is never closed")]
    Unterminated { what: &'static str, span: Span },
    #[error("definition of '{name}' is nested inside another definition")]
    NestedDefinition { name: String, span: Span },
    #[error("{what} outside of any function definition")]
    OutsideFunction { what: &'static str, span: Span },
    #[error("loop construct has conflicting clauses: {conflict}")]
    ConflictingClauses {
        conflict: ClauseConflict,
        span: Span,
    },
    #[error("function '{name}' has routine directives with levels '{first}' and '{second}'")]
    ConflictingRoutineLevels {
        name: String,
        first: ParallelismLevel,
        second: ParallelismLevel,
        span: Span,
    },
}

impl GraphError {
    pub fn span(&self) -> Span {
        match self {
            GraphError::MismatchedEnd { span, .. }
            | GraphError::Unterminated { span, .. }
            | GraphError::NestedDefinition { span, .. }
            | GraphError::OutsideFunction { span, .. }
            | GraphError::ConflictingClauses { span, .. }
            | GraphError::ConflictingRoutineLevels { span, .. } => *span,
        }
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl ProgramGraph {
    pub fn function(&self, id: FuncId) -> &FunctionEntity {
        &self.functions[id.index()]
    }

    pub fn construct(&self, id: ConstructId) -> &Construct {
        &self.constructs[id.index()]
    }

    pub fn use_site(&self, id: UseId) -> &UseSite {
        &self.uses[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<&FunctionEntity> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// First loop construct carrying `label`, in program order.
    pub fn loop_by_label(&self, label: &str) -> Option<&Construct> {
        self.constructs.iter().find(|c| c.label() == Some(label))
    }

    pub fn loops(&self) -> impl Iterator<Item = &Construct> {
        self.constructs.iter().filter(|c| c.is_loop())
    }

    pub fn regions(&self) -> impl Iterator<Item = &Construct> {
        self.constructs.iter().filter(|c| c.is_region())
    }

    pub fn target_name(&self, target: UseTarget) -> &str {
        match target {
            UseTarget::Function(id) => &self.function(id).name,
            UseTarget::External(id) => &self.externals[id.index()].name,
        }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Build the program graph from an event stream.
pub fn build_graph(events: &[Event]) -> Result<ProgramGraph, GraphError> {
    let mut builder = GraphBuilder::default();
    builder.resolve_identities(events)?;
    for event in events {
        builder.visit(event)?;
    }
    builder.finish()?;
    tracing::debug!(
        functions = builder.graph.functions.len(),
        externals = builder.graph.externals.len(),
        constructs = builder.graph.constructs.len(),
        uses = builder.graph.uses.len(),
        "built program graph"
    );
    Ok(builder.graph)
}

// ── Internal builder ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Open {
    Definition(FuncId, Span),
    Construct(ConstructId),
}

#[derive(Default)]
struct GraphBuilder {
    graph: ProgramGraph,
    ids: IdAllocator,
    func_by_name: HashMap<String, FuncId>,
    extern_by_name: HashMap<String, ExternId>,
    open: Vec<Open>,
    current_fn: Option<FuncId>,
}

impl GraphBuilder {
    /// Pre-pass: map every declared name to its canonical identity and merge
    /// routine levels across declarations.
    fn resolve_identities(&mut self, events: &[Event]) -> Result<(), GraphError> {
        for event in events {
            let (name, routine, span) = match event {
                Event::Declare {
                    name,
                    routine,
                    span,
                }
                | Event::DefineBegin {
                    name,
                    routine,
                    span,
                } => (name, *routine, *span),
                _ => continue,
            };
            let id = match self.func_by_name.get(name) {
                Some(&id) => id,
                None => {
                    let id = self.ids.alloc_func();
                    self.func_by_name.insert(name.clone(), id);
                    self.graph.functions.push(FunctionEntity {
                        id,
                        name: name.clone(),
                        explicit_level: None,
                        declarations: Vec::new(),
                        definitions: Vec::new(),
                        body: Vec::new(),
                        body_uses: Vec::new(),
                        callees: BTreeSet::new(),
                    });
                    id
                }
            };
            let entity = &mut self.graph.functions[id.index()];
            entity.declarations.push(span);
            match (entity.explicit_level, routine) {
                (Some(first), Some(second)) if first != second => {
                    return Err(GraphError::ConflictingRoutineLevels {
                        name: name.clone(),
                        first,
                        second,
                        span,
                    });
                }
                (None, Some(level)) => entity.explicit_level = Some(level),
                _ => {}
            }
        }
        Ok(())
    }

    fn visit(&mut self, event: &Event) -> Result<(), GraphError> {
        match event {
            Event::Declare { .. } => Ok(()),
            Event::DefineBegin { name, span, .. } => {
                if self.current_fn.is_some() {
                    return Err(GraphError::NestedDefinition {
                        name: name.clone(),
                        span: *span,
                    });
                }
                let id = self.func_by_name[name];
                self.graph.functions[id.index()].definitions.push(*span);
                self.current_fn = Some(id);
                self.open.push(Open::Definition(id, *span));
                Ok(())
            }
            Event::DefineEnd { span } => {
                match self.open.last() {
                    Some(Open::Definition(..)) => {
                        self.open.pop();
                        self.current_fn = None;
                        Ok(())
                    }
                    other => Err(self.mismatched(other.copied(), "end define", *span)),
                }
            }
            Event::RegionBegin {
                kind,
                clauses,
                span,
            } => self.open_construct(
                ConstructKind::Region {
                    kind: *kind,
                    clauses: *clauses,
                },
                "compute construct",
                *span,
            ),
            Event::LoopBegin {
                label,
                clauses,
                span,
            } => {
                clauses
                    .check()
                    .map_err(|conflict| GraphError::ConflictingClauses {
                        conflict,
                        span: *span,
                    })?;
                self.open_construct(
                    ConstructKind::Loop {
                        label: label.clone(),
                        clauses: clauses.clone(),
                    },
                    "loop construct",
                    *span,
                )
            }
            Event::RegionEnd { span } => self.close_construct(false, "end region", *span),
            Event::LoopEnd { span } => self.close_construct(true, "end loop", *span),
            Event::Use { callee, kind, span } => {
                self.add_use(callee, *kind, *span);
                Ok(())
            }
        }
    }

    fn open_construct(
        &mut self,
        kind: ConstructKind,
        what: &'static str,
        span: Span,
    ) -> Result<(), GraphError> {
        let Some(function) = self.current_fn else {
            return Err(GraphError::OutsideFunction { what, span });
        };
        let parent = self.innermost_construct();
        let enclosing_region = parent.and_then(|p| self.graph.construct(p).region_scope());
        let id = self.ids.alloc_construct();
        self.graph.constructs.push(Construct {
            id,
            kind,
            parent,
            enclosing_region,
            function,
            children: Vec::new(),
            uses: Vec::new(),
            span,
        });
        match parent {
            Some(p) => self.graph.constructs[p.index()].children.push(id),
            None => self.graph.functions[function.index()].body.push(id),
        }
        self.open.push(Open::Construct(id));
        Ok(())
    }

    fn close_construct(
        &mut self,
        is_loop: bool,
        found: &'static str,
        span: Span,
    ) -> Result<(), GraphError> {
        match self.open.last().copied() {
            Some(Open::Construct(id)) if self.graph.construct(id).is_loop() == is_loop => {
                self.open.pop();
                Ok(())
            }
            other => Err(self.mismatched(other, found, span)),
        }
    }

    fn add_use(&mut self, callee: &str, kind: UseKind, span: Span) {
        let target = match self.func_by_name.get(callee) {
            Some(&id) => UseTarget::Function(id),
            None => UseTarget::External(self.extern_id(callee)),
        };
        let construct = self.innermost_construct();
        let region = construct.and_then(|c| self.graph.construct(c).region_scope());
        let id = self.ids.alloc_use();
        self.graph.uses.push(UseSite {
            id,
            caller: self.current_fn,
            construct,
            region,
            target,
            kind,
            span,
        });
        match construct {
            Some(c) => self.graph.constructs[c.index()].uses.push(id),
            None => {
                if let Some(f) = self.current_fn {
                    self.graph.functions[f.index()].body_uses.push(id);
                }
            }
        }
        if let (Some(caller), UseTarget::Function(target), true) =
            (self.current_fn, target, kind.is_use())
        {
            self.graph.functions[caller.index()].callees.insert(target);
        }
    }

    fn extern_id(&mut self, name: &str) -> ExternId {
        if let Some(&id) = self.extern_by_name.get(name) {
            return id;
        }
        let id = self.ids.alloc_extern();
        self.extern_by_name.insert(name.to_string(), id);
        self.graph.externals.push(ExternalEntity {
            id,
            name: name.to_string(),
        });
        id
    }

    fn innermost_construct(&self) -> Option<ConstructId> {
        match self.open.last() {
            Some(Open::Construct(id)) => Some(*id),
            _ => None,
        }
    }

    fn mismatched(&self, open: Option<Open>, found: &'static str, span: Span) -> GraphError {
        let expected = match open {
            None => "construct or definition (none is open)",
            Some(Open::Definition(..)) => "definition",
            Some(Open::Construct(id)) if self.graph.construct(id).is_loop() => "loop construct",
            Some(Open::Construct(_)) => "compute construct",
        };
        GraphError::MismatchedEnd {
            expected,
            found,
            span,
        }
    }

    fn finish(&self) -> Result<(), GraphError> {
        match self.open.last() {
            None => Ok(()),
            Some(Open::Definition(_, span)) => Err(GraphError::Unterminated {
                what: "definition",
                span: *span,
            }),
            Some(Open::Construct(id)) => {
                let c = self.graph.construct(*id);
                Err(GraphError::Unterminated {
                    what: if c.is_loop() {
                        "loop construct"
                    } else {
                        "compute construct"
                    },
                    span: c.span,
                })
            }
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ProgramGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ProgramGraph ({} functions, {} externals, {} constructs, {} uses)",
            self.functions.len(),
            self.externals.len(),
            self.constructs.len(),
            self.uses.len()
        )?;
        for func in &self.functions {
            write!(
                f,
                "  fn {}: {} declarations, {}",
                func.name,
                func.declarations.len(),
                if func.is_defined() { "defined" } else { "prototype" }
            )?;
            if let Some(level) = func.explicit_level {
                write!(f, ", routine({level})")?;
            }
            if !func.callees.is_empty() {
                let names: Vec<&str> = func
                    .callees
                    .iter()
                    .map(|id| self.function(*id).name.as_str())
                    .collect();
                write!(f, ", callees [{}]", names.join(", "))?;
            }
            writeln!(f)?;
            for &root in &func.body {
                self.fmt_construct(f, root, 2)?;
            }
        }
        for ext in &self.externals {
            writeln!(f, "  extern {}", ext.name)?;
        }
        Ok(())
    }
}

impl ProgramGraph {
    fn fmt_construct(&self, f: &mut fmt::Formatter<'_>, id: ConstructId, depth: usize) -> fmt::Result {
        let c = self.construct(id);
        let indent = "  ".repeat(depth);
        match &c.kind {
            ConstructKind::Region { kind, clauses } => {
                write!(f, "{indent}{id} {kind}")?;
                if *clauses != RegionClauses::default() {
                    write!(f, " {clauses}")?;
                }
            }
            ConstructKind::Loop { label, clauses } => {
                write!(f, "{indent}{id} ")?;
                if let Some(label) = label {
                    write!(f, "{label}: ")?;
                }
                write!(f, "loop")?;
                if !clauses.is_empty() {
                    write!(f, " {clauses}")?;
                }
            }
        }
        writeln!(f)?;
        for &child in &c.children {
            self.fmt_construct(f, child, depth + 1)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
