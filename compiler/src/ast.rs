// AST node types for .acc directive outline files.
//
// Mirrors the outline grammar: function items (optionally carrying a routine
// directive), and statements for compute regions, loop constructs and
// function uses. Every node carries a `SimpleSpan` for error reporting.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::clause::{ParallelismLevel, RegionKind};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete outline: a sequence of function items.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

// ── item: routine_attr? 'fn' IDENT (';' | block) ──

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub routine: Option<RoutineAttr>,
    pub name: Ident,
    /// `None` for a declaration, `Some` for a definition.
    pub body: Option<Block>,
    pub span: Span,
}

/// `routine(level)` written before a function item.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineAttr {
    pub level: ParallelismLevel,
    pub span: Span,
}

// ── block: '{' stmt* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `parallel clause* block` / `kernels clause* block`
    Compute(ComputeStmt),
    /// `(IDENT ':')? 'loop' clause* block`
    Loop(LoopStmt),
    /// `call IDENT ';'` / `addr IDENT ';'` / `sizeof IDENT ';'`
    Use(UseStmt),
    /// A plain nested block.
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeStmt {
    pub kind: RegionKind,
    pub clauses: Vec<Clause>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStmt {
    pub label: Option<Ident>,
    pub clauses: Vec<Clause>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseStmt {
    pub kind: UseKeyword,
    pub target: Ident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKeyword {
    Call,
    Addr,
    Sizeof,
}

// ── Clauses ──
//
// The parser accepts every clause on every construct; placement is checked
// during lowering so the diagnostics can name the construct.

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Gang,
    Worker,
    Vector,
    Seq,
    Auto,
    Independent,
    NumGangs(u32),
    NumWorkers(u32),
    VectorLength(u32),
}

impl ClauseKind {
    pub fn name(self) -> &'static str {
        match self {
            ClauseKind::Gang => "gang",
            ClauseKind::Worker => "worker",
            ClauseKind::Vector => "vector",
            ClauseKind::Seq => "seq",
            ClauseKind::Auto => "auto",
            ClauseKind::Independent => "independent",
            ClauseKind::NumGangs(_) => "num_gangs",
            ClauseKind::NumWorkers(_) => "num_workers",
            ClauseKind::VectorLength(_) => "vector_length",
        }
    }
}

// ── Identifiers ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
