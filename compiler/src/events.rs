// events.rs — The typed node stream consumed by graph construction
//
// This is the engine's input boundary: declarations, definition begin/end,
// compute region begin/end, loop begin/end and function uses, in program
// order. Produced by `lower` from the outline AST, or directly by embedders
// through `EventBuilder`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt::{self, Write};

use crate::ast::Span;
use crate::clause::{LoopClause, LoopClauses, ParallelismLevel, RegionClauses, RegionKind};

/// How a function name is used at a use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKind {
    /// A call in executable position.
    Call,
    /// The function's address is taken; it may be called from anywhere.
    AddressOf,
    /// A reference that is not a use (e.g. `sizeof`).
    Reference,
}

impl UseKind {
    /// Whether the use makes the callee reachable at run time.
    pub fn is_use(self) -> bool {
        !matches!(self, UseKind::Reference)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UseKind::Call => "call",
            UseKind::AddressOf => "addr",
            UseKind::Reference => "sizeof",
        }
    }
}

/// One node of the input stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Declare {
        name: String,
        routine: Option<ParallelismLevel>,
        span: Span,
    },
    DefineBegin {
        name: String,
        routine: Option<ParallelismLevel>,
        span: Span,
    },
    DefineEnd {
        span: Span,
    },
    RegionBegin {
        kind: RegionKind,
        clauses: RegionClauses,
        span: Span,
    },
    RegionEnd {
        span: Span,
    },
    LoopBegin {
        label: Option<String>,
        clauses: LoopClauses,
        span: Span,
    },
    LoopEnd {
        span: Span,
    },
    Use {
        callee: String,
        kind: UseKind,
        span: Span,
    },
}

impl Event {
    pub fn span(&self) -> Span {
        match self {
            Event::Declare { span, .. }
            | Event::DefineBegin { span, .. }
            | Event::DefineEnd { span }
            | Event::RegionBegin { span, .. }
            | Event::RegionEnd { span }
            | Event::LoopBegin { span, .. }
            | Event::LoopEnd { span }
            | Event::Use { span, .. } => *span,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Declare { name, routine, .. } => {
                write!(f, "declare {name}")?;
                if let Some(level) = routine {
                    write!(f, " routine({level})")?;
                }
                Ok(())
            }
            Event::DefineBegin { name, routine, .. } => {
                write!(f, "define {name}")?;
                if let Some(level) = routine {
                    write!(f, " routine({level})")?;
                }
                Ok(())
            }
            Event::DefineEnd { .. } => write!(f, "end define"),
            Event::RegionBegin { kind, clauses, .. } => {
                write!(f, "{kind}")?;
                if *clauses != RegionClauses::default() {
                    write!(f, " {clauses}")?;
                }
                Ok(())
            }
            Event::RegionEnd { .. } => write!(f, "end region"),
            Event::LoopBegin { label, clauses, .. } => {
                if let Some(label) = label {
                    write!(f, "{label}: ")?;
                }
                write!(f, "loop")?;
                if !clauses.is_empty() {
                    write!(f, " {clauses}")?;
                }
                Ok(())
            }
            Event::LoopEnd { .. } => write!(f, "end loop"),
            Event::Use { callee, kind, .. } => write!(f, "{} {callee}", kind.as_str()),
        }
    }
}

/// Render an event stream one event per line, indented by nesting depth.
pub fn format_events(events: &[Event]) -> String {
    let mut buf = String::new();
    let mut depth = 0usize;
    for event in events {
        if matches!(
            event,
            Event::DefineEnd { .. } | Event::RegionEnd { .. } | Event::LoopEnd { .. }
        ) {
            depth = depth.saturating_sub(1);
        }
        let _ = writeln!(buf, "{}{}", "  ".repeat(depth), event);
        if matches!(
            event,
            Event::DefineBegin { .. } | Event::RegionBegin { .. } | Event::LoopBegin { .. }
        ) {
            depth += 1;
        }
    }
    buf
}

// ── Builder ─────────────────────────────────────────────────────────────────

fn synthetic_span() -> Span {
    (0..0).into()
}

/// Programmatic construction of well-nested event streams.
///
/// ```
/// use accinfer::events::EventBuilder;
///
/// let mut b = EventBuilder::new();
/// b.define("main", None, |b| {
///     b.parallel(Default::default(), |b| {
///         b.loop_(Some("outer"), &[], |b| {
///             b.call("work");
///         });
///     });
/// });
/// let events = b.finish();
/// assert_eq!(events.len(), 7);
/// ```
#[derive(Debug, Default)]
pub struct EventBuilder {
    events: Vec<Event>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, routine: Option<ParallelismLevel>) -> &mut Self {
        self.events.push(Event::Declare {
            name: name.to_string(),
            routine,
            span: synthetic_span(),
        });
        self
    }

    pub fn define(
        &mut self,
        name: &str,
        routine: Option<ParallelismLevel>,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.events.push(Event::DefineBegin {
            name: name.to_string(),
            routine,
            span: synthetic_span(),
        });
        body(self);
        self.events.push(Event::DefineEnd {
            span: synthetic_span(),
        });
        self
    }

    pub fn region(
        &mut self,
        kind: RegionKind,
        clauses: RegionClauses,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.events.push(Event::RegionBegin {
            kind,
            clauses,
            span: synthetic_span(),
        });
        body(self);
        self.events.push(Event::RegionEnd {
            span: synthetic_span(),
        });
        self
    }

    pub fn parallel(&mut self, clauses: RegionClauses, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.region(RegionKind::Parallel, clauses, body)
    }

    pub fn loop_(
        &mut self,
        label: Option<&str>,
        clauses: &[LoopClause],
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.events.push(Event::LoopBegin {
            label: label.map(str::to_string),
            clauses: clauses.iter().copied().collect(),
            span: synthetic_span(),
        });
        body(self);
        self.events.push(Event::LoopEnd {
            span: synthetic_span(),
        });
        self
    }

    pub fn use_(&mut self, callee: &str, kind: UseKind) -> &mut Self {
        self.events.push(Event::Use {
            callee: callee.to_string(),
            kind,
            span: synthetic_span(),
        });
        self
    }

    pub fn call(&mut self, callee: &str) -> &mut Self {
        self.use_(callee, UseKind::Call)
    }

    /// Append a raw event, for streams that are deliberately malformed.
    pub fn push(&mut self, event: Event) -> &mut Self {
        self.events.push(event);
        self
    }

    pub fn finish(self) -> Vec<Event> {
        self.events
    }
}
