// id.rs — Stable arena identifiers for the program graph
//
// Every function, construct, use site and external name lives in an arena
// owned by `ProgramGraph`; everything else refers to them by these indices.
// Allocated in program order so assignment is deterministic.

use std::fmt;

use serde::Serialize;

/// Canonical identity of a function: all declarations and definitions of
/// the same name share one `FuncId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FuncId(pub u32);

/// A loop construct or compute region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConstructId(pub u32);

/// A use (call, address-of, or plain reference) of a function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UseId(pub u32);

/// A name that is used but never declared in the visible program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExternId(pub u32);

macro_rules! impl_index {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(
            impl $ty {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "{}"), self.0)
                }
            }
        )*
    };
}

impl_index! {
    FuncId => "f",
    ConstructId => "c",
    UseId => "u",
    ExternId => "x",
}

/// Allocator for arena IDs. Produces monotonically increasing IDs in
/// allocation (program) order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_func: u32,
    next_construct: u32,
    next_use: u32,
    next_extern: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_func(&mut self) -> FuncId {
        let id = FuncId(self.next_func);
        self.next_func += 1;
        id
    }

    pub fn alloc_construct(&mut self) -> ConstructId {
        let id = ConstructId(self.next_construct);
        self.next_construct += 1;
        id
    }

    pub fn alloc_use(&mut self) -> UseId {
        let id = UseId(self.next_use);
        self.next_use += 1;
        id
    }

    pub fn alloc_extern(&mut self) -> ExternId {
        let id = ExternId(self.next_extern);
        self.next_extern += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_in_order_per_kind() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_func(), FuncId(0));
        assert_eq!(alloc.alloc_construct(), ConstructId(0));
        assert_eq!(alloc.alloc_func(), FuncId(1));
        assert_eq!(alloc.alloc_use(), UseId(0));
        assert_eq!(alloc.alloc_extern(), ExternId(0));
        assert_eq!(alloc.alloc_construct(), ConstructId(1));
    }

    #[test]
    fn display_uses_kind_prefix() {
        assert_eq!(FuncId(3).to_string(), "f3");
        assert_eq!(ConstructId(0).to_string(), "c0");
        assert_eq!(ExternId(1).index(), 1);
    }
}
