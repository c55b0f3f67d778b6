// accinfer — implicit routine and loop-level inference for directive outlines
//
// Library root. Front end (lexer, parser, lower) produces the event stream;
// graph, routine and levels are the analyses; attrs, dot and pipeline are the
// output surfaces and driver.

pub mod ast;
pub mod attrs;
pub mod clause;
pub mod diag;
pub mod dot;
pub mod events;
pub mod graph;
pub mod id;
pub mod levels;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod routine;
