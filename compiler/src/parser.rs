// Parser for .acc directive outline files.
//
// Parses a token stream (from the lexer) into the outline AST. Uses chumsky
// combinators; statement blocks nest, so the block rule is recursive.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::clause::{ParallelismLevel, RegionKind};
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an outline source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Clauses ──

    let level = select! {
        Token::Gang => ParallelismLevel::Gang,
        Token::Worker => ParallelismLevel::Worker,
        Token::Vector => ParallelismLevel::Vector,
        Token::Seq => ParallelismLevel::Seq,
    }
    .labelled("parallelism level");

    let count = select! { Token::Int(n) => n }
        .labelled("resource count")
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let clause = choice((
        select! {
            Token::Gang => ClauseKind::Gang,
            Token::Worker => ClauseKind::Worker,
            Token::Vector => ClauseKind::Vector,
            Token::Seq => ClauseKind::Seq,
            Token::Auto => ClauseKind::Auto,
            Token::Independent => ClauseKind::Independent,
        },
        just(Token::NumGangs)
            .ignore_then(count.clone())
            .map(ClauseKind::NumGangs),
        just(Token::NumWorkers)
            .ignore_then(count.clone())
            .map(ClauseKind::NumWorkers),
        just(Token::VectorLength)
            .ignore_then(count)
            .map(ClauseKind::VectorLength),
    ))
    .map_with(|kind, e| Clause {
        kind,
        span: e.span(),
    });

    let clauses = clause.repeated().collect::<Vec<_>>();

    // ── Blocks and statements ──

    let block = recursive(|block| {
        let use_stmt = select! {
            Token::Call => UseKeyword::Call,
            Token::Addr => UseKeyword::Addr,
            Token::Sizeof => UseKeyword::Sizeof,
        }
        .then(ident.clone())
        .then_ignore(just(Token::Semi))
        .map(|(kind, target)| StmtKind::Use(UseStmt { kind, target }));

        let region_kind = select! {
            Token::Parallel => RegionKind::Parallel,
            Token::Kernels => RegionKind::Kernels,
        };

        let compute_stmt = region_kind
            .then(clauses.clone())
            .then(block.clone())
            .map(|((kind, clauses), body)| {
                StmtKind::Compute(ComputeStmt {
                    kind,
                    clauses,
                    body,
                })
            });

        let loop_stmt = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .or_not()
            .then_ignore(just(Token::Loop))
            .then(clauses.clone())
            .then(block.clone())
            .map(|((label, clauses), body)| {
                StmtKind::Loop(LoopStmt {
                    label,
                    clauses,
                    body,
                })
            });

        let nested = block.map(StmtKind::Block);

        let stmt = choice((use_stmt, compute_stmt, loop_stmt, nested)).map_with(|kind, e| Stmt {
            kind,
            span: e.span(),
        });

        stmt.repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map_with(|stmts, e| Block {
                stmts,
                span: e.span(),
            })
    });

    // ── Items ──

    let routine_attr = just(Token::Routine)
        .ignore_then(level.delimited_by(just(Token::LParen), just(Token::RParen)))
        .map_with(|level, e| RoutineAttr {
            level,
            span: e.span(),
        });

    let item = routine_attr
        .or_not()
        .then_ignore(just(Token::Fn))
        .then(ident)
        .then(just(Token::Semi).to(None).or(block.map(Some)))
        .map_with(|((routine, name), body), e| Item {
            routine,
            name,
            body,
            span: e.span(),
        });

    // ── Program ──

    item.repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| Program {
            items,
            span: e.span(),
        })
}

// ── Tests ──
