// Lexer for .acc directive outline files.
//
// Tokenizes the outline language: function declarations/definitions, compute
// regions, loop constructs with their clauses, and function uses.
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Outline token types.
///
/// Keywords and symbols are matched as fixed strings. Identifiers carry no
/// value — use the span to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*")]
pub enum Token {
    // ── Items and statements ──
    #[token("fn")]
    Fn,
    #[token("routine")]
    Routine,
    #[token("parallel")]
    Parallel,
    #[token("kernels")]
    Kernels,
    #[token("loop")]
    Loop,
    #[token("call")]
    Call,
    #[token("addr")]
    Addr,
    #[token("sizeof")]
    Sizeof,

    // ── Clauses ──
    #[token("gang")]
    Gang,
    #[token("worker")]
    Worker,
    #[token("vector")]
    Vector,
    #[token("seq")]
    Seq,
    #[token("auto")]
    Auto,
    #[token("independent")]
    Independent,
    #[token("num_gangs")]
    NumGangs,
    #[token("num_workers")]
    NumWorkers,
    #[token("vector_length")]
    VectorLength,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,

    // ── Literals ──
    /// Unsigned integer literal (resource counts).
    #[regex(r"[0-9]+", parse_int)]
    Int(u32),

    // ── Identifier ──
    //
    // logos prioritises fixed `#[token]` matches over regex for the same
    // length, so `loop` matches Loop, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "fn"),
            Token::Routine => write!(f, "routine"),
            Token::Parallel => write!(f, "parallel"),
            Token::Kernels => write!(f, "kernels"),
            Token::Loop => write!(f, "loop"),
            Token::Call => write!(f, "call"),
            Token::Addr => write!(f, "addr"),
            Token::Sizeof => write!(f, "sizeof"),
            Token::Gang => write!(f, "gang"),
            Token::Worker => write!(f, "worker"),
            Token::Vector => write!(f, "vector"),
            Token::Seq => write!(f, "seq"),
            Token::Auto => write!(f, "auto"),
            Token::Independent => write!(f, "independent"),
            Token::NumGangs => write!(f, "num_gangs"),
            Token::NumWorkers => write!(f, "num_workers"),
            Token::VectorLength => write!(f, "vector_length"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Semi => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex an outline source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
