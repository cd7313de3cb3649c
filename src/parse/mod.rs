mod grammar;
mod intern;
mod lexer;

pub use intern::Interner;
pub use lexer::{Lexer, MAX_SOURCE_LEN, MAX_TOKENS};

pub(crate) use grammar::parse_tokens;

use crate::error::Result;
use crate::types::Expr;

/// Parse an expression string into an AST using a throwaway lexer.
///
/// # Errors
///
/// Returns the tokenizer's error for malformed tokens or oversize input, or
/// [`Error::Parse`](crate::Error::Parse) for the first syntax error.
pub fn parse(source: &str) -> Result<Expr> {
    parse_with(&Lexer::new(), source)
}

/// Parse with a caller-owned lexer so interned names outlive the call.
///
/// # Errors
///
/// Same as [`parse`].
pub fn parse_with(lexer: &Lexer, source: &str) -> Result<Expr> {
    let tokens = lexer.tokenize(source)?;
    parse_tokens(&tokens)
}
