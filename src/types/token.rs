use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::Span;

static EMPTY: Lazy<Arc<str>> = Lazy::new(|| Arc::from(""));

/// Every token kind the lexer can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Error,
    Number,
    Ident,
    String,
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
    LBracket,
    RBracket,
    Question,
    Colon,
}

/// Binding strength of operators, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    Lowest,
    Conditional,
    Or,
    And,
    Equality,
    Comparison,
    Addition,
    Multiplication,
    Power,
    Unary,
    Highest,
}

impl Precedence {
    /// The next tighter level; used for left-associative operands.
    #[must_use]
    pub fn tighter(self) -> Precedence {
        match self {
            Precedence::Lowest => Precedence::Conditional,
            Precedence::Conditional => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Addition,
            Precedence::Addition => Precedence::Multiplication,
            Precedence::Multiplication => Precedence::Power,
            Precedence::Power => Precedence::Unary,
            Precedence::Unary | Precedence::Highest => Precedence::Highest,
        }
    }
}

impl TokenKind {
    /// Infix precedence, or `None` when the token cannot continue a binary expression.
    ///
    /// `?` is reported as [`Precedence::Conditional`] even though the parser
    /// handles it in its own production.
    #[must_use]
    pub fn precedence(self) -> Option<Precedence> {
        Some(match self {
            TokenKind::Question => Precedence::Conditional,
            TokenKind::OrOr => Precedence::Or,
            TokenKind::AndAnd => Precedence::And,
            TokenKind::EqEq | TokenKind::NotEq => Precedence::Equality,
            TokenKind::Gt | TokenKind::Lt | TokenKind::GtEq | TokenKind::LtEq => {
                Precedence::Comparison
            }
            TokenKind::Plus | TokenKind::Minus => Precedence::Addition,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Multiplication,
            TokenKind::Caret => Precedence::Power,
            _ => return None,
        })
    }

    #[must_use]
    pub fn is_right_associative(self) -> bool {
        matches!(self, TokenKind::Caret | TokenKind::Question)
    }

    /// Source spelling for fixed-shape tokens, a description otherwise.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Error => "invalid token",
            TokenKind::Number => "number",
            TokenKind::Ident => "identifier",
            TokenKind::String => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::GtEq => ">=",
            TokenKind::LtEq => "<=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A lexed token. Positions are kept for diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    lexeme: Arc<str>,
    pub span: Span,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, lexeme: Arc<str>, span: Span) -> Self {
        Self { kind, lexeme, span }
    }

    /// A token whose spelling is implied by its kind.
    #[must_use]
    pub fn fixed(kind: TokenKind, span: Span) -> Self {
        Self::new(kind, Arc::clone(&EMPTY), span)
    }

    /// Source text for numbers, interned text for identifiers and strings,
    /// the message for errors, empty otherwise.
    #[must_use]
    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }

    #[must_use]
    pub fn lexeme_arc(&self) -> Arc<str> {
        Arc::clone(&self.lexeme)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Number | TokenKind::Ident => write!(f, "{}", self.lexeme),
            TokenKind::String => write!(f, "\"{}\"", self.lexeme),
            kind => write!(f, "'{kind}'"),
        }
    }
}
