use std::sync::Arc;

use winnow::ascii::digit1;
use winnow::combinator::{alt, opt};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::error::{Error, Result, Span};
use crate::types::{Token, TokenKind};

use super::intern::Interner;

/// Longest accepted expression, in bytes.
pub const MAX_SOURCE_LEN: usize = 10_000;
/// Most tokens one expression may produce, not counting the trailing EOF.
pub const MAX_TOKENS: usize = 1_000;

/// Tokenizer with its own string interner. Identifier and string lexemes that
/// compare equal share one allocation for the lifetime of the lexer.
#[derive(Debug, Default)]
pub struct Lexer {
    interner: Interner,
}

impl Lexer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Tokenize `source`, failing on the first invalid token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceTooLong`] or [`Error::TooManyTokens`] when a
    /// size cap is hit, and [`Error::Tokenization`] for malformed input.
    pub fn tokenize(&self, source: &str) -> Result<Vec<Token>> {
        let tokens = self.scan(source)?;
        if let Some(bad) = tokens.iter().find(|t| t.kind == TokenKind::Error) {
            return Err(Error::Tokenization {
                message: bad.lexeme().to_owned(),
                span: bad.span,
            });
        }
        Ok(tokens)
    }

    /// Tokenize `source`, stopping at the first invalid token. The invalid
    /// token is emitted with kind [`TokenKind::Error`] and its message as the
    /// lexeme. The stream always ends with [`TokenKind::Eof`].
    ///
    /// # Errors
    ///
    /// Only the size caps are reported as errors.
    pub fn scan(&self, source: &str) -> Result<Vec<Token>> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(Error::SourceTooLong {
                len: source.len(),
                max: MAX_SOURCE_LEN,
            });
        }

        let mut cursor = Cursor::new(source);
        let mut input = source;
        let mut tokens = Vec::new();

        loop {
            input = input.trim_start();
            let span = cursor.span_at(source.len() - input.len());
            if input.is_empty() {
                tokens.push(Token::fixed(TokenKind::Eof, span));
                return Ok(tokens);
            }
            if tokens.len() >= MAX_TOKENS {
                return Err(Error::TooManyTokens { max: MAX_TOKENS });
            }

            match self.next_token(&mut input, span) {
                Ok(token) => tokens.push(token),
                Err(message) => {
                    tokens.push(Token::new(TokenKind::Error, Arc::from(message), span));
                    let end = cursor.span_at(source.len());
                    tokens.push(Token::fixed(TokenKind::Eof, end));
                    return Ok(tokens);
                }
            }
        }
    }

    fn next_token(&self, input: &mut &str, span: Span) -> Result<Token, String> {
        let rest = *input;
        let first = rest.chars().next().unwrap_or('\0');

        if first.is_ascii_digit() || (first == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit())) {
            let text = number(input)?;
            return Ok(Token::new(TokenKind::Number, Arc::from(text), span));
        }

        if first == '"' {
            let text = string_literal(input)?;
            return Ok(Token::new(TokenKind::String, self.interner.intern(&text), span));
        }

        if first.is_ascii_alphabetic() || first == '_' {
            let word: ModalResult<&str> = identifier.parse_next(input);
            let word = word.map_err(|_| format!("invalid identifier at '{first}'"))?;
            return Ok(match word {
                "true" => Token::fixed(TokenKind::True, span),
                "false" => Token::fixed(TokenKind::False, span),
                _ => Token::new(TokenKind::Ident, self.interner.intern(word), span),
            });
        }

        match operator.parse_next(input) {
            Ok(kind) => Ok(Token::fixed(kind, span)),
            Err(_) => Err(match first {
                '=' => "unexpected '='; use '==' for equality".to_owned(),
                '&' => "unexpected '&'; use '&&' for logical and".to_owned(),
                '|' => "unexpected '|'; use '||' for logical or".to_owned(),
                c => format!("unexpected character '{c}'"),
            }),
        }
    }
}

/// Tracks line and column incrementally so each position is computed once.
struct Cursor<'s> {
    source: &'s str,
    checked: usize,
    line: usize,
    line_start: usize,
}

impl<'s> Cursor<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            checked: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn span_at(&mut self, offset: usize) -> Span {
        for (i, b) in self.source.as_bytes()[self.checked..offset].iter().enumerate() {
            if *b == b'\n' {
                self.line += 1;
                self.line_start = self.checked + i + 1;
            }
        }
        self.checked = offset;
        let column = self.source[self.line_start..offset].chars().count() + 1;
        Span::new(offset, self.line, column)
    }
}

// -- Numbers ----------------------------------------------------------------

fn mantissa<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    alt((
        (digit1, opt(('.', digit1))).take(),
        ('.', digit1).take(),
    ))
    .parse_next(input)
}

fn exponent<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)
        .take()
        .parse_next(input)
}

fn number<'i>(input: &mut &'i str) -> Result<&'i str, String> {
    let start = *input;
    mantissa
        .parse_next(input)
        .map_err(|_| "invalid number literal".to_owned())?;

    if input.starts_with(['e', 'E']) {
        exponent
            .parse_next(input)
            .map_err(|_| "exponent has no digits".to_owned())?;
    }

    let text = &start[..start.len() - input.len()];
    if let Some(c) = input.chars().next().filter(|c| c.is_alphanumeric()) {
        return Err(format!("unexpected '{c}' after number {text}"));
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(text),
        _ => Err(format!("number {text} is out of range")),
    }
}

// -- Strings ----------------------------------------------------------------

fn next_char(input: &mut &str) -> Option<char> {
    let c: ModalResult<char> = any.parse_next(input);
    c.ok()
}

fn string_literal(input: &mut &str) -> Result<String, String> {
    next_char(input);
    let mut s = String::new();
    loop {
        match next_char(input) {
            None => return Err("unterminated string".to_owned()),
            Some('"') => return Ok(s),
            Some('\\') => match next_char(input) {
                Some('"') => s.push('"'),
                Some('\\') => s.push('\\'),
                Some('/') => s.push('/'),
                Some('n') => s.push('\n'),
                Some('r') => s.push('\r'),
                Some('t') => s.push('\t'),
                Some('b') => s.push('\u{8}'),
                Some('f') => s.push('\u{c}'),
                Some(other) => return Err(format!("invalid escape sequence '\\{other}'")),
                None => return Err("unterminated string".to_owned()),
            },
            Some(c) => s.push(c),
        }
    }
}

// -- Identifiers & operators ------------------------------------------------

fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn operator(input: &mut &str) -> ModalResult<TokenKind> {
    alt((
        alt((
            "==".value(TokenKind::EqEq),
            "!=".value(TokenKind::NotEq),
            "<=".value(TokenKind::LtEq),
            ">=".value(TokenKind::GtEq),
            "&&".value(TokenKind::AndAnd),
            "||".value(TokenKind::OrOr),
        )),
        alt((
            '+'.value(TokenKind::Plus),
            '-'.value(TokenKind::Minus),
            '*'.value(TokenKind::Star),
            '/'.value(TokenKind::Slash),
            '%'.value(TokenKind::Percent),
            '^'.value(TokenKind::Caret),
            '>'.value(TokenKind::Gt),
            '<'.value(TokenKind::Lt),
        )),
        alt((
            '!'.value(TokenKind::Bang),
            '('.value(TokenKind::LParen),
            ')'.value(TokenKind::RParen),
            ','.value(TokenKind::Comma),
            '['.value(TokenKind::LBracket),
            ']'.value(TokenKind::RBracket),
            '?'.value(TokenKind::Question),
            ':'.value(TokenKind::Colon),
        )),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new()
            .tokenize(source)
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn arithmetic_tokens() {
        assert_eq!(
            kinds("1 + 2 * 3"),
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Star,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e && f || g"),
            vec![
                TokenKind::Ident,
                TokenKind::EqEq,
                TokenKind::Ident,
                TokenKind::NotEq,
                TokenKind::Ident,
                TokenKind::LtEq,
                TokenKind::Ident,
                TokenKind::GtEq,
                TokenKind::Ident,
                TokenKind::AndAnd,
                TokenKind::Ident,
                TokenKind::OrOr,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn number_forms() {
        let lexer = Lexer::new();
        for src in ["42", "3.14", ".5", "1e10", "2.5E-3", "7e+2"] {
            let tokens = lexer.tokenize(src).unwrap();
            assert_eq!(tokens[0].kind, TokenKind::Number, "failed for {src}");
            assert_eq!(tokens[0].lexeme(), src);
        }
    }

    #[test]
    fn number_followed_by_letter_is_error() {
        let err = Lexer::new().tokenize("12abc").unwrap_err();
        assert!(matches!(err, Error::Tokenization { .. }));
    }

    #[test]
    fn exponent_without_digits_is_error() {
        let err = Lexer::new().tokenize("1e+").unwrap_err();
        match err {
            Error::Tokenization { message, .. } => assert!(message.contains("exponent")),
            other => panic!("expected Tokenization, got {other:?}"),
        }
    }

    #[test]
    fn keywords_become_bool_tokens() {
        assert_eq!(
            kinds("true false truthy"),
            vec![
                TokenKind::True,
                TokenKind::False,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = Lexer::new()
            .tokenize(r#""a\"b\\c\/d\n\t""#)
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme(), "a\"b\\c/d\n\t");
    }

    #[test]
    fn invalid_escape_is_error() {
        assert!(Lexer::new().tokenize(r#""bad \q""#).is_err());
    }

    #[test]
    fn unterminated_string_is_error() {
        let err = Lexer::new().tokenize("\"open").unwrap_err();
        match err {
            Error::Tokenization { message, span } => {
                assert!(message.contains("unterminated"));
                assert_eq!(span.column, 1);
            }
            other => panic!("expected Tokenization, got {other:?}"),
        }
    }

    #[test]
    fn bare_single_char_operators_are_errors() {
        let lexer = Lexer::new();
        for src in ["a = b", "a & b", "a | b"] {
            assert!(
                matches!(lexer.tokenize(src), Err(Error::Tokenization { .. })),
                "expected error for {src}"
            );
        }
    }

    #[test]
    fn scan_reports_error_token_and_eof() {
        let tokens = Lexer::new().scan("1 + #").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Error,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn positions_track_lines_and_utf8_columns() {
        let tokens = Lexer::new().tokenize("\"é\" +\n  x").unwrap();
        assert_eq!(tokens[1].span, Span::new(5, 1, 5));
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 3);
    }

    #[test]
    fn unicode_whitespace_is_skipped() {
        assert_eq!(
            kinds("1\u{00A0}+\u{2003}2"),
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn identifiers_are_interned() {
        let lexer = Lexer::new();
        let tokens = lexer.tokenize("rate + rate").unwrap();
        assert!(Arc::ptr_eq(&tokens[0].lexeme_arc(), &tokens[2].lexeme_arc()));
        assert_eq!(lexer.interner().len(), 1);
    }

    #[test]
    fn oversized_source_is_distinct_error() {
        let source = "1".repeat(MAX_SOURCE_LEN + 1);
        let err = Lexer::new().tokenize(&source).unwrap_err();
        assert!(matches!(err, Error::SourceTooLong { .. }));
    }

    #[test]
    fn token_cap() {
        let source = vec!["1"; 501].join("+");
        let err = Lexer::new().tokenize(&source).unwrap_err();
        assert!(matches!(err, Error::TooManyTokens { max: 1_000 }));
    }

    #[test]
    fn always_ends_with_eof() {
        let tokens = Lexer::new().tokenize("   ").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }
}
