use crate::error::{Error, Span};
use crate::types::{BinaryOp, Expr, Precedence, Token, TokenKind, UnaryOp};

/// Parse a token stream ending in EOF into an AST.
///
/// Errors do not stop the walk: the first one is recorded, a zero literal
/// stands in for the broken subtree, and the recorded error is returned once
/// the stream is consumed.
pub(crate) fn parse_tokens(tokens: &[Token]) -> Result<Expr, Error> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        error: None,
    };
    let expr = parser.expression();
    if parser.current().kind != TokenKind::Eof {
        let tok = parser.current().clone();
        parser.fail(format!("unexpected {tok} after end of expression"), tok.span);
    }
    match parser.error {
        Some(err) => Err(err),
        None => Ok(expr),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    error: Option<Error>,
}

impl<'a> Parser<'a> {
    fn current(&self) -> &'a Token {
        // The lexer always terminates the stream with EOF, and `advance`
        // never moves past it.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) -> &'a Token {
        let tok = self.current();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn fail(&mut self, message: String, span: Span) -> Expr {
        if self.error.is_none() {
            self.error = Some(Error::Parse { message, span });
        }
        Expr::Number(0.0)
    }

    fn expect(&mut self, kind: TokenKind, context: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            let tok = self.current();
            self.fail(
                format!("expected '{kind}' {context}, found {tok}"),
                tok.span,
            );
        }
    }

    fn expression(&mut self) -> Expr {
        self.ternary()
    }

    // condition ? then : else, right-associative
    fn ternary(&mut self) -> Expr {
        let condition = self.binary(Precedence::Or);
        if !self.check(TokenKind::Question) {
            return condition;
        }
        self.advance();
        let then_branch = self.expression();
        self.expect(TokenKind::Colon, "in conditional expression");
        let else_branch = self.ternary();
        Expr::conditional(condition, then_branch, else_branch)
    }

    /// Precedence climbing over the binary levels from `||` up to `^`.
    fn binary(&mut self, min: Precedence) -> Expr {
        let mut left = self.unary();
        loop {
            let kind = self.current().kind;
            let Some(op) = BinaryOp::from_token(kind) else {
                break;
            };
            let Some(prec) = kind.precedence() else {
                break;
            };
            if prec < min {
                break;
            }
            self.advance();
            let next = if kind.is_right_associative() {
                prec
            } else {
                prec.tighter()
            };
            let right = self.binary(next);
            left = Expr::binary(op, left, right);
        }
        left
    }

    fn unary(&mut self) -> Expr {
        let op = match self.current().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary();
        Expr::unary(op, operand)
    }

    fn postfix(&mut self) -> Expr {
        let mut expr = self.primary();
        while self.check(TokenKind::LBracket) {
            self.advance();
            let index = self.expression();
            self.expect(TokenKind::RBracket, "to close index");
            expr = Expr::index(expr, index);
        }
        expr
    }

    fn primary(&mut self) -> Expr {
        let tok = self.current();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                match tok.lexeme().parse::<f64>() {
                    Ok(n) => Expr::Number(n),
                    Err(_) => self.fail(format!("invalid number {}", tok.lexeme()), tok.span),
                }
            }
            TokenKind::String => {
                self.advance();
                Expr::String(tok.lexeme_arc())
            }
            TokenKind::True => {
                self.advance();
                Expr::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                Expr::Bool(false)
            }
            TokenKind::Ident => {
                self.advance();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    let args = self.list(TokenKind::RParen, "to close argument list");
                    Expr::Call {
                        name: tok.lexeme_arc(),
                        args,
                    }
                } else {
                    Expr::Identifier(tok.lexeme_arc())
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression();
                self.expect(TokenKind::RParen, "to close group");
                inner
            }
            TokenKind::LBracket => {
                self.advance();
                Expr::Array(self.list(TokenKind::RBracket, "to close array"))
            }
            TokenKind::Error => {
                self.advance();
                self.fail(tok.lexeme().to_owned(), tok.span)
            }
            TokenKind::Eof => self.fail("unexpected end of input".to_owned(), tok.span),
            _ => {
                self.advance();
                self.fail(format!("unexpected {tok}"), tok.span)
            }
        }
    }

    /// Comma separated expressions up to `close`; empty lists and a trailing
    /// comma are accepted.
    fn list(&mut self, close: TokenKind, context: &str) -> Vec<Expr> {
        let mut items = Vec::new();
        while !self.check(close) && !self.check(TokenKind::Eof) {
            items.push(self.expression());
            if self.check(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close, context);
        items
    }
}

#[cfg(test)]
mod tests {
    use crate::parse::parse;
    use crate::types::{BinaryOp, Expr, UnaryOp};
    use crate::Error;

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(parse("2 ^ 3 ^ 2").unwrap().to_string(), "(2 ^ (3 ^ 2))");
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(parse("10 - 4 - 3").unwrap().to_string(), "((10 - 4) - 3)");
    }

    #[test]
    fn ternary_is_right_associative() {
        assert_eq!(
            parse("a ? b : c ? d : e").unwrap().to_string(),
            "(a ? b : (c ? d : e))"
        );
    }

    #[test]
    fn ternary_binds_looser_than_or() {
        assert_eq!(
            parse("a || b ? 1 : 2").unwrap().to_string(),
            "((a || b) ? 1 : 2)"
        );
    }

    #[test]
    fn logical_precedence() {
        assert_eq!(
            parse("a || b && c == d").unwrap().to_string(),
            "(a || (b && (c == d)))"
        );
    }

    #[test]
    fn comparison_binds_tighter_than_equality() {
        assert_eq!(
            parse("a < b == c > d").unwrap().to_string(),
            "((a < b) == (c > d))"
        );
    }

    #[test]
    fn unary_chains() {
        let expr = parse("!!-x").unwrap();
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => assert!(matches!(*operand, Expr::Unary { op: UnaryOp::Not, .. })),
            other => panic!("expected Not, got {other:?}"),
        }
    }

    #[test]
    fn unary_binds_tighter_than_power() {
        assert_eq!(parse("-2 ^ 2").unwrap().to_string(), "((-2) ^ 2)");
        assert_eq!(parse("2 ^ -1").unwrap().to_string(), "(2 ^ (-1))");
    }

    #[test]
    fn function_calls() {
        let expr = parse("round(x, 2)").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(&*name, "round");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected Call, got {other:?}"),
        }
        assert!(matches!(parse("now()").unwrap(), Expr::Call { args, .. } if args.is_empty()));
    }

    #[test]
    fn array_literals() {
        assert!(matches!(parse("[]").unwrap(), Expr::Array(v) if v.is_empty()));
        assert!(matches!(parse("[1, 2, 3,]").unwrap(), Expr::Array(v) if v.len() == 3));
    }

    #[test]
    fn chained_indexing() {
        assert_eq!(
            parse("[[1,2],[3,4]][1][0]").unwrap().to_string(),
            "[[1, 2], [3, 4]][1][0]"
        );
    }

    #[test]
    fn missing_paren_reports_position() {
        let err = parse("(2 + 3").unwrap_err();
        match &err {
            Error::Parse { message, span } => {
                assert!(message.contains("')'"), "message: {message}");
                assert_eq!(span.column, 7);
            }
            other => panic!("expected Parse, got {other:?}"),
        }
        assert!(err.to_string().contains("column 7"));
    }

    #[test]
    fn missing_colon() {
        let err = parse("a ? b").unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("':'")));
    }

    #[test]
    fn missing_bracket() {
        let err = parse("[1, 2").unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("']'")));
        let err = parse("a[1").unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("']'")));
    }

    #[test]
    fn first_error_wins() {
        let err = parse("(1 + ) + (2").unwrap_err();
        match err {
            Error::Parse { span, .. } => assert_eq!(span.column, 6),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(matches!(parse("1 2"), Err(Error::Parse { .. })));
    }

    #[test]
    fn empty_input_rejected() {
        assert!(matches!(parse(""), Err(Error::Parse { .. })));
    }
}
