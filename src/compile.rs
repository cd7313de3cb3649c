use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parse::{parse_tokens, Lexer};
use crate::types::Expr;

/// Largest static complexity a compiled expression may have.
pub const MAX_COMPLEXITY: usize = 1000;

/// A parsed, validated expression ready for repeated evaluation.
///
/// Immutable once built; the evaluator's cache hands out shared
/// `Arc<CompiledExpression>` values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: Arc<str>,
    root: Expr,
    variables: Vec<Arc<str>>,
    complexity: usize,
}

impl CompiledExpression {
    /// The AST root.
    #[must_use]
    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Distinct identifiers the expression reads, sorted.
    #[must_use]
    pub fn variables(&self) -> &[Arc<str>] {
        &self.variables
    }

    #[must_use]
    pub fn complexity(&self) -> usize {
        self.complexity
    }

    /// Cache key for this expression: its exact source text.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// Tokenize, parse and validate `source`.
pub(crate) fn compile(lexer: &Lexer, source: &str) -> Result<CompiledExpression> {
    let tokens = lexer.tokenize(source)?;
    let root = parse_tokens(&tokens)?;
    from_root(source, root)
}

/// Validate an already-parsed tree.
pub(crate) fn from_root(source: &str, root: Expr) -> Result<CompiledExpression> {
    let complexity = root.complexity();
    if complexity > MAX_COMPLEXITY {
        return Err(Error::ComplexityExceeded {
            complexity,
            max: MAX_COMPLEXITY,
        });
    }
    Ok(CompiledExpression {
        source: Arc::from(source),
        variables: root.identifiers(),
        root,
        complexity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn compile_str(source: &str) -> Result<CompiledExpression> {
        compile(&Lexer::new(), source)
    }

    #[test]
    fn compiled_metadata() {
        let compiled = compile_str("weight > 100 ? weight * rate : min_charge").unwrap();
        let names: Vec<&str> = compiled.variables().iter().map(AsRef::as_ref).collect();
        assert_eq!(names, ["min_charge", "rate", "weight"]);
        assert_eq!(compiled.fingerprint(), "weight > 100 ? weight * rate : min_charge");
        assert_eq!(
            compiled.to_string(),
            "((weight > 100) ? (weight * rate) : min_charge)"
        );
        // conditional 2 + condition 4 + costlier branch 4
        assert_eq!(compiled.complexity(), 10);
    }

    #[test]
    fn complexity_cap() {
        let wide = vec!["x"; 335].join(" + ");
        let err = compile_str(&wide).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComplexityExceeded);
        assert!(matches!(
            err,
            Error::ComplexityExceeded { complexity: 1003, max: 1000 }
        ));

        let fits = vec!["x"; 334].join(" + ");
        assert_eq!(compile_str(&fits).unwrap().complexity(), 1000);
    }

    #[test]
    fn errors_propagate() {
        assert_eq!(
            compile_str("(2 + 3").unwrap_err().kind(),
            ErrorKind::ParseError
        );
        assert_eq!(
            compile_str("2 $ 3").unwrap_err().kind(),
            ErrorKind::TokenizationError
        );
    }
}
