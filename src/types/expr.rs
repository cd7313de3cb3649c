use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::token::TokenKind;
use super::value::ValueType;

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl BinaryOp {
    #[must_use]
    pub fn from_token(kind: TokenKind) -> Option<BinaryOp> {
        Some(match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::Caret => BinaryOp::Pow,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Neq,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::GtEq => BinaryOp::Gte,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::LtEq => BinaryOp::Lte,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        })
    }
}

/// Expression AST produced by the parser. Nodes own their children; the tree
/// is shared read-only through the compiled expression that holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(Arc<str>),
    Bool(bool),
    Identifier(Arc<str>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Call {
        name: Arc<str>,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn conditional(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
        Expr::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    #[must_use]
    pub fn index(target: Expr, index: Expr) -> Expr {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    /// Leaves never call `check_limits`; every other node does.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Expr::Number(_) | Expr::String(_) | Expr::Bool(_) | Expr::Identifier(_)
        )
    }

    /// Static cost of evaluating this subtree. Conditionals count only the
    /// costlier branch since exactly one runs.
    #[must_use]
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::String(_) | Expr::Bool(_) | Expr::Identifier(_) => 1,
            Expr::Binary { left, right, .. } => 2 + left.complexity() + right.complexity(),
            Expr::Unary { operand, .. } => 2 + operand.complexity(),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => 2 + condition.complexity() + then_branch.complexity().max(else_branch.complexity()),
            Expr::Call { args, .. } => 3 + args.iter().map(Expr::complexity).sum::<usize>(),
            Expr::Array(elements) => 1 + elements.iter().map(Expr::complexity).sum::<usize>(),
            Expr::Index { target, index } => 2 + target.complexity() + index.complexity(),
        }
    }

    /// Best-effort result type, known without evaluating.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Expr::Number(_) => ValueType::Number,
            Expr::String(_) => ValueType::String,
            Expr::Bool(_) => ValueType::Bool,
            Expr::Array(_) => ValueType::Array,
            Expr::Identifier(_) | Expr::Call { .. } | Expr::Index { .. } => ValueType::Any,
            Expr::Unary { op: UnaryOp::Neg, .. } => ValueType::Number,
            Expr::Unary { op: UnaryOp::Not, .. } => ValueType::Bool,
            Expr::Binary { op, left, right } => {
                if op.is_logical() || op.is_comparison() {
                    ValueType::Bool
                } else if *op == BinaryOp::Add
                    && (left.value_type() == ValueType::String
                        || right.value_type() == ValueType::String)
                {
                    ValueType::String
                } else if *op == BinaryOp::Add
                    && (left.value_type() == ValueType::Any || right.value_type() == ValueType::Any)
                {
                    ValueType::Any
                } else {
                    ValueType::Number
                }
            }
            Expr::Conditional {
                then_branch,
                else_branch,
                ..
            } => {
                let t = then_branch.value_type();
                if t == else_branch.value_type() {
                    t
                } else {
                    ValueType::Any
                }
            }
        }
    }

    /// Short label naming the node kind, used by tracing.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Number(_) => "Number",
            Expr::String(_) => "String",
            Expr::Bool(_) => "Bool",
            Expr::Identifier(_) => "Identifier",
            Expr::Binary { .. } => "BinaryOp",
            Expr::Unary { .. } => "UnaryOp",
            Expr::Conditional { .. } => "Conditional",
            Expr::Call { .. } => "FunctionCall",
            Expr::Array(_) => "Array",
            Expr::Index { .. } => "Index",
        }
    }

    /// Sorted, deduplicated identifier names referenced anywhere in the tree.
    /// Function names are not included.
    #[must_use]
    pub fn identifiers(&self) -> Vec<Arc<str>> {
        let mut names = BTreeSet::new();
        self.collect_identifiers(&mut names);
        names.into_iter().collect()
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<Arc<str>>) {
        match self {
            Expr::Identifier(name) => {
                out.insert(Arc::clone(name));
            }
            Expr::Number(_) | Expr::String(_) | Expr::Bool(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_identifiers(out);
                then_branch.collect_identifiers(out);
                else_branch.collect_identifiers(out);
            }
            Expr::Call { args, .. } | Expr::Array(args) => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
            Expr::Index { target, index } => {
                target.collect_identifiers(out);
                index.collect_identifiers(out);
            }
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{8}' => f.write_str("\\b")?,
            '\u{c}' => f.write_str("\\f")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Fully parenthesised rendering that parses back to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::String(s) => write_escaped(f, s),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Identifier(name) => f.write_str(name),
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Unary { op, operand } => write!(f, "({op}{operand})"),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "({condition} ? {then_branch} : {else_branch})"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Array(elements) => {
                f.write_str("[")?;
                write_list(f, elements)?;
                f.write_str("]")
            }
            Expr::Index { target, index } => write!(f, "{target}[{index}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::Identifier(Arc::from(name))
    }

    #[test]
    fn display_is_fully_parenthesised() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::Number(1.0),
            Expr::binary(BinaryOp::Mul, Expr::Number(2.0), ident("x")),
        );
        assert_eq!(expr.to_string(), "(1 + (2 * x))");
    }

    #[test]
    fn display_calls_arrays_and_index() {
        let expr = Expr::index(
            Expr::Array(vec![Expr::Number(1.0), Expr::String(Arc::from("a\"b"))]),
            Expr::Call {
                name: Arc::from("len"),
                args: vec![ident("items")],
            },
        );
        assert_eq!(expr.to_string(), r#"[1, "a\"b"][len(items)]"#);
    }

    #[test]
    fn display_conditional_and_unary() {
        let expr = Expr::conditional(
            Expr::unary(UnaryOp::Not, Expr::Bool(false)),
            Expr::unary(UnaryOp::Neg, Expr::Number(2.5)),
            ident("y"),
        );
        assert_eq!(expr.to_string(), "((!false) ? (-2.5) : y)");
    }

    #[test]
    fn complexity_sums_children() {
        let expr = Expr::binary(BinaryOp::Add, Expr::Number(1.0), ident("x"));
        assert_eq!(expr.complexity(), 4);
    }

    #[test]
    fn conditional_complexity_uses_costlier_branch() {
        let cheap = Expr::Number(1.0);
        let costly = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::Number(1.0), Expr::Number(2.0)),
            Expr::Number(3.0),
        );
        let expr = Expr::conditional(Expr::Bool(true), cheap, costly);
        assert_eq!(expr.complexity(), 2 + 1 + 7);
    }

    #[test]
    fn call_complexity_adds_constant() {
        let expr = Expr::Call {
            name: Arc::from("abs"),
            args: vec![Expr::Number(1.0)],
        };
        assert_eq!(expr.complexity(), 4);
    }

    #[test]
    fn identifiers_sorted_and_deduplicated() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Mul, ident("weight"), ident("base_rate")),
            Expr::Call {
                name: Arc::from("max"),
                args: vec![ident("weight"), ident("fuel")],
            },
        );
        let names: Vec<String> = expr.identifiers().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["base_rate", "fuel", "weight"]);
    }

    #[test]
    fn value_type_hints() {
        assert_eq!(Expr::Number(1.0).value_type(), ValueType::Number);
        assert_eq!(
            Expr::binary(BinaryOp::Gt, ident("a"), Expr::Number(1.0)).value_type(),
            ValueType::Bool
        );
        assert_eq!(
            Expr::binary(BinaryOp::Add, Expr::String(Arc::from("a")), Expr::Number(1.0))
                .value_type(),
            ValueType::String
        );
        assert_eq!(ident("x").value_type(), ValueType::Any);
    }

    #[test]
    fn operator_tokens_round_trip() {
        for kind in [
            TokenKind::Plus,
            TokenKind::Caret,
            TokenKind::LtEq,
            TokenKind::OrOr,
        ] {
            let op = BinaryOp::from_token(kind).unwrap();
            assert_eq!(op.symbol(), kind.describe());
        }
        assert_eq!(BinaryOp::from_token(TokenKind::Comma), None);
    }
}
