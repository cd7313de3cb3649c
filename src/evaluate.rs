use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::error::Result;
use crate::types::{ops, BinaryOp, Expr, Value};

impl Expr {
    /// Evaluate this tree against `ctx`.
    ///
    /// Operands run left to right. `&&`, `||` and `?:` evaluate only what
    /// their result needs. Every non-leaf node passes through
    /// [`EvaluationContext::check_limits`] first.
    ///
    /// # Errors
    ///
    /// The first error raised by a limit check, variable resolution, an
    /// operator or a function call.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Value> {
        match ctx.recorder() {
            None => self.eval_node(ctx),
            Some(recorder) => {
                recorder.enter(self);
                let result = self.eval_node(ctx);
                recorder.exit(&result);
                result
            }
        }
    }

    fn eval_node(&self, ctx: &EvaluationContext<'_>) -> Result<Value> {
        if !self.is_leaf() {
            ctx.check_limits()?;
        }
        match self {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::Str(Arc::clone(s))),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Identifier(name) => ctx.resolve_variable(name),
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                if !left.evaluate(ctx)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(right.evaluate(ctx)?.is_truthy()))
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                if left.evaluate(ctx)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(right.evaluate(ctx)?.is_truthy()))
            }
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                match ops::binary(*op, &l, &r)? {
                    // concatenation results live in the evaluation's arena
                    Value::Str(s) => Ok(Value::Str(ctx.arena().alloc_string(&s))),
                    other => Ok(other),
                }
            }
            Expr::Unary { op, operand } => ops::unary(*op, &operand.evaluate(ctx)?),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if condition.evaluate(ctx)?.is_truthy() {
                    then_branch.evaluate(ctx)
                } else {
                    else_branch.evaluate(ctx)
                }
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.evaluate(ctx))
                    .collect::<Result<Vec<_>>>()?;
                ctx.call_function(name, &args)
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| item.evaluate(ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Index { target, index } => {
                let target = target.evaluate(ctx)?;
                let index = index.evaluate(ctx)?;
                ops::index(&target, &index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::arena::Arena;
    use crate::bridge::EntityContext;
    use crate::context::{CancellationToken, Limits};
    use crate::error::Error;
    use crate::functions::{FunctionDescriptor, FunctionRegistry};
    use crate::parse::parse;
    use crate::types::{Record, VariableRegistry};

    struct Harness {
        host: EntityContext,
        functions: FunctionRegistry,
        variables: VariableRegistry,
        arena: Arena,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(record: Record) -> Self {
            let functions = FunctionRegistry::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            functions.register(FunctionDescriptor::pure("tick", 0, Some(0), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Bool(true))
            }));
            Self {
                host: EntityContext::new(record),
                functions,
                variables: VariableRegistry::new(),
                arena: Arena::new(),
                calls,
            }
        }

        fn eval(&self, source: &str) -> Result<Value> {
            let ctx = EvaluationContext::new(
                &self.host,
                &self.functions,
                &self.variables,
                &self.arena,
                Limits::default(),
                CancellationToken::new(),
            );
            parse(source)?.evaluate(&ctx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn eval(source: &str) -> Result<Value> {
        Harness::new(Record::new()).eval(source)
    }

    fn number(source: &str) -> f64 {
        eval(source).unwrap().as_number().unwrap()
    }

    // --- arithmetic ---

    #[test]
    fn precedence_and_associativity() {
        assert!((number("1 + 2 * 3") - 7.0).abs() < f64::EPSILON);
        assert!((number("2 ^ 3 ^ 2") - 512.0).abs() < f64::EPSILON);
        assert!((number("(2 ^ 3) ^ 2") - 64.0).abs() < f64::EPSILON);
        assert!((number("10 - 4 - 3") - 3.0).abs() < f64::EPSILON);
        assert!((number("-2 ^ 2") - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn division_by_zero() {
        assert!(matches!(eval("10 / 0"), Err(Error::DivisionByZero)));
        assert!(matches!(eval("10 % 0"), Err(Error::ModuloByZero)));
    }

    #[test]
    fn float_equality_uses_tolerance() {
        assert_eq!(eval("0.1 + 0.2 == 0.3").unwrap(), Value::Bool(true));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(eval(r#""ab" + "cd""#).unwrap(), Value::string("abcd"));
        assert_eq!(eval(r#""n" + 1"#).unwrap(), Value::string("n1"));
    }

    // --- control flow ---

    #[test]
    fn and_short_circuits() {
        let h = Harness::new(Record::new());
        assert_eq!(h.eval("false && tick()").unwrap(), Value::Bool(false));
        assert_eq!(h.calls(), 0);
        assert_eq!(h.eval("true && tick()").unwrap(), Value::Bool(true));
        assert_eq!(h.calls(), 1);
    }

    #[test]
    fn or_short_circuits() {
        let h = Harness::new(Record::new());
        assert_eq!(h.eval("true || tick()").unwrap(), Value::Bool(true));
        assert_eq!(h.calls(), 0);
    }

    #[test]
    fn conditional_runs_one_branch() {
        let h = Harness::new(Record::new());
        h.eval("1 > 0 ? 1 : tick()").unwrap();
        assert_eq!(h.calls(), 0);
        h.eval("1 < 0 ? 1 : tick()").unwrap();
        assert_eq!(h.calls(), 1);
    }

    #[test]
    fn if_function_is_eager() {
        let h = Harness::new(Record::new());
        h.eval("if(true, 1, tick())").unwrap();
        assert_eq!(h.calls(), 1);
    }

    #[test]
    fn guarded_division() {
        let source = "x == 0 ? 0 : 10 / x";
        let zero = Harness::new(Record::new().set("x", 0_i64));
        assert_eq!(zero.eval(source).unwrap(), Value::Number(0.0));
        let two = Harness::new(Record::new().set("x", 2_i64));
        assert_eq!(two.eval(source).unwrap(), Value::Number(5.0));
    }

    // --- arrays ---

    #[test]
    fn array_indexing() {
        assert!((number("[[1,2],[3,4]][1][0]") - 3.0).abs() < f64::EPSILON);
        assert!((number("[10,20,30][1 + 1]") - 30.0).abs() < f64::EPSILON);
        assert!(matches!(
            eval("[1, 2][2]"),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn aggregates() {
        assert!((number("sum([1,2,3,4,5])") - 15.0).abs() < f64::EPSILON);
        assert!((number("avg([1,2,3,4,5])") - 3.0).abs() < f64::EPSILON);
        assert!((number("round(sqrt(pow(3,2) + pow(4,2)), 2)") - 5.0).abs() < f64::EPSILON);
    }

    // --- variables and functions ---

    #[test]
    fn identifiers_read_host_fields() {
        let h = Harness::new(Record::new().set("weight", 12.5));
        assert_eq!(h.eval("weight * 2").unwrap(), Value::Number(25.0));
        assert!(matches!(
            h.eval("missing + 1"),
            Err(Error::UnknownVariable { .. })
        ));
    }

    #[test]
    fn unknown_function() {
        assert!(matches!(
            eval("unknown(1)"),
            Err(Error::UnknownFunction { name }) if name == "unknown"
        ));
    }
}
