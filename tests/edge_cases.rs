use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use formulary::{
    CancellationToken, EntityContext, Error, ErrorKind, Evaluator, EvaluatorBuilder,
    FunctionDescriptor, Limits, Record, Value, Variable, VariableRegistry,
};

fn evaluator() -> Evaluator {
    Evaluator::new(Arc::new(VariableRegistry::new()))
}

fn with_limits(limits: Limits) -> Evaluator {
    EvaluatorBuilder::new()
        .variables(Arc::new(VariableRegistry::new()))
        .limits(limits)
        .build()
}

fn kind(ev: &Evaluator, source: &str) -> ErrorKind {
    ev.evaluate(source, &EntityContext::empty())
        .unwrap_err()
        .kind()
}

// --- tokenizer and parser ---

#[test]
fn empty_expression() {
    assert_eq!(kind(&evaluator(), ""), ErrorKind::ParseError);
    assert_eq!(kind(&evaluator(), "   "), ErrorKind::ParseError);
}

#[test]
fn lone_operators_are_tokenization_errors() {
    for source in ["a = 1", "a & b", "a | b", "1 $ 2", "12abc"] {
        assert_eq!(kind(&evaluator(), source), ErrorKind::TokenizationError, "{source}");
    }
}

#[test]
fn bad_string_escapes() {
    assert_eq!(kind(&evaluator(), r#""a\qb""#), ErrorKind::TokenizationError);
    assert_eq!(kind(&evaluator(), r#""open"#), ErrorKind::TokenizationError);
}

#[test]
fn string_escapes_are_decoded() {
    let ev = evaluator();
    let n = ev
        .evaluate(r#"len("a\"b\\c\n")"#, &EntityContext::empty())
        .unwrap();
    assert!((n - 6.0).abs() < f64::EPSILON);
}

#[test]
fn trailing_tokens() {
    assert_eq!(kind(&evaluator(), "1 2"), ErrorKind::ParseError);
    assert_eq!(kind(&evaluator(), "(1))"), ErrorKind::ParseError);
}

#[test]
fn missing_ternary_colon() {
    let err = evaluator()
        .evaluate("true ? 1 2", &EntityContext::empty())
        .unwrap_err();
    assert!(err.to_string().contains("':'"), "{err}");
}

#[test]
fn exponent_literals() {
    let ev = evaluator();
    let n = ev.evaluate("1.5e3 + 2E-1", &EntityContext::empty()).unwrap();
    assert!((n - 1500.2).abs() < 1e-9);
    assert_eq!(kind(&ev, "1e"), ErrorKind::TokenizationError);
}

// --- runtime limits ---

#[test]
fn evaluation_count_limit() {
    let ev = evaluator();
    ev.register_function(FunctionDescriptor::new("spin", 0, Some(0), |ctx, _| {
        for _ in 0..20_000 {
            ctx.call_function("abs", &[Value::Number(-1.0)])?;
        }
        Ok(Value::Number(0.0))
    }));
    assert_eq!(
        kind(&ev, "spin()"),
        ErrorKind::EvaluationComplexityExceeded
    );
}

#[test]
fn timeout_is_reported() {
    let ev = with_limits(Limits {
        timeout: Duration::from_millis(10),
        ..Limits::default()
    });
    ev.register_function(FunctionDescriptor::pure("slow", 0, Some(0), |_| {
        std::thread::sleep(Duration::from_millis(30));
        Ok(Value::Number(1.0))
    }));
    assert_eq!(kind(&ev, "slow() + abs(1)"), ErrorKind::EvaluationTimeout);
}

#[test]
fn memory_limit_is_reported() {
    let ev = with_limits(Limits {
        memory_limit: 64,
        ..Limits::default()
    });
    let ctx = EntityContext::new(Record::new().set("note", "x".repeat(100)));
    let err = ev.evaluate("len(note) + 1", &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvaluationMemoryExceeded);
}

#[test]
fn depth_limit_is_reported() {
    let ev = evaluator();
    ev.register_function(FunctionDescriptor::new("dive", 0, Some(0), |ctx, _| {
        ctx.call_function("dive", &[])
    }));
    let err = ev.evaluate("dive()", &EntityContext::empty()).unwrap_err();
    assert!(matches!(err, Error::DepthExceeded { max: 50 }));
}

#[test]
fn cancellation_mid_evaluation() {
    let ev = evaluator();
    let token = CancellationToken::new();
    let trigger = token.clone();
    ev.register_function(FunctionDescriptor::pure("stop", 0, Some(0), move |_| {
        trigger.cancel();
        Ok(Value::Number(1.0))
    }));
    let err = ev
        .evaluate_with_cancellation("stop() + abs(1)", &EntityContext::empty(), &token)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvaluationCancelled);
    assert!(token.is_cancelled());
}

// --- variables ---

#[test]
fn unknown_variable() {
    let ctx = EntityContext::new(Record::new().set("weight", 1_i64));
    let err = evaluator().evaluate("volume * 2", &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownVariable);
}

#[test]
fn resolver_failure_keeps_its_cause() {
    let registry = Arc::new(VariableRegistry::new());
    registry
        .register(Variable::new("rate", |_| {
            Err(Error::InvalidArgument {
                message: "rate service unavailable".into(),
            })
        }))
        .unwrap();
    let err = Evaluator::new(registry)
        .evaluate("rate * 2", &EntityContext::empty())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VariableResolutionError);
    let cause = err.source().unwrap().to_string();
    assert!(cause.contains("rate service unavailable"), "{cause}");
}

#[test]
fn validator_failure() {
    let registry = Arc::new(VariableRegistry::new());
    registry
        .register(Variable::field("weight", "weight").validator(|v| match v {
            Value::Number(n) if *n >= 0.0 => Ok(()),
            _ => Err(Error::InvalidArgument {
                message: "weight must be non-negative".into(),
            }),
        }))
        .unwrap();
    let ev = Evaluator::new(registry);
    let ok = EntityContext::new(Record::new().set("weight", 5_i64));
    let bad = EntityContext::new(Record::new().set("weight", -5_i64));
    assert!((ev.evaluate("weight", &ok).unwrap() - 5.0).abs() < f64::EPSILON);
    assert_eq!(
        ev.evaluate("weight", &bad).unwrap_err().kind(),
        ErrorKind::VariableValidationError
    );
}

#[test]
fn null_fields_short_circuit() {
    let ctx = EntityContext::new(Record::new().set("customer", formulary::HostValue::Null));
    let ev = evaluator();
    ev.register_variable(Variable::field("tier", "customer.tier"))
        .unwrap();
    assert!((ev.evaluate("coalesce(tier, 3)", &ctx).unwrap() - 3.0).abs() < f64::EPSILON);
}

// --- functions ---

#[test]
fn arity_is_checked() {
    let err = evaluator()
        .evaluate("pow(2)", &EntityContext::empty())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArityError);
    assert_eq!(err.to_string(), "function 'pow' expects 2 arguments, got 1");
}

#[test]
fn function_names_are_case_sensitive() {
    assert_eq!(kind(&evaluator(), "ABS(1)"), ErrorKind::UnknownFunction);
}

#[test]
fn user_function_replaces_builtin() {
    let ev = evaluator();
    ev.register_function(FunctionDescriptor::pure("abs", 1, Some(1), |_| {
        Ok(Value::Number(42.0))
    }));
    let n = ev.evaluate("abs(-1)", &EntityContext::empty()).unwrap();
    assert!((n - 42.0).abs() < f64::EPSILON);
}

#[test]
fn overflow_is_reported() {
    assert_eq!(kind(&evaluator(), "10 ^ 400"), ErrorKind::Overflow);
    assert_eq!(kind(&evaluator(), "sqrt(-4)"), ErrorKind::InvalidArgument);
}
