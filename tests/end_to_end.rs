use std::sync::Arc;

use formulary::{
    EntityContext, ErrorKind, Evaluator, Record, Variable, VariableRegistry, VariableSource,
    MAX_COMPLEXITY,
};

fn evaluator() -> Evaluator {
    Evaluator::new(Arc::new(VariableRegistry::new()))
}

fn eval(source: &str) -> f64 {
    evaluator()
        .evaluate(source, &EntityContext::empty())
        .unwrap_or_else(|e| panic!("{source}: {e}"))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// --- arithmetic scenarios ---

#[test]
fn operator_precedence() {
    assert_close(eval("1 + 2 * 3"), 7.0);
    assert_close(eval("(1 + 2) * 3"), 9.0);
    assert_close(eval("10 - 2 - 3"), 5.0);
    assert_close(eval("7 % 4 + 1"), 4.0);
}

#[test]
fn power_is_right_associative() {
    assert_close(eval("2 ^ 3 ^ 2"), 512.0);
    assert_close(eval("(2 ^ 3) ^ 2"), 64.0);
}

#[test]
fn nested_function_calls() {
    assert_close(eval("round(sqrt(pow(3, 2) + pow(4, 2)), 2)"), 5.0);
    assert_close(eval("max(1, min(5, 3), abs(-2))"), 3.0);
}

#[test]
fn aggregates_over_arrays() {
    assert_close(eval("sum([1, 2, 3, 4, 5])"), 15.0);
    assert_close(eval("avg([1, 2, 3, 4, 5])"), 3.0);
    assert_close(eval("len([1, 2, 3,])"), 3.0);
    assert_close(eval("sum([])"), 0.0);
}

#[test]
fn array_indexing() {
    assert_close(eval("[[1, 2], [3, 4]][1][0]"), 3.0);
    assert_close(eval("[10, 20, 30][1 + 1]"), 30.0);
    assert_close(eval("[10, 20, 30][1.9]"), 20.0);
}

#[test]
fn floating_point_equality() {
    assert_close(eval("0.1 + 0.2 == 0.3"), 1.0);
    assert_close(eval("0.1 + 0.2 != 0.3"), 0.0);
}

// --- pricing scenarios ---

#[test]
fn tiered_rate() {
    let ev = evaluator();
    let source = "weight > 1000 ? 3.0 : 2.0";
    let heavy = EntityContext::new(Record::new().set("weight", 1500_i64));
    let light = EntityContext::new(Record::new().set("weight", 500_i64));
    assert_close(ev.evaluate(source, &heavy).unwrap(), 3.0);
    assert_close(ev.evaluate(source, &light).unwrap(), 2.0);
}

#[test]
fn guarded_division() {
    let ev = evaluator();
    let source = "x == 0 ? 0 : 10 / x";
    let zero = EntityContext::new(Record::new().set("x", 0_i64));
    let two = EntityContext::new(Record::new().set("x", 2_i64));
    assert_close(ev.evaluate(source, &zero).unwrap(), 0.0);
    assert_close(ev.evaluate(source, &two).unwrap(), 5.0);
}

#[test]
fn registered_variables_drive_a_formula() {
    let registry = Arc::new(VariableRegistry::new());
    registry
        .register(
            Variable::field("weight_kg", "shipment.weight")
                .source(VariableSource::Shipment)
                .description("billable weight"),
        )
        .unwrap();
    registry
        .register(Variable::constant("fuel_pct", 12.5).source(VariableSource::Environment))
        .unwrap();
    let ev = Evaluator::new(registry);

    let ctx = EntityContext::new(Record::new().set("shipment.weight", 200_i64));
    let total = ev
        .evaluate("weight_kg * 0.5 * (1 + fuel_pct / 100)", &ctx)
        .unwrap();
    assert_close(total, 112.5);
}

#[test]
fn string_comparison_in_condition() {
    let ev = evaluator();
    let ctx = EntityContext::new(Record::new().set("zone", "remote").set("base", 40_i64));
    let total = ev
        .evaluate(r#"zone == "remote" ? base + 15 : base"#, &ctx)
        .unwrap();
    assert_close(total, 55.0);
}

#[test]
fn coalesce_and_conversions() {
    assert_close(eval(r#"coalesce(0, "", 7)"#), 7.0);
    assert_close(eval(r#"number("12.5") + 1"#), 13.5);
    assert_close(eval(r#"len(string(1234))"#), 4.0);
    assert_close(eval("bool(0) || bool(2)"), 1.0);
}

// --- error scenarios ---

fn error_kind(source: &str) -> ErrorKind {
    evaluator()
        .evaluate(source, &EntityContext::empty())
        .unwrap_err()
        .kind()
}

#[test]
fn division_by_zero_is_an_error() {
    assert_eq!(error_kind("10 / 0"), ErrorKind::DivisionByZero);
}

#[test]
fn unknown_function_is_an_error() {
    assert_eq!(error_kind("unknown(1)"), ErrorKind::UnknownFunction);
}

#[test]
fn missing_paren_reports_position() {
    let err = evaluator()
        .evaluate("(2 + 3", &EntityContext::empty())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
    let message = err.to_string();
    assert!(message.contains("')'"), "{message}");
    assert!(message.contains("column 7"), "{message}");
    assert_eq!(err.span().map(|s| s.column), Some(7));
}

#[test]
fn oversize_source_is_rejected() {
    let source = format!("1{}", " ".repeat(10_000));
    assert_eq!(error_kind(&source), ErrorKind::TokenizationError);
}

#[test]
fn complexity_cap_is_enforced() {
    let source = vec!["1"; MAX_COMPLEXITY / 3 + 2].join(" + ");
    assert_eq!(error_kind(&source), ErrorKind::ComplexityExceeded);
}

#[test]
fn non_numeric_result_is_a_coercion_error() {
    assert_eq!(error_kind("[1, 2]"), ErrorKind::TypeCoercionError);
}

#[test]
fn index_out_of_range() {
    assert_eq!(error_kind("[1, 2, 3][3]"), ErrorKind::IndexOutOfRange);
    assert_eq!(error_kind("[1, 2, 3][-1]"), ErrorKind::IndexOutOfRange);
}
