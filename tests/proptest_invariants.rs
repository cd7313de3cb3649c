
use std::sync::Arc;

use formulary::{parse, EntityContext, Error, Evaluator, VariableRegistry};
use proptest::prelude::*;
use strategies::{arb_expr, arb_number, arb_shipment};

fn evaluator() -> Evaluator {
    Evaluator::new(Arc::new(VariableRegistry::new()))
}

/// Outcomes compared by value, or by error text when evaluation fails.
fn outcome(result: Result<f64, Error>) -> Result<u64, String> {
    result.map(f64::to_bits).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Invariant 1: Determinism
//
// The same expression and context always produce the same result or error.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn determinism(expr in arb_expr(4), ctx in arb_shipment()) {
        let ev = evaluator();
        let source = expr.to_string();
        let first = outcome(ev.evaluate(&source, &ctx));
        for _ in 0..3 {
            let again = outcome(ev.evaluate(&source, &ctx));
            prop_assert_eq!(&first, &again, "determinism violated for {}", source);
        }
    }

    #[test]
    fn determinism_across_evaluators(expr in arb_expr(4), ctx in arb_shipment()) {
        let source = expr.to_string();
        let a = outcome(evaluator().evaluate(&source, &ctx));
        let b = outcome(evaluator().evaluate(&source, &ctx));
        prop_assert_eq!(a, b);
    }
}

// ---------------------------------------------------------------------------
// Invariant 2: Display round-trip
//
// Parsing the rendered form of a tree gives back the same tree.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn display_round_trip(expr in arb_expr(5)) {
        let rendered = expr.to_string();
        let reparsed = parse(&rendered).unwrap();
        prop_assert_eq!(&reparsed, &expr);
        prop_assert_eq!(reparsed.to_string(), rendered);
    }
}

// ---------------------------------------------------------------------------
// Invariant 3: Every evaluation path agrees
//
// Cached, traced and batch evaluation return the plain result.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn traced_matches_plain(expr in arb_expr(3), ctx in arb_shipment()) {
        let ev = evaluator();
        let source = expr.to_string();
        let plain = outcome(ev.evaluate(&source, &ctx));
        let traced = outcome(ev.evaluate_traced(&source, &ctx).into_result());
        prop_assert_eq!(plain, traced);
    }

    #[test]
    fn batch_matches_sequential(
        expr in arb_expr(3),
        contexts in prop::collection::vec(arb_shipment(), 1..12),
    ) {
        let ev = evaluator();
        let source = expr.to_string();
        let (results, _) = ev.evaluate_batch(&source, &contexts);
        prop_assert_eq!(results.len(), contexts.len());
        for (ctx, batch) in contexts.iter().zip(&results) {
            let single = ev.evaluate(&source, ctx).unwrap_or(0.0);
            prop_assert_eq!(single.to_bits(), batch.to_bits());
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant 4: Numeric equality tolerates rounding
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn addition_commutes_under_equality(a in arb_number(), b in arb_number()) {
        let ev = evaluator();
        let host = EntityContext::empty();
        let source = format!("{a} + {b} == {b} + {a}");
        prop_assert!((ev.evaluate(&source, &host).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn subtraction_undoes_addition(a in arb_number(), b in arb_number()) {
        let ev = evaluator();
        let host = EntityContext::empty();
        let source = format!("({a} + {b}) - {b} == {a}");
        prop_assert!((ev.evaluate(&source, &host).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn comparison_is_consistent(a in arb_number(), b in arb_number()) {
        let ev = evaluator();
        let host = EntityContext::empty();
        let lt = ev.evaluate(&format!("{a} < {b}"), &host).unwrap();
        let gte = ev.evaluate(&format!("{a} >= {b}"), &host).unwrap();
        prop_assert!((lt + gte - 1.0).abs() < f64::EPSILON);
    }
}
