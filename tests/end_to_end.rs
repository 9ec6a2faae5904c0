//! Crate-level integration tests for the concrete end-to-end scenarios and
//! a few of the boundary cases this language's behavior is pinned down by.
//! Unit tests beside each stage module cover everything else; these exist
//! because only the full pipeline (tokenize -> parse -> check -> evaluate)
//! can exercise a whole program the way a user actually runs one.

use pretty_assertions::assert_eq;

use num_bigint::BigInt;

use yoku::diagnostics::DiagnosticKind;
use yoku::driver::{run_module, Repl, StepOutcome};
use yoku::value::Value;

fn eval_ok(src: &str) -> Value {
    let mut out = Vec::new();
    run_module("<test>", src, &mut out).expect("source runs without error")
}

fn as_int(value: &Value) -> BigInt {
    match value {
        Value::Int(n) => n.clone(),
        other => panic!("expected an Int, got {other:?}"),
    }
}

#[test]
fn arithmetic_respects_precedence() {
    assert_eq!(as_int(&eval_ok("1 + 2 * 3;")), BigInt::from(7));
}

#[test]
fn a_closure_captures_its_defining_scope_across_two_calls() {
    let value = eval_ok(
        "var mk = proc (x: Int) -> proc (Int) -> Int { proc (y: Int) -> Int { x + y } }; \
         mk(3)(4);",
    );
    assert_eq!(as_int(&value), BigInt::from(7));
}

#[test]
fn enum_construction_and_match_dispatch_on_the_matching_variant() {
    let value = eval_ok(
        "enum Color { Red, Green, Blue }; \
         match Color.Red { \
             Color.Red => 1, \
             Color.Green => 2, \
             Color.Blue => 3, \
         };",
    );
    assert_eq!(as_int(&value), BigInt::from(1));
}

#[test]
fn a_labeled_break_unwinds_past_an_inner_unlabeled_loop_without_firing_the_assert() {
    let value = eval_ok("loop outer { loop { break outer; }; assert false; };");
    assert!(matches!(value, Value::Unit));
}

#[test]
fn a_type_failure_names_both_the_offending_and_the_expected_type() {
    let mut out = Vec::new();
    let diagnostic = run_module("<test>", "var x: Int = \"hi\";", &mut out).unwrap_err();
    assert!(diagnostic.note.contains("Str"));
    assert!(diagnostic.note.contains("Int"));
}

#[test]
fn repl_increment_matches_the_three_line_walkthrough() {
    let mut repl = Repl::new("<repl>", Box::new(Vec::<u8>::new()));
    assert!(matches!(repl.submit("if 1 == 1 {"), StepOutcome::NeedsMoreInput));
    assert!(matches!(repl.submit("  3"), StepOutcome::NeedsMoreInput));
    match repl.submit("} else { 4 }") {
        StepOutcome::Value(v) => assert_eq!(as_int(&v), BigInt::from(3)),
        _ => panic!("the third line should have completed the statement"),
    }
}

#[test]
fn an_empty_tuple_is_unit_and_a_one_tuple_needs_a_trailing_comma() {
    assert!(matches!(eval_ok("();"), Value::Unit));
    match eval_ok("(1,);") {
        Value::Tuple(items, _) => assert_eq!(items.len(), 1),
        other => panic!("expected a tuple, got {other:?}"),
    }
}

#[test]
fn assignment_to_a_const_binding_is_a_scope_error_not_a_type_error() {
    let mut out = Vec::new();
    let diagnostic = run_module("<test>", "const x = 1; x = 2;", &mut out).unwrap_err();
    assert_eq!(diagnostic.kind, DiagnosticKind::Scope);
}

#[test]
fn match_falls_through_to_unit_when_no_case_and_no_else_matches() {
    let value = eval_ok("match 5 { 1 => 10, 2 => 20, };");
    assert!(matches!(value, Value::Unit));
}
