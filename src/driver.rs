//! The session driver (§4.6): wires the tokenizer, parser, checker, and
//! evaluator into the two ways this language is actually run. Module mode
//! parses, checks, and evaluates a whole source string and stops at the
//! first error. REPL mode keeps a checker and an evaluator alive across
//! many inputs, re-parsing a small growing buffer of not-yet-complete
//! input and treating end-of-stream as a request for another line rather
//! than a hard error.

use std::io::Write;

use crate::checker::Checker;
use crate::diagnostics::Diagnostic;
use crate::eval::Evaluator;
use crate::lexing::source::CodeSource;
use crate::lexing::Tokens;
use crate::parsing::Parser;
use crate::value::Value;

/// Runs `source` as a complete module (§4.6): any stage failing aborts the
/// run. `out` receives whatever the source's `print` calls write.
pub fn run_module(path: &str, source: &str, out: &mut dyn Write) -> Result<Value, Diagnostic> {
    let tokens = Tokens::new(CodeSource::new(path, source));
    let mut parser = Parser::new(tokens);
    let root = parser.parse_root().map_err(|e| e.into_diagnostic(path))?;

    let mut checker = Checker::new(path);
    checker.check_root(&root)?;

    let mut evaluator = Evaluator::new(
        checker.arena.clone(),
        checker.type_scope.clone(),
        path.to_string(),
        false,
        Box::new(out),
    );
    evaluator.eval_root(&root)
}

/// What one submitted REPL input did (§4.6, §6.2).
pub enum StepOutcome {
    /// A complete statement checked and evaluated; here is its value.
    Value(Value),
    /// The accumulated input parsed as far as it went but ran out of
    /// tokens mid-construct; the caller should prompt for a continuation
    /// line and resubmit with more text.
    NeedsMoreInput,
    /// A lex, parse, scope, type, or runtime error, paired with the
    /// accumulated source text it was raised against (for `diagnostics::
    /// render`'s caret excerpt). The session has already reset itself back
    /// to the state it had before this input (§4.6, §5).
    Failed(Diagnostic, String),
}

/// A long-lived interactive session (§4.6, §5): one checker and one
/// evaluator shared across every accepted input, so `var`, `proc`, `struct`,
/// and `enum` declarations from earlier inputs stay visible to later ones.
///
/// Each line is parsed by re-tokenizing the whole not-yet-complete buffer
/// from scratch rather than trying to resume a partially consumed token
/// stream: the parser has no token-level rollback, so a failed attempt at
/// "is this enough input yet?" cannot leave half of a statement already
/// discarded from the stream it would need to retry against.
pub struct Repl {
    path: String,
    buffer: String,
    checker: Checker,
    evaluator: Evaluator,
}

impl Repl {
    pub fn new(path: impl Into<String>, out: Box<dyn Write>) -> Self {
        let path = path.into();
        let checker = Checker::new(path.clone());
        let evaluator = Evaluator::new(checker.arena.clone(), checker.type_scope.clone(), path.clone(), false, out);
        Self {
            path,
            buffer: String::new(),
            checker,
            evaluator,
        }
    }

    /// Feeds one line of user input into the session (§4.6, §6.2).
    pub fn submit(&mut self, line: &str) -> StepOutcome {
        if self.buffer.is_empty() {
            self.buffer.push_str(line);
        } else {
            self.buffer.push('\n');
            self.buffer.push_str(line);
        }

        let attempted_source = self.buffer.clone();
        let tokens = Tokens::new(CodeSource::new(self.path.clone(), attempted_source.as_str()));
        let mut parser = Parser::new(tokens);
        let root = match parser.parse_root() {
            Ok(root) => root,
            Err(e) => {
                let diagnostic = e.into_diagnostic(self.path.as_str());
                if diagnostic.needs_more_input {
                    return StepOutcome::NeedsMoreInput;
                }
                self.buffer.clear();
                return StepOutcome::Failed(diagnostic, attempted_source);
            }
        };
        self.buffer.clear();

        // Transactional: a failed check must not leave partial bindings
        // behind for the next input (§4.6, §5).
        let type_snapshot = self.checker.type_scope.snapshot();
        let value_snapshot = self.checker.value_scope.snapshot();
        if let Err(diagnostic) = self.checker.check_root(&root) {
            self.checker.type_scope.restore(type_snapshot);
            self.checker.value_scope.restore(value_snapshot);
            return StepOutcome::Failed(diagnostic, attempted_source);
        }

        // The checker may have declared new struct/enum types this input;
        // hand the evaluator the same arena and type scope so it resolves
        // them identically (`EnumInit`, `declare_module_value`).
        self.evaluator.arena = self.checker.arena.clone();
        self.evaluator.type_scope = self.checker.type_scope.clone();

        match self.evaluator.eval_root(&root) {
            Ok(value) => StepOutcome::Value(value),
            Err(diagnostic) => StepOutcome::Failed(diagnostic, attempted_source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_mode_runs_a_complete_source_to_a_value() {
        let mut out = Vec::new();
        let value = run_module("<test>", "1 + 2 * 3;", &mut out).unwrap();
        assert!(matches!(value, Value::Int(n) if n == num_bigint::BigInt::from(7)));
    }

    #[test]
    fn module_mode_aborts_on_the_first_type_error() {
        let mut out = Vec::new();
        let diagnostic = run_module("<test>", "var x: Int = \"hi\";", &mut out).unwrap_err();
        assert!(diagnostic.note.contains("Str") && diagnostic.note.contains("Int"));
    }

    #[test]
    fn repl_accumulates_a_statement_split_across_lines() {
        let mut repl = Repl::new("<repl>", Box::new(Vec::<u8>::new()));
        assert!(matches!(repl.submit("if 1 == 1 {"), StepOutcome::NeedsMoreInput));
        assert!(matches!(repl.submit("  3"), StepOutcome::NeedsMoreInput));
        match repl.submit("} else { 4 }") {
            StepOutcome::Value(Value::Int(n)) => assert_eq!(n, num_bigint::BigInt::from(3)),
            StepOutcome::Value(_) => panic!("expected an Int value"),
            StepOutcome::NeedsMoreInput => panic!("should have completed on the third line"),
            StepOutcome::Failed(d, _) => panic!("unexpected failure: {}", d.note),
        }
    }

    #[test]
    fn repl_bindings_persist_across_inputs() {
        let mut repl = Repl::new("<repl>", Box::new(Vec::<u8>::new()));
        assert!(matches!(repl.submit("var x = 10;"), StepOutcome::Value(_)));
        match repl.submit("x + 1;") {
            StepOutcome::Value(Value::Int(n)) => assert_eq!(n, num_bigint::BigInt::from(11)),
            _ => panic!("expected x to still be bound"),
        }
    }

    #[test]
    fn repl_resets_after_a_failed_check_without_leaking_bindings() {
        let mut repl = Repl::new("<repl>", Box::new(Vec::<u8>::new()));
        assert!(matches!(repl.submit("var y: Int = \"oops\";"), StepOutcome::Failed(_, _)));
        match repl.submit("y;") {
            StepOutcome::Failed(_, _) => {}
            _ => panic!("y should not have been declared after the failed check"),
        }
    }

    #[test]
    fn repl_struct_declared_in_one_input_is_usable_in_the_next() {
        let mut repl = Repl::new("<repl>", Box::new(Vec::<u8>::new()));
        assert!(matches!(repl.submit("struct Point { mut x: Int };"), StepOutcome::Value(_)));
        assert!(matches!(repl.submit("var p = Point { x = 1 };"), StepOutcome::Value(_)));
        match repl.submit("p.x;") {
            StepOutcome::Value(Value::Int(n)) => assert_eq!(n, num_bigint::BigInt::from(1)),
            _ => panic!("expected the struct instance's field back"),
        }
    }
}
