//! Diagnostics (§6.4, §7): one taxonomy shared by every stage, rendered with
//! `miette` for the `path:line:column` plus highlighted-excerpt presentation
//! the REPL and module runner both use.

use miette::{Diagnostic as MietteDiagnostic, LabeledSpan};
use thiserror::Error;

use crate::lexing::source::{CodeSource, Span};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiagnosticKind {
    Lex,
    Parse,
    Scope,
    Type,
    Runtime,
}

/// A single diagnostic (§6.4): `{ kind, note, path, start, end,
/// needsMoreInput? }`. `needs_more_input` is only ever set on `Parse`
/// diagnostics raised at end-of-stream (§4.3).
#[derive(Debug, Error)]
#[error("{note}")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub note: String,
    pub path: String,
    pub span: Span,
    pub needs_more_input: bool,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, note: impl Into<String>, path: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            note: note.into(),
            path: path.into(),
            span,
            needs_more_input: false,
        }
    }

    pub fn needs_more_input(path: impl Into<String>, span: Span) -> Self {
        Self {
            kind: DiagnosticKind::Parse,
            note: "more input needed to complete this statement".to_string(),
            path: path.into(),
            span,
            needs_more_input: true,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            DiagnosticKind::Lex => "lex error",
            DiagnosticKind::Parse => "parse error",
            DiagnosticKind::Scope => "scope error",
            DiagnosticKind::Type => "type error",
            DiagnosticKind::Runtime => "runtime error",
        }
    }
}

impl MietteDiagnostic for Diagnostic {
    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let len = self.span.end.saturating_sub(self.span.start).max(1);
        Some(Box::new(std::iter::once(LabeledSpan::new(
            Some(self.kind_label().to_string()),
            self.span.start,
            len,
        ))))
    }
}

/// Renders `path:line:column`, a highlighted excerpt with a caret span, and
/// the note (§6.4), using the code source to look up line/column and the
/// source excerpt.
pub fn render(diagnostic: &Diagnostic, source: &CodeSource) -> String {
    let line_col = source.line_col(diagnostic.span.start);
    let line = source.line_containing(diagnostic.span.start);
    let caret_column = line_col.column.saturating_sub(1);
    let width = diagnostic
        .span
        .end
        .saturating_sub(diagnostic.span.start)
        .max(1);
    let caret = format!("{}{}", " ".repeat(caret_column), "^".repeat(width));
    format!(
        "{}:{}:{}: {}: {}\n{}\n{}",
        source.path(),
        line_col.line,
        line_col.column,
        diagnostic.kind_label(),
        diagnostic.note,
        line,
        caret,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_path_line_column_and_note() {
        let source = CodeSource::new("script.yk", "var x = 1;\nvar y: Int = \"hi\";");
        let span = Span::new(11, 14);
        let diagnostic = Diagnostic::new(DiagnosticKind::Type, "expected Int, found Str", "script.yk", span);
        let rendered = render(&diagnostic, &source);
        assert!(rendered.starts_with("script.yk:2:1"));
        assert!(rendered.contains("expected Int, found Str"));
    }

    #[test]
    fn needs_more_input_diagnostic_is_flagged() {
        let diagnostic = Diagnostic::needs_more_input("<repl>", Span::new(5, 5));
        assert!(diagnostic.needs_more_input);
        assert_eq!(diagnostic.kind, DiagnosticKind::Parse);
    }
}
