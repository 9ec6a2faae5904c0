//! The token vocabulary (§3.1). A token has a kind, an exact lexeme
//! ("image"), an optional literal value, an optional note (for error
//! tokens), and a span into the code source.

use num_bigint::BigInt;

use crate::common::multiphase::Identifier;
use crate::lexing::source::Span;

#[derive(Clone, Debug)]
pub enum Literal {
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(String),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            // Compared bitwise rather than with `==` so that this total
            // equality can back `Eq` for the token buffer's lookahead
            // (§4.3 needs `Token: Eq` for `PeekableBuffer`); two tokenized
            // floats are only ever equal here if they came from identical
            // source text, so NaN's usual inequality with itself doesn't
            // come up in practice.
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::Str(a), Literal::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TokenKind {
    Punc,
    Op,
    Keyword,
    Id,
    Lit,
    Error,
    Eof,
}

/// A single scanned token. `image` is the exact source text; for `Id` and
/// `Keyword` tokens it doubles as the name/keyword spelling, for `Punc`/`Op`
/// tokens it is the punctuation/operator spelling, and for `Lit` tokens it is
/// the original, un-coerced source spelling (useful for round-tripping, §8).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub image: String,
    pub literal: Option<Literal>,
    pub note: Option<String>,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, image: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            image: image.into(),
            literal: None,
            note: None,
            span,
        }
    }

    pub fn literal(kind: TokenKind, image: impl Into<String>, literal: Literal, span: Span) -> Self {
        Self {
            kind,
            image: image.into(),
            literal: Some(literal),
            note: None,
            span,
        }
    }

    pub fn error(image: impl Into<String>, note: impl Into<String>, span: Span) -> Self {
        Self {
            kind: TokenKind::Error,
            image: image.into(),
            literal: None,
            note: Some(note.into()),
            span,
        }
    }

    pub fn eof(span: Span) -> Self {
        Self {
            kind: TokenKind::Eof,
            image: String::new(),
            literal: None,
            note: None,
            span,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.image == word
    }

    pub fn is_punc(&self, punc: &str) -> bool {
        self.kind == TokenKind::Punc && self.image == punc
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.image == op
    }

    /// Panics if this is not an `Id` token; callers only do this after
    /// checking `kind`.
    pub fn identifier(&self) -> Identifier {
        debug_assert_eq!(self.kind, TokenKind::Id);
        Identifier::from(self.image.as_str())
    }
}

impl Default for Token {
    /// EOF is the default so that lookahead slots in the token buffer can be
    /// filled with a harmless placeholder before the tokenizer supplies the
    /// real token (mirrors the teacher's `Token::Eof` default, §4.3).
    fn default() -> Self {
        Token::eof(Span::default())
    }
}
