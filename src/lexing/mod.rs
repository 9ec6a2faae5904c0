//! Tokenizing and the lookahead buffer between it and the parser.
//!
//! This module is deliberately much flatter than the teacher's: there is no
//! lexer thread or channel (§5 drops the teacher's concurrency model), so the
//! lookahead buffer just pulls directly from a [`lexer::Tokenizer`] as the
//! parser asks for more tokens.

mod char_escapes;
mod keywords;

pub mod lexer;
pub mod source;
pub mod token;

use std::collections::VecDeque;
use std::ops::Index;

use crate::common::peekable_buffer::PeekableBuffer;
use crate::lexing::lexer::Tokenizer;
use crate::lexing::source::CodeSource;
use crate::lexing::token::{Token, TokenKind};

/// A contiguous run of tokens read out of a [`Tokens`] buffer by `read_many`.
pub struct TokenReadMany(Vec<Token>);

impl Index<usize> for TokenReadMany {
    type Output = Token;

    fn index(&self, index: usize) -> &Token {
        &self.0[index]
    }
}

/// The token buffer sitting between the tokenizer and the parser (§4.3),
/// giving the parser unbounded lookahead without it knowing how tokens are
/// actually produced. Tokens are pulled from the tokenizer lazily, one at a
/// time, and cached in `lookahead` until the parser consumes them.
pub struct Tokens {
    tokenizer: Tokenizer,
    lookahead: VecDeque<Token>,
    exhausted: bool,
}

impl Tokens {
    pub fn new(source: CodeSource) -> Self {
        Self {
            tokenizer: Tokenizer::new(source),
            lookahead: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self, n: usize) {
        while self.lookahead.len() < n && !self.exhausted {
            match self.tokenizer.next_token() {
                Some(token) => self.lookahead.push_back(token),
                None => {
                    self.lookahead.push_back(Token::eof(self.tokenizer.source().get_span()));
                    self.exhausted = true;
                }
            }
        }
    }
}

impl<'a> PeekableBuffer<'a, Token, TokenReadMany> for Tokens {
    fn peek_many(&mut self, n: usize) -> Option<&[Token]> {
        self.fill(n);
        if self.lookahead.len() >= n {
            Some(&self.lookahead.make_contiguous()[..n])
        } else {
            None
        }
    }

    fn read_many(&mut self, n: usize) -> Option<TokenReadMany> {
        self.fill(n);
        if self.lookahead.len() < n {
            return None;
        }
        let read = self.lookahead.drain(..n).collect();
        Some(TokenReadMany(read))
    }

    fn discard_many(&mut self, n: usize) -> bool {
        self.fill(n);
        let discarding = self.lookahead.len().min(n);
        self.lookahead.drain(..discarding);
        discarding == n
    }
}

impl Tokens {
    /// Whether the only thing left is the EOF sentinel: the parser uses this
    /// to decide, on a parse failure, whether more REPL input might resolve
    /// it (§4.3's `needs_more_input`).
    pub fn at_eof(&mut self) -> bool {
        self.peek().map_or(true, Token::is_eof)
    }

    pub fn peek_kind_is(&mut self, kind: TokenKind) -> bool {
        self.peek().map_or(false, |t| t.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_of(src: &str) -> Tokens {
        Tokens::new(CodeSource::new("<test>", src))
    }

    #[test]
    fn peek_does_not_consume() {
        let mut tokens = tokens_of("1 2 3");
        assert_eq!(tokens.peek().unwrap().image, "1");
        assert_eq!(tokens.peek().unwrap().image, "1");
    }

    #[test]
    fn peek_many_returns_in_order() {
        let mut tokens = tokens_of("1 2 3");
        let images: Vec<_> = tokens.peek_many(3).unwrap().iter().map(|t| t.image.clone()).collect();
        assert_eq!(images, vec!["1", "2", "3"]);
    }

    #[test]
    fn read_consumes() {
        let mut tokens = tokens_of("1 2 3");
        assert_eq!(tokens.read().unwrap().image, "1");
        assert_eq!(tokens.read().unwrap().image, "2");
        assert_eq!(tokens.peek().unwrap().image, "3");
    }

    #[test]
    fn read_many_consumes_a_run() {
        let mut tokens = tokens_of("1 2 3 4");
        let TokenReadMany(read) = tokens.read_many(2).unwrap();
        assert_eq!(read.iter().map(|t| t.image.clone()).collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(tokens.peek().unwrap().image, "3");
    }

    #[test]
    fn discard_many_skips_tokens() {
        let mut tokens = tokens_of("1 2 3 4");
        assert!(tokens.discard_many(2));
        assert_eq!(tokens.peek().unwrap().image, "3");
    }

    #[test]
    fn discard_many_past_the_end_returns_false() {
        let mut tokens = tokens_of("1");
        assert!(!tokens.discard_many(5));
    }

    #[test]
    fn peeking_past_the_end_yields_eof() {
        let mut tokens = tokens_of("1");
        tokens.discard();
        assert!(tokens.peek().unwrap().is_eof());
        assert!(tokens.at_eof());
    }

    #[test]
    fn match_nth_and_next_is() {
        let mut tokens = tokens_of("var x = 1");
        assert!(tokens.match_nth(0, |t| t.is_keyword("var")));
        assert!(tokens.match_nth(1, |t| t.kind == TokenKind::Id));
    }
}
