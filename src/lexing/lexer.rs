//! The tokenizer (§4.2): character stream to token stream.
//!
//! Unlike the teacher's `Lexer`, which runs on its own OS thread and streams
//! `LexedToken`s to the parser over a channel, `Tokenizer` is a plain
//! synchronous iterator-like type: `next_token` is called directly by the
//! token buffer (`lexing::Tokens`) whenever it needs another token. This
//! follows the single-threaded cooperative model mandated by §5 rather than
//! the teacher's concurrent one, while keeping the teacher's sub-lexer
//! decomposition (one private method per lexical subcontext, reentered from
//! a single dispatch point).

use std::collections::{HashMap, HashSet};

use num_bigint::BigInt;
use num_traits::Num;

use crate::lexing::source::{CodeSource, Span};
use crate::lexing::token::{Literal, Token, TokenKind};
use crate::lexing::{char_escapes, keywords};

/// Punctuation and operators, longest-match first. `->` and `=>` are tried
/// ahead of the single-character operators they would otherwise shadow
/// (`-`, `=`); within the operator table the order mirrors §4.2 exactly so
/// that, e.g., `===` is tried before `==` before `=`.
const PUNCTUATION: &[&str] = &[
    "->", "=>", "(", ")", "[", "]", "{", "}", ",", ";", "@", ":",
];

const OPERATORS: &[&str] = &[
    "...", ".", "===", "!==", "==", "!=", "=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "?=", "<", ">", "+", "-", "*", "/", "%", "^", "&", "|", "?", "!",
];

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub struct Tokenizer {
    source: CodeSource,
    char_escapes: HashMap<char, char>,
    keywords: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new(source: CodeSource) -> Self {
        Self {
            source,
            char_escapes: char_escapes::new(),
            keywords: keywords::new(),
        }
    }

    pub fn source(&self) -> &CodeSource {
        &self.source
    }

    fn error_token(&mut self, note: impl Into<String>) -> Token {
        let image = self.source.get_scan();
        Token::error(image, note, self.source.get_span())
    }

    /// Skips whitespace and comments (`-- ...` and `--- ... ---`, §4.2).
    /// Returns `false` once the source is exhausted.
    fn skip_trivia(&mut self) -> bool {
        loop {
            match self.source.peek() {
                None => return false,
                Some(c) if c.is_whitespace() => {
                    self.source.consume();
                }
                Some('-') if self.source.peek_at(1) == Some('-') && self.source.peek_at(2) == Some('-') =>
                {
                    self.source.consume();
                    self.source.consume();
                    self.source.consume();
                    loop {
                        if self.source.peek().is_none() {
                            break;
                        }
                        if self.source.matches("---") {
                            break;
                        }
                        self.source.consume();
                    }
                }
                Some('-') if self.source.peek_at(1) == Some('-') => {
                    self.source.consume();
                    self.source.consume();
                    while let Some(c) = self.source.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.source.consume();
                    }
                }
                Some(_) => return true,
            }
        }
    }

    fn lex_identifier_or_keyword_or_bool(&mut self) -> Token {
        while self.source.peek().map_or(false, is_identifier_continue) {
            self.source.consume();
        }
        let image = self.source.get_scan();
        let span = self.source.get_span();
        if self.keywords.contains(image.as_str()) {
            Token::new(TokenKind::Keyword, image, span)
        } else if image == "true" {
            Token::literal(TokenKind::Lit, image, Literal::Bool(true), span)
        } else if image == "false" {
            Token::literal(TokenKind::Lit, image, Literal::Bool(false), span)
        } else {
            Token::new(TokenKind::Id, image, span)
        }
    }

    fn lex_radix_digits(&mut self, valid: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(c) = self.source.peek() {
            if valid(c) || c == '_' {
                if c != '_' {
                    digits.push(c);
                }
                self.source.consume();
            } else {
                break;
            }
        }
        digits
    }

    fn lex_prefixed_int(&mut self, radix: u32, valid: impl Fn(char) -> bool) -> Token {
        // Consume the two-character prefix (0b/0o/0x).
        self.source.consume();
        self.source.consume();
        let digits = self.lex_radix_digits(valid);
        let span = self.source.get_span();
        let image = self.source.get_scan();
        if digits.is_empty() {
            return self.error_token("numeric prefix with no digits");
        }
        match BigInt::from_str_radix(&digits, radix) {
            Ok(value) => Token::literal(TokenKind::Lit, image, Literal::Int(value), span),
            Err(_) => self.error_token("malformed number"),
        }
    }

    fn lex_number(&mut self) -> Token {
        if self.source.peek() == Some('0') {
            match self.source.peek_at(1) {
                Some('b') | Some('B') => {
                    return self.lex_prefixed_int(2, |c| c == '0' || c == '1');
                }
                Some('o') | Some('O') => {
                    return self.lex_prefixed_int(8, |c| ('0'..='7').contains(&c));
                }
                Some('x') | Some('X') => {
                    return self.lex_prefixed_int(16, |c| c.is_ascii_hexdigit());
                }
                _ => {}
            }
        }

        let mut digits = self.lex_radix_digits(|c| c.is_ascii_digit());
        let mut is_float = false;

        if self.source.peek() == Some('.') && self.source.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.source.consume();
            digits.push('.');
            digits.push_str(&self.lex_radix_digits(|c| c.is_ascii_digit()));
        }

        if matches!(self.source.peek(), Some('e') | Some('E')) {
            let exponent_sign = self.source.peek_at(1);
            let (sign_len, digits_start) = match exponent_sign {
                Some('+') | Some('-') => (1usize, 2usize),
                _ => (0usize, 1usize),
            };
            let has_exponent_digits = self.source.peek_at(digits_start).map_or(false, |c| c.is_ascii_digit());
            if has_exponent_digits {
                is_float = true;
                digits.push(self.source.consume().unwrap());
                if sign_len == 1 {
                    digits.push(self.source.consume().unwrap());
                }
                digits.push_str(&self.lex_radix_digits(|c| c.is_ascii_digit()));
            }
        }

        let span = self.source.get_span();
        let image = self.source.get_scan();
        if is_float {
            match digits.parse::<f64>() {
                Ok(value) => Token::literal(TokenKind::Lit, image, Literal::Float(value), span),
                Err(_) => self.error_token("malformed number"),
            }
        } else {
            match digits.parse::<BigInt>() {
                Ok(value) => Token::literal(TokenKind::Lit, image, Literal::Int(value), span),
                Err(_) => self.error_token("malformed number"),
            }
        }
    }

    fn lex_escape(&mut self) -> Result<char, ()> {
        self.source.consume();
        match self.source.consume() {
            Some(escaped) => self.char_escapes.get(&escaped).copied().ok_or(()),
            None => Err(()),
        }
    }

    fn lex_string(&mut self) -> Token {
        self.source.consume();
        let mut value = String::new();
        loop {
            match self.source.peek() {
                Some('"') => {
                    self.source.consume();
                    let span = self.source.get_span();
                    let image = self.source.get_scan();
                    return Token::literal(TokenKind::Lit, image, Literal::Str(value), span);
                }
                Some('\\') => match self.lex_escape() {
                    Ok(c) => value.push(c),
                    Err(()) => return self.error_token("invalid escape"),
                },
                Some(c) => {
                    value.push(c);
                    self.source.consume();
                }
                None => return self.error_token("unterminated string"),
            }
        }
    }

    fn lex_operator_or_punctuation(&mut self) -> Token {
        for punc in PUNCTUATION {
            if self.source.matches(punc) {
                let span = self.source.get_span();
                return Token::new(TokenKind::Punc, *punc, span);
            }
        }
        for op in OPERATORS {
            if self.source.matches(op) {
                let span = self.source.get_span();
                return Token::new(TokenKind::Op, *op, span);
            }
        }
        let unknown = self.source.consume().unwrap();
        self.error_token(format!("unexpected character '{unknown}'"))
    }

    /// Produces the next token, or `None` once the source is exhausted.
    /// Never fails at the type level: lex errors are reported as `Error`
    /// tokens carrying a note (§4.2), letting the stream continue.
    pub fn next_token(&mut self) -> Option<Token> {
        if !self.skip_trivia() {
            return None;
        }
        self.source.start_scan();
        let c = self.source.peek()?;
        let token = if c.is_ascii_digit() {
            self.lex_number()
        } else if c == '"' {
            self.lex_string()
        } else if is_identifier_start(c) {
            self.lex_identifier_or_keyword_or_bool()
        } else {
            self.lex_operator_or_punctuation()
        };
        Some(token)
    }

    /// Tokenizes everything remaining in the source, for callers (tests,
    /// the round-trip invariant) that want the whole stream at once rather
    /// than pulling lazily through the token buffer.
    pub fn tokenize_rest(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token() {
            tokens.push(token);
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexing::source::CodeSource;

    fn tokens_of(src: &str) -> Vec<Token> {
        let mut tokenizer = Tokenizer::new(CodeSource::new("<test>", src));
        tokenizer.tokenize_rest()
    }

    fn images(src: &str) -> Vec<String> {
        tokens_of(src).into_iter().map(|t| t.image).collect()
    }

    #[test]
    fn skips_whitespace_and_line_comments() {
        assert_eq!(images("  1 -- a comment\n  2"), vec!["1", "2"]);
    }

    #[test]
    fn skips_block_comments() {
        assert_eq!(images("1 ---\nblock\ncomment\n--- 2"), vec!["1", "2"]);
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(images("a === b !== c == d"), vec!["a", "===", "b", "!==", "c", "==", "d"]);
        assert_eq!(images("x -> y => z"), vec!["x", "->", "y", "=>", "z"]);
    }

    #[test]
    fn integer_literals_with_separators_and_prefixes() {
        let toks = tokens_of("1_000 0b1010 0o17 0xFF");
        let ints: Vec<_> = toks
            .iter()
            .map(|t| match &t.literal {
                Some(Literal::Int(n)) => n.clone(),
                _ => panic!("expected int literal, got {t:?}"),
            })
            .collect();
        assert_eq!(ints[0], BigInt::from(1000));
        assert_eq!(ints[1], BigInt::from(10));
        assert_eq!(ints[2], BigInt::from(15));
        assert_eq!(ints[3], BigInt::from(255));
    }

    #[test]
    fn float_literals_with_and_without_exponent() {
        let toks = tokens_of("1.5 2e10 3.25e-2");
        let floats: Vec<_> = toks
            .iter()
            .map(|t| match &t.literal {
                Some(Literal::Float(f)) => *f,
                _ => panic!("expected float literal, got {t:?}"),
            })
            .collect();
        assert_eq!(floats[0], 1.5);
        assert_eq!(floats[1], 2e10);
        assert_eq!(floats[2], 3.25e-2);
    }

    #[test]
    fn numeric_prefix_without_digits_is_a_lex_error() {
        let toks = tokens_of("0x ");
        assert_eq!(toks[0].kind, TokenKind::Error);
    }

    #[test]
    fn string_literal_with_escapes() {
        let toks = tokens_of(r#""a\nb\"c""#);
        match &toks[0].literal {
            Some(Literal::Str(s)) => assert_eq!(s, "a\nb\"c"),
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let toks = tokens_of("\"abc");
        assert_eq!(toks[0].kind, TokenKind::Error);
    }

    #[test]
    fn booleans_are_literals_not_identifiers() {
        let toks = tokens_of("true false truefoo");
        assert_eq!(toks[0].literal, Some(Literal::Bool(true)));
        assert_eq!(toks[1].literal, Some(Literal::Bool(false)));
        assert_eq!(toks[2].kind, TokenKind::Id);
    }

    #[test]
    fn keywords_are_not_identifiers() {
        let toks = tokens_of("var x");
        assert_eq!(toks[0].kind, TokenKind::Keyword);
        assert_eq!(toks[1].kind, TokenKind::Id);
    }

    #[test]
    fn unknown_character_yields_error_token_and_stream_continues() {
        let toks = tokens_of("1 # 2");
        assert_eq!(toks[0].image, "1");
        assert_eq!(toks[1].kind, TokenKind::Error);
        assert_eq!(toks[2].image, "2");
    }

    #[test]
    fn round_trip_invariant_reconstructs_source() {
        let src = "var x = 1 + 2; -- trailing comment\n";
        let mut tokenizer = Tokenizer::new(CodeSource::new("<test>", src));
        let mut reconstructed = String::new();
        let mut cursor = 0usize;
        loop {
            if !tokenizer.skip_trivia() {
                let gap = tokenizer.source().slice(Span::new(cursor, tokenizer.source().len()));
                reconstructed.push_str(&gap);
                break;
            }
            let trivia_end = {
                tokenizer.source.start_scan();
                tokenizer.source.get_span().start
            };
            reconstructed.push_str(&tokenizer.source().slice(Span::new(cursor, trivia_end)));
            match tokenizer.next_token() {
                Some(token) => {
                    reconstructed.push_str(&token.image);
                    cursor = token.span.end;
                }
                None => break,
            }
        }
        assert_eq!(reconstructed, src);
    }
}
