//! The parser (§4.3): a top-down recursive-descent parser with operator-
//! precedence climbing for binary expressions, turning a token stream into
//! the AST from `ast`. As in the tokenizer, failures are reported as values
//! rather than host exceptions, carrying a `needs_more_input` flag so the
//! session driver can tell a truncated REPL fragment from a genuine syntax
//! error (§4.6).

pub mod ast;

use crate::common::peekable_buffer::PeekableBuffer;
use crate::common::multiphase::Identifier;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::lexing::source::Span;
use crate::lexing::token::{Literal as TokenLiteral, Token, TokenKind};
use crate::lexing::Tokens;
use ast::*;

#[derive(Debug)]
pub enum ParseErrorKind {
    Described(String),
    Expected(String),
    Unexpected(Token),
    PrematureEof,
}

#[derive(Debug)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// Set when the failure occurred with no tokens left to read: the
    /// session driver uses this to prompt for a continuation line instead
    /// of reporting a hard error (§4.3, §4.6).
    pub needs_more_input: bool,
}

pub type Result<T> = std::result::Result<T, ParseError>;

impl ParseError {
    /// Packages a parse failure as a session diagnostic (§6.4), routing a
    /// failure whose offending token came from the tokenizer's own error
    /// path to `Lex` rather than `Parse`.
    pub fn into_diagnostic(self, path: impl Into<String>) -> Diagnostic {
        let path = path.into();
        if self.needs_more_input {
            return Diagnostic::needs_more_input(path, self.span);
        }
        match self.kind {
            ParseErrorKind::Unexpected(token) if token.kind == TokenKind::Error => Diagnostic::new(
                DiagnosticKind::Lex,
                token.note.unwrap_or_else(|| "invalid token".to_string()),
                path,
                token.span,
            ),
            ParseErrorKind::Described(note) => Diagnostic::new(DiagnosticKind::Parse, note, path, self.span),
            ParseErrorKind::Expected(what) => {
                Diagnostic::new(DiagnosticKind::Parse, format!("expected {what}"), path, self.span)
            }
            ParseErrorKind::Unexpected(token) => Diagnostic::new(
                DiagnosticKind::Parse,
                format!("unexpected token '{}'", token.image),
                path,
                token.span,
            ),
            ParseErrorKind::PrematureEof => {
                Diagnostic::new(DiagnosticKind::Parse, "unexpected end of input", path, self.span)
            }
        }
    }
}

fn literal_from_token(lit: &TokenLiteral) -> Literal {
    match lit {
        TokenLiteral::Bool(b) => Literal::Bool(*b),
        TokenLiteral::Int(n) => Literal::Int(n.clone()),
        TokenLiteral::Float(f) => Literal::Float(*f),
        TokenLiteral::Str(s) => Literal::Str(s.clone()),
    }
}

pub struct Parser {
    tokens: Tokens,
    /// Disabled while parsing the scrutinee of `if`/`while`/`match`, so that
    /// `if x { ... }` parses `x` as a bare identifier rather than greedily
    /// consuming `{` as the start of a struct literal. Mirrors how other
    /// C-family-descended grammars with struct-literal syntax handle the
    /// same ambiguity.
    struct_literals_allowed: bool,
}

impl Parser {
    pub fn new(tokens: Tokens) -> Self {
        Self {
            tokens,
            struct_literals_allowed: true,
        }
    }

    fn current_span(&mut self) -> Span {
        self.tokens.peek().map_or(Span::default(), |t| t.span)
    }

    fn fail<T>(&mut self, message: impl Into<String>) -> Result<T> {
        let needs_more_input = self.tokens.at_eof();
        let span = self.current_span();
        Err(ParseError {
            kind: ParseErrorKind::Described(message.into()),
            span,
            needs_more_input,
        })
    }

    fn expected<T>(&mut self, what: impl Into<String>) -> Result<T> {
        let needs_more_input = self.tokens.at_eof();
        let span = self.current_span();
        Err(ParseError {
            kind: ParseErrorKind::Expected(what.into()),
            span,
            needs_more_input,
        })
    }

    fn unexpected<T>(&mut self, token: Token) -> Result<T> {
        let needs_more_input = self.tokens.at_eof();
        let span = token.span;
        Err(ParseError {
            kind: ParseErrorKind::Unexpected(token),
            span,
            needs_more_input,
        })
    }

    fn premature_eof<T>(&mut self) -> Result<T> {
        let span = self.current_span();
        Err(ParseError {
            kind: ParseErrorKind::PrematureEof,
            span,
            needs_more_input: true,
        })
    }

    fn peek_is_keyword(&mut self, word: &str) -> bool {
        self.tokens.match_next(|t| t.is_keyword(word))
    }

    fn peek_is_punc(&mut self, punc: &str) -> bool {
        self.tokens.match_next(|t| t.is_punc(punc))
    }

    fn peek_is_op(&mut self, op: &str) -> bool {
        self.tokens.match_next(|t| t.is_op(op))
    }

    fn peek_is_id(&mut self) -> bool {
        self.tokens.match_next(|t| t.kind == TokenKind::Id)
    }

    /// "Soft keywords": `mut` and `let` are contextual, recognized only at
    /// the grammar positions that need them, so they stay available as
    /// ordinary identifiers everywhere else (§4.2's keyword list does not
    /// reserve either).
    fn peek_is_contextual(&mut self, word: &str) -> bool {
        self.tokens.match_next(|t| t.kind == TokenKind::Id && t.image == word)
    }

    fn read(&mut self) -> Result<Token> {
        self.tokens.read().ok_or(()).or_else(|_| self.premature_eof())
    }

    fn expect_punc(&mut self, punc: &str) -> Result<Token> {
        if self.peek_is_punc(punc) {
            self.read()
        } else {
            self.expected(format!("'{punc}'"))
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<Token> {
        if self.peek_is_op(op) {
            self.read()
        } else {
            self.expected(format!("'{op}'"))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<Token> {
        if self.peek_is_keyword(word) {
            self.read()
        } else {
            self.expected(format!("'{word}'"))
        }
    }

    fn expect_identifier(&mut self) -> Result<Identifier> {
        if self.peek_is_id() {
            Ok(self.read()?.identifier())
        } else {
            self.expected("an identifier")
        }
    }

    fn at_item_terminator(&mut self) -> bool {
        self.tokens.at_eof() || self.peek_is_punc("}")
    }

    // ---- Root and block-level sequencing (§4.3: `;`-terminated, relaxed
    // before a closing `}` or end of input) ----------------------------

    pub fn parse_root(&mut self) -> Result<Root> {
        let mut decls = Vec::new();
        while !self.tokens.at_eof() {
            decls.push(self.parse_decl()?);
            if self.peek_is_punc(";") {
                self.tokens.discard();
            } else if self.tokens.at_eof() {
                break;
            } else {
                return self.expected("';'");
            }
        }
        Ok(Root { decls })
    }

    fn parse_block(&mut self) -> Result<Block> {
        let start = self.expect_punc("{")?.span;
        let mut items = Vec::new();
        loop {
            if self.peek_is_punc("}") {
                let end = self.read()?.span;
                return Ok(Block {
                    span: start.join(end),
                    items,
                });
            }
            let decl = self.parse_decl()?;
            items.push(match decl.kind {
                DeclKind::Stmt(stmt) => BlockItem::Stmt(stmt),
                other => BlockItem::Decl(Decl {
                    span: decl.span,
                    kind: other,
                }),
            });
            if self.peek_is_punc(";") {
                self.tokens.discard();
            } else if !self.peek_is_punc("}") {
                return self.expected("';' or '}'");
            }
        }
    }

    // ---- Declarations and statements ----------------------------------

    fn parse_decl(&mut self) -> Result<Decl> {
        let start = self.current_span();
        if self.peek_is_keyword("var") || self.peek_is_keyword("const") {
            self.parse_var_decl(start)
        } else if self.peek_is_keyword("proc") && self.tokens.match_nth(1, |t| t.kind == TokenKind::Id) {
            self.parse_proc_decl(start)
        } else if self.peek_is_keyword("type") {
            self.parse_type_alias_decl(start)
        } else if self.peek_is_keyword("struct") {
            self.parse_struct_decl(start)
        } else if self.peek_is_keyword("enum") {
            self.parse_enum_decl(start)
        } else if self.peek_is_keyword("test") {
            self.parse_test_decl(start)
        } else {
            let stmt = self.parse_stmt()?;
            Ok(Decl {
                span: stmt.span,
                kind: DeclKind::Stmt(stmt),
            })
        }
    }

    fn parse_var_decl(&mut self, start: Span) -> Result<Decl> {
        let mutable = self.peek_is_keyword("var");
        self.tokens.discard();
        let pattern = self.parse_pattern(false)?;
        let annotation = if self.peek_is_punc(":") {
            self.tokens.discard();
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let assert = if annotation.is_some() && self.peek_is_keyword("assert") {
            self.tokens.discard();
            true
        } else {
            false
        };
        self.expect_op("=")?;
        let init = self.parse_expression()?;
        let end = init.span;
        Ok(Decl {
            span: start.join(end),
            kind: DeclKind::Var {
                mutable,
                pattern,
                annotation,
                assert,
                init,
            },
        })
    }

    fn parse_proc_signature_and_body(&mut self) -> Result<ProcLiteral> {
        let start = self.expect_punc("(")?.span;
        let mut params = Vec::new();
        loop {
            if self.peek_is_punc(")") {
                break;
            }
            let pattern = self.parse_pattern(false)?;
            let annotation = if self.peek_is_punc(":") {
                self.tokens.discard();
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            params.push(Param { pattern, annotation });
            if self.peek_is_punc(",") {
                self.tokens.discard();
            } else {
                break;
            }
        }
        self.expect_punc(")")?;
        let return_annotation = if self.peek_is_punc("->") {
            self.tokens.discard();
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(ProcLiteral {
            span: start.join(body.span),
            params,
            return_annotation,
            body,
        })
    }

    fn parse_proc_decl(&mut self, start: Span) -> Result<Decl> {
        self.tokens.discard();
        let name = self.expect_identifier()?;
        let literal = self.parse_proc_signature_and_body()?;
        Ok(Decl {
            span: start.join(literal.span),
            kind: DeclKind::Proc { name, literal },
        })
    }

    fn parse_type_alias_decl(&mut self, start: Span) -> Result<Decl> {
        self.tokens.discard();
        let name = self.expect_identifier()?;
        self.expect_op("=")?;
        let aliased = self.parse_type_expr()?;
        let end = aliased.span;
        Ok(Decl {
            span: start.join(end),
            kind: DeclKind::TypeAlias { name, aliased },
        })
    }

    fn parse_field_decl_list(&mut self, tuple_form: bool) -> Result<Vec<FieldDecl>> {
        let (open, close) = if tuple_form { ("(", ")") } else { ("{", "}") };
        self.expect_punc(open)?;
        let mut fields = Vec::new();
        loop {
            if self.peek_is_punc(close) {
                break;
            }
            let mutable = if self.peek_is_contextual("mut") {
                self.tokens.discard();
                true
            } else {
                false
            };
            let name = if tuple_form {
                None
            } else {
                let id = self.expect_identifier()?;
                self.expect_punc(":")?;
                Some(id)
            };
            let annotation = self.parse_type_expr()?;
            fields.push(FieldDecl {
                mutable,
                name,
                annotation,
            });
            if self.peek_is_punc(",") {
                self.tokens.discard();
            } else {
                break;
            }
        }
        self.expect_punc(close)?;
        Ok(fields)
    }

    fn parse_struct_decl(&mut self, start: Span) -> Result<Decl> {
        self.tokens.discard();
        let name = self.expect_identifier()?;
        let tuple_form = self.peek_is_punc("(");
        let fields = self.parse_field_decl_list(tuple_form)?;
        Ok(Decl {
            span: start,
            kind: DeclKind::Struct {
                name,
                tuple_form,
                fields,
            },
        })
    }

    fn parse_enum_decl(&mut self, start: Span) -> Result<Decl> {
        self.tokens.discard();
        let name = self.expect_identifier()?;
        self.expect_punc("{")?;
        let mut variants = Vec::new();
        loop {
            if self.peek_is_punc("}") {
                break;
            }
            let variant_name = self.expect_identifier()?;
            let (constant, tuple_form, fields) = if self.peek_is_punc("(") {
                (false, true, self.parse_field_decl_list(true)?)
            } else if self.peek_is_punc("{") {
                (false, false, self.parse_field_decl_list(false)?)
            } else {
                (true, false, Vec::new())
            };
            variants.push(VariantDecl {
                name: variant_name,
                constant,
                tuple_form,
                fields,
            });
            if self.peek_is_punc(",") {
                self.tokens.discard();
            } else {
                break;
            }
        }
        self.expect_punc("}")?;
        Ok(Decl {
            span: start,
            kind: DeclKind::Enum { name, variants },
        })
    }

    fn parse_test_decl(&mut self, start: Span) -> Result<Decl> {
        self.tokens.discard();
        let name_token = self.read()?;
        let name = match &name_token.literal {
            Some(TokenLiteral::Str(s)) => s.clone(),
            _ => return self.expected("a string literal naming the test"),
        };
        let body = self.parse_block()?;
        Ok(Decl {
            span: start.join(body.span),
            kind: DeclKind::Test { name, body },
        })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let start = self.current_span();
        if self.peek_is_keyword("break") || self.peek_is_keyword("continue") {
            let is_break = self.peek_is_keyword("break");
            self.tokens.discard();
            let label = if self.peek_is_id() {
                Some(self.read()?.identifier())
            } else {
                None
            };
            let kind = if is_break {
                StmtKind::Break(label)
            } else {
                StmtKind::Continue(label)
            };
            return Ok(Stmt { span: start, kind });
        }
        if self.peek_is_keyword("return") {
            self.tokens.discard();
            let expr = if self.at_item_terminator() || self.peek_is_punc(";") {
                None
            } else {
                Some(self.parse_expression()?)
            };
            return Ok(Stmt {
                span: start,
                kind: StmtKind::Return(expr),
            });
        }
        if self.peek_is_keyword("assert") {
            self.tokens.discard();
            let expr = self.parse_expression()?;
            let span = start.join(expr.span);
            return Ok(Stmt {
                span,
                kind: StmtKind::Assert(expr),
            });
        }
        if self.peek_is_keyword("loop") {
            self.tokens.discard();
            let label = if self.peek_is_id() {
                Some(self.read()?.identifier())
            } else {
                None
            };
            let body = self.parse_block()?;
            return Ok(Stmt {
                span: start.join(body.span),
                kind: StmtKind::Loop { label, body },
            });
        }
        if self.peek_is_keyword("while") {
            self.tokens.discard();
            let test = self.parse_expression_no_struct_literal()?;
            let body = self.parse_block()?;
            return Ok(Stmt {
                span: start.join(body.span),
                kind: StmtKind::While { test, body },
            });
        }

        let expr = self.parse_expression()?;
        if self.peek_is_op("=") {
            self.tokens.discard();
            let value = self.parse_expression()?;
            let span = start.join(value.span);
            return match expr.kind {
                ExprKind::Identifier(name) => Ok(Stmt {
                    span,
                    kind: StmtKind::AssignVar { target: name, value },
                }),
                ExprKind::Member {
                    target,
                    field: MemberField::Named(field),
                } => Ok(Stmt {
                    span,
                    kind: StmtKind::AssignField {
                        target,
                        field,
                        value,
                    },
                }),
                _ => self.fail("invalid left-hand side for assignment"),
            };
        }
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    // ---- Expressions: precedence climbing (§4.3) -----------------------

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_expression_no_struct_literal(&mut self) -> Result<Expr> {
        let previous = self.struct_literals_allowed;
        self.struct_literals_allowed = false;
        let result = self.parse_or();
        self.struct_literals_allowed = previous;
        result
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        ops: &[(&str, BinaryOp, bool)],
    ) -> Result<Expr> {
        let mut left = next(self)?;
        loop {
            let matched = ops.iter().find(|(image, _, is_punc)| {
                if *is_punc {
                    self.peek_is_punc(image)
                } else {
                    self.peek_is_op(image)
                }
            });
            match matched {
                Some((_, op, _)) => {
                    let op = *op;
                    self.tokens.discard();
                    let right = next(self)?;
                    let span = left.span.join(right.span);
                    left = ExprNode::new(
                        span,
                        ExprKind::Binary {
                            op,
                            left,
                            right,
                        },
                    );
                }
                None => return Ok(left),
            }
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_and, &[("|", BinaryOp::Or, false)])
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.parse_binary_level(Self::parse_equality, &[("&", BinaryOp::And, false)])
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_comparison,
            &[
                ("===", BinaryOp::IdEq, false),
                ("!==", BinaryOp::IdNotEq, false),
                ("==", BinaryOp::Eq, false),
                ("!=", BinaryOp::NotEq, false),
            ],
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_additive,
            &[
                ("<=", BinaryOp::LtEq, false),
                (">=", BinaryOp::GtEq, false),
                ("<", BinaryOp::Lt, false),
                (">", BinaryOp::Gt, false),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_multiplicative,
            &[("+", BinaryOp::Add, false), ("-", BinaryOp::Sub, false)],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            Self::parse_unary,
            &[
                ("*", BinaryOp::Mul, false),
                ("/", BinaryOp::Div, false),
                ("%", BinaryOp::Rem, false),
                ("?", BinaryOp::Default, false),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.current_span();
        let op = if self.peek_is_op("-") {
            Some(UnaryOp::Neg)
        } else if self.peek_is_op("!") {
            Some(UnaryOp::Not)
        } else if self.peek_is_op("...") {
            Some(UnaryOp::Spread)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.tokens.discard();
                let operand = self.parse_unary()?;
                let span = start.join(operand.span);
                Ok(ExprNode::new(span, ExprKind::Unary { op, operand }))
            }
            None => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            if self.peek_is_punc(".") {
                self.tokens.discard();
                let field_token = self.read()?;
                let field = match (&field_token.kind, &field_token.literal) {
                    (TokenKind::Id, _) => MemberField::Named(field_token.identifier()),
                    (TokenKind::Lit, Some(TokenLiteral::Int(n))) => {
                        let index: usize = n.to_string().parse().unwrap_or(0);
                        MemberField::Positional(index)
                    }
                    _ => return self.unexpected(field_token),
                };
                let span = expr.span.join(field_token.span);

                if let (ExprKind::Identifier(enum_name), MemberField::Named(variant_name)) =
                    (&expr.kind, &field)
                {
                    if self.struct_literals_allowed && self.peek_is_punc("{") {
                        let enum_name = enum_name.clone();
                        let variant_name = variant_name.clone();
                        self.tokens.discard();
                        let fields = self.parse_field_init_list()?;
                        let end = self.expect_punc("}")?.span;
                        expr = ExprNode::new(
                            span.join(end),
                            ExprKind::EnumInit {
                                enum_name,
                                variant_name,
                                fields,
                            },
                        );
                        continue;
                    }
                }

                expr = ExprNode::new(span, ExprKind::Member { target: expr, field });
            } else if self.peek_is_punc("(") {
                self.tokens.discard();
                let mut args = Vec::new();
                loop {
                    if self.peek_is_punc(")") {
                        break;
                    }
                    args.push(self.parse_expression()?);
                    if self.peek_is_punc(",") {
                        self.tokens.discard();
                    } else {
                        break;
                    }
                }
                let end = self.expect_punc(")")?.span;
                let span = expr.span.join(end);
                expr = ExprNode::new(span, ExprKind::Call { callee: expr, args });
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_field_init_list(&mut self) -> Result<Vec<FieldInit>> {
        let mut fields = Vec::new();
        loop {
            if self.peek_is_punc("}") {
                break;
            }
            let name = self.expect_identifier()?;
            self.expect_op("=")?;
            let value = self.parse_expression()?;
            fields.push(FieldInit {
                name: FieldInitName::Named(name),
                value,
            });
            if self.peek_is_punc(",") {
                self.tokens.discard();
            } else {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.read()?;
        match token.kind {
            TokenKind::Lit => {
                let literal = literal_from_token(token.literal.as_ref().expect("lit token carries a literal"));
                Ok(ExprNode::new(token.span, ExprKind::Literal(literal)))
            }
            TokenKind::Id => {
                let name = token.identifier();
                if self.struct_literals_allowed && self.peek_is_punc("{") {
                    self.tokens.discard();
                    let fields = self.parse_field_init_list()?;
                    let spread = if self.peek_is_op("...") {
                        self.tokens.discard();
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    let end = self.expect_punc("}")?.span;
                    return Ok(ExprNode::new(
                        token.span.join(end),
                        ExprKind::StructInit {
                            name,
                            fields,
                            spread,
                        },
                    ));
                }
                Ok(ExprNode::new(token.span, ExprKind::Identifier(name)))
            }
            TokenKind::Punc if token.image == "(" => {
                let previous = self.struct_literals_allowed;
                self.struct_literals_allowed = true;
                let result = self.parse_paren_or_tuple(token.span);
                self.struct_literals_allowed = previous;
                result
            }
            TokenKind::Keyword if token.image == "if" => self.parse_if(token.span),
            TokenKind::Keyword if token.image == "match" => self.parse_match(token.span),
            TokenKind::Keyword if token.image == "throw" => {
                let expr = self.parse_expression()?;
                let span = token.span.join(expr.span);
                Ok(ExprNode::new(span, ExprKind::Throw(expr)))
            }
            TokenKind::Keyword if token.image == "proc" => {
                let literal = self.parse_proc_signature_and_body()?;
                let span = token.span.join(literal.span);
                Ok(ExprNode::new(span, ExprKind::Proc(literal)))
            }
            TokenKind::Keyword if token.image == "type" => {
                let type_expr = self.parse_type_expr()?;
                let span = token.span.join(type_expr.span);
                Ok(ExprNode::new(span, ExprKind::TypeValue(type_expr)))
            }
            TokenKind::Punc if token.image == "{" => {
                let block = self.parse_block_from(token.span)?;
                let span = block.span;
                Ok(ExprNode::new(span, ExprKind::Block(block)))
            }
            _ => self.unexpected(token),
        }
    }

    fn parse_block_from(&mut self, start: Span) -> Result<Block> {
        let mut items = Vec::new();
        loop {
            if self.peek_is_punc("}") {
                let end = self.read()?.span;
                return Ok(Block {
                    span: start.join(end),
                    items,
                });
            }
            let decl = self.parse_decl()?;
            items.push(match decl.kind {
                DeclKind::Stmt(stmt) => BlockItem::Stmt(stmt),
                other => BlockItem::Decl(Decl {
                    span: decl.span,
                    kind: other,
                }),
            });
            if self.peek_is_punc(";") {
                self.tokens.discard();
            } else if !self.peek_is_punc("}") {
                return self.expected("';' or '}'");
            }
        }
    }

    fn parse_paren_or_tuple(&mut self, start: Span) -> Result<Expr> {
        if self.peek_is_punc(")") {
            let end = self.read()?.span;
            return Ok(ExprNode::new(start.join(end), ExprKind::Tuple(Vec::new())));
        }
        let first = self.parse_expression()?;
        if self.peek_is_punc(",") {
            self.tokens.discard();
            let mut items = vec![first];
            loop {
                if self.peek_is_punc(")") {
                    break;
                }
                items.push(self.parse_expression()?);
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            let end = self.expect_punc(")")?.span;
            Ok(ExprNode::new(start.join(end), ExprKind::Tuple(items)))
        } else {
            let end = self.expect_punc(")")?.span;
            let span = start.join(end);
            Ok(ExprNode::new(span, ExprKind::Group(first)))
        }
    }

    fn parse_if(&mut self, start: Span) -> Result<Expr> {
        let pattern = if self.peek_is_contextual("let") {
            self.tokens.discard();
            let pattern = self.parse_pattern(true)?;
            self.expect_punc(":")?;
            self.expect_op("=")?;
            Some(pattern)
        } else {
            None
        };
        let test = self.parse_expression_no_struct_literal()?;
        let then = self.parse_block()?;
        let else_ = if self.peek_is_keyword("else") {
            self.tokens.discard();
            Some(self.parse_block()?)
        } else {
            None
        };
        let end = else_.as_ref().map_or(then.span, |b| b.span);
        Ok(ExprNode::new(
            start.join(end),
            ExprKind::If {
                pattern,
                asserted_type: None,
                test,
                then,
                else_,
            },
        ))
    }

    fn parse_match(&mut self, start: Span) -> Result<Expr> {
        let test = if self.peek_is_punc("{") {
            None
        } else {
            Some(self.parse_expression_no_struct_literal()?)
        };
        self.expect_punc("{")?;
        let mut cases = Vec::new();
        loop {
            if self.peek_is_punc("}") {
                break;
            }
            let pattern = if self.peek_is_keyword("else") {
                let span = self.read()?.span;
                Pattern {
                    span,
                    kind: PatternKind::Wildcard,
                }
            } else {
                self.parse_pattern(true)?
            };
            let asserted_type = if self.peek_is_punc(":") {
                self.tokens.discard();
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            let guard = if self.peek_is_keyword("if") {
                self.tokens.discard();
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.expect_punc("=>")?;
            let body = self.parse_expression()?;
            cases.push(MatchCase {
                pattern,
                asserted_type,
                guard,
                body,
            });
            if self.peek_is_punc(",") {
                self.tokens.discard();
            } else {
                break;
            }
        }
        let end = self.expect_punc("}")?.span;
        Ok(ExprNode::new(
            start.join(end),
            ExprKind::Match { test, cases },
        ))
    }

    // ---- Patterns (§4.3, §4.4) ------------------------------------------

    fn parse_pattern(&mut self, asserted_context: bool) -> Result<Pattern> {
        let start = self.current_span();
        let base = self.parse_pattern_base(asserted_context)?;
        if self.peek_is_keyword("as") {
            self.tokens.discard();
            let rhs = self.parse_pattern(asserted_context)?;
            let span = start.join(rhs.span);
            Ok(Pattern {
                span,
                kind: PatternKind::As(Box::new(base), Box::new(rhs)),
            })
        } else {
            Ok(base)
        }
    }

    fn parse_pattern_base(&mut self, asserted_context: bool) -> Result<Pattern> {
        let start = self.current_span();
        if self.peek_is_keyword("_") {
            let span = self.read()?.span;
            return Ok(Pattern {
                span,
                kind: PatternKind::Wildcard,
            });
        }
        if self.tokens.match_next(|t| t.kind == TokenKind::Lit) {
            if !asserted_context {
                return self.fail("literal pattern outside an asserted context");
            }
            let token = self.read()?;
            let literal = literal_from_token(token.literal.as_ref().expect("lit token"));
            return Ok(Pattern {
                span: token.span,
                kind: PatternKind::Literal(literal),
            });
        }
        if self.peek_is_punc("(") {
            self.tokens.discard();
            let mut items = Vec::new();
            loop {
                if self.peek_is_punc(")") {
                    break;
                }
                items.push(self.parse_pattern(asserted_context)?);
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            let end = self.expect_punc(")")?.span;
            return Ok(Pattern {
                span: start.join(end),
                kind: PatternKind::Tuple(items),
            });
        }
        if self.peek_is_id() {
            let name = self.expect_identifier()?;
            if self.peek_is_punc(".") {
                self.tokens.discard();
                let variant_name = self.expect_identifier()?;
                let (tuple_form, fields, end) = self.parse_pattern_fields_if_present(asserted_context)?;
                let span = end.map_or(start, |e| start.join(e));
                return Ok(Pattern {
                    span,
                    kind: PatternKind::Variant {
                        enum_name: Some(name),
                        variant_name,
                        tuple_form,
                        fields,
                    },
                });
            }
            if self.peek_is_punc("(") || self.peek_is_punc("{") {
                let (tuple_form, fields, end) = self.parse_pattern_fields_if_present(asserted_context)?;
                let span = end.map_or(start, |e| start.join(e));
                return Ok(Pattern {
                    span,
                    kind: PatternKind::Struct {
                        name,
                        tuple_form,
                        fields,
                    },
                });
            }
            return Ok(Pattern {
                span: start,
                kind: PatternKind::Identifier { name, mutable: false },
            });
        }
        let token = self.read()?;
        self.unexpected(token)
    }

    fn parse_pattern_fields_if_present(
        &mut self,
        asserted_context: bool,
    ) -> Result<(bool, Vec<PatternField>, Option<Span>)> {
        if self.peek_is_punc("(") {
            self.tokens.discard();
            let mut fields = Vec::new();
            let mut index = 0usize;
            loop {
                if self.peek_is_punc(")") {
                    break;
                }
                let pattern = self.parse_pattern(asserted_context)?;
                fields.push(PatternField {
                    name: FieldInitName::Positional(index),
                    pattern,
                });
                index += 1;
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            let end = self.expect_punc(")")?.span;
            Ok((true, fields, Some(end)))
        } else if self.peek_is_punc("{") {
            self.tokens.discard();
            let mut fields = Vec::new();
            loop {
                if self.peek_is_punc("}") {
                    break;
                }
                let name = self.expect_identifier()?;
                self.expect_op("=")?;
                let pattern = self.parse_pattern(asserted_context)?;
                fields.push(PatternField {
                    name: FieldInitName::Named(name),
                    pattern,
                });
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            let end = self.expect_punc("}")?.span;
            Ok((false, fields, Some(end)))
        } else {
            Ok((false, Vec::new(), None))
        }
    }

    // ---- Type expressions (§3.2) ---------------------------------------

    fn parse_type_expr(&mut self) -> Result<TypeExpr> {
        let start = self.current_span();
        if self.peek_is_keyword("_") {
            let span = self.read()?.span;
            return Ok(TypeExpr {
                span,
                kind: TypeExprKind::Wildcard,
            });
        }
        if self.peek_is_keyword("proc") {
            self.tokens.discard();
            self.expect_punc("(")?;
            let mut params = Vec::new();
            loop {
                if self.peek_is_punc(")") {
                    break;
                }
                params.push(self.parse_type_expr()?);
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            self.expect_punc(")")?;
            self.expect_punc("->")?;
            let returns = self.parse_type_expr()?;
            let span = start.join(returns.span);
            return Ok(TypeExpr {
                span,
                kind: TypeExprKind::Proc {
                    params,
                    returns: Box::new(returns),
                },
            });
        }
        if self.peek_is_punc("(") {
            self.tokens.discard();
            let mut items = Vec::new();
            loop {
                if self.peek_is_punc(")") {
                    break;
                }
                items.push(self.parse_type_expr()?);
                if self.peek_is_punc(",") {
                    self.tokens.discard();
                } else {
                    break;
                }
            }
            let end = self.expect_punc(")")?.span;
            return Ok(TypeExpr {
                span: start.join(end),
                kind: TypeExprKind::Tuple(items),
            });
        }
        if self.peek_is_id() {
            let name = self.expect_identifier()?;
            return Ok(TypeExpr {
                span: start,
                kind: TypeExprKind::Identifier(name),
            });
        }
        let token = self.read()?;
        self.unexpected(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexing::source::CodeSource;

    fn parse(src: &str) -> Result<Root> {
        let tokens = Tokens::new(CodeSource::new("<test>", src));
        let mut parser = Parser::new(tokens);
        parser.parse_root()
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let root = parse("1 + 2 * 3;").unwrap();
        assert_eq!(root.decls.len(), 1);
    }

    #[test]
    fn parses_var_decl_with_annotation_and_assert() {
        let root = parse("var x: Int assert = 1;").unwrap();
        match &root.decls[0].kind {
            DeclKind::Var { mutable, assert, annotation, .. } => {
                assert!(*mutable);
                assert!(*assert);
                assert!(annotation.is_some());
            }
            other => panic!("expected a var decl, got {other:?}"),
        }
    }

    #[test]
    fn parses_proc_decl_and_call() {
        let root = parse("proc f(x: Int) -> Int { x }; f(1);").unwrap();
        assert_eq!(root.decls.len(), 2);
    }

    #[test]
    fn parses_struct_and_enum_decls() {
        let root = parse(
            "struct Point { x: Int, y: Int }; enum Color { Red, Green, Blue };",
        )
        .unwrap();
        assert_eq!(root.decls.len(), 2);
    }

    #[test]
    fn parses_if_without_struct_literal_ambiguity() {
        let root = parse("var x = 1; if x { 2 } else { 3 };").unwrap();
        assert_eq!(root.decls.len(), 2);
    }

    #[test]
    fn parses_enum_match() {
        let root = parse(
            "enum Color { Red, Green, Blue }; match Color.Red { Color.Red => 1, Color.Green => 2, Color.Blue => 3 };",
        )
        .unwrap();
        assert_eq!(root.decls.len(), 2);
    }

    #[test]
    fn parses_loop_with_label_and_break() {
        let root = parse("loop outer { loop { break outer; } };").unwrap();
        assert_eq!(root.decls.len(), 1);
    }

    #[test]
    fn incomplete_input_is_flagged_needs_more_input() {
        let err = parse("if 1 == 1 {").unwrap_err();
        assert!(err.needs_more_input);
    }

    #[test]
    fn syntax_error_with_remaining_tokens_is_not_needs_more_input() {
        let err = parse("var = 1;").unwrap_err();
        assert!(!err.needs_more_input);
    }

    #[test]
    fn needs_more_input_converts_to_a_flagged_diagnostic() {
        let err = parse("if 1 == 1 {").unwrap_err();
        let diagnostic = err.into_diagnostic("<repl>");
        assert!(diagnostic.needs_more_input);
    }

    #[test]
    fn hard_failure_converts_to_an_unflagged_parse_diagnostic() {
        let err = parse("var = 1;").unwrap_err();
        let diagnostic = err.into_diagnostic("<repl>");
        assert!(!diagnostic.needs_more_input);
        assert_eq!(diagnostic.kind, DiagnosticKind::Parse);
    }

    #[test]
    fn parses_one_tuple_with_trailing_comma() {
        let root = parse("(1,);").unwrap();
        match &root.decls[0].kind {
            DeclKind::Stmt(Stmt { kind: StmtKind::Expr(expr), .. }) => match &expr.kind {
                ExprKind::Tuple(items) => assert_eq!(items.len(), 1),
                other => panic!("expected tuple, got {other:?}"),
            },
            other => panic!("expected stmt, got {other:?}"),
        }
    }

    #[test]
    fn parses_struct_init_and_field_access() {
        let root = parse("Point { x = 1, y = 2 }.x;").unwrap();
        assert_eq!(root.decls.len(), 1);
    }
}
