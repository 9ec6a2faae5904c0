//! The bidirectional type checker (§4.4): walks the AST produced by the
//! parser, resolving and validating types and annotating expression nodes
//! in place. Each `check_*` method optionally receives a *destination*
//! type and returns the type it inferred, propagating the destination
//! inward wherever the grammar allows it (struct/enum field inits,
//! procedure literal parameters, `var` initializers).

use std::collections::HashSet;

use num_bigint::BigInt;

use crate::common::multiphase::Identifier;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::parsing::ast::*;
use crate::scope::{LoopLabels, Scope};
use crate::types::{self, type_name, Field, FieldName, Type, TypeArena, TypeKind};

pub type Result<T> = std::result::Result<T, Diagnostic>;

fn scope_error(path: &str, span: crate::lexing::source::Span, note: impl Into<String>) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Scope, note, path, span)
}

fn type_error(path: &str, span: crate::lexing::source::Span, note: impl Into<String>) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Type, note, path, span)
}

/// Whether a bigint literal's magnitude is small enough to re-tag as `Float`
/// when the destination type calls for it (§4.4).
fn fits_f64_safely(n: &BigInt) -> bool {
    let bound = BigInt::from(9_007_199_254_740_992i64);
    n <= &bound && n >= &-bound
}

pub struct Checker {
    pub arena: TypeArena,
    pub type_scope: Scope<Type>,
    pub value_scope: Scope<Type>,
    loop_labels: LoopLabels,
    proc_return_stack: Vec<Type>,
    path: String,
}

impl Checker {
    pub fn new(path: impl Into<String>) -> Self {
        let arena = TypeArena::new();
        let mut type_scope = Scope::new();
        let mut value_scope = Scope::new();

        for name in crate::builtins::PRE_DECLARED_TYPE_NAMES {
            let ty = arena.primitive(name).expect("pre-declared type name");
            type_scope
                .declare(Identifier::from(*name), false, false, ty)
                .expect("builtins declare once into an empty scope");
        }

        let print_ty = arena.proc(vec![arena.any.clone()], arena.unit.clone());
        let clock_ty = arena.proc(vec![], arena.int.clone());
        let cat_ty = arena.proc(vec![arena.any.clone(), arena.any.clone()], arena.str_.clone());
        let print_type_ty = arena.proc(vec![arena.any.clone()], arena.str_.clone());
        for (name, ty) in [
            ("print", print_ty),
            ("clock", clock_ty),
            ("cat", cat_ty),
            ("print_type", print_type_ty),
        ] {
            value_scope
                .declare(Identifier::from(name), false, false, ty)
                .expect("builtins declare once into an empty scope");
        }

        Self {
            arena,
            type_scope,
            value_scope,
            loop_labels: LoopLabels::new(),
            proc_return_stack: Vec::new(),
            path: path.into(),
        }
    }

    pub fn check_root(&mut self, root: &Root) -> Result<Type> {
        let mut last = self.arena.unit.clone();
        for decl in &root.decls {
            last = self.check_decl(decl)?;
        }
        Ok(last)
    }

    fn check_decl(&mut self, decl: &Decl) -> Result<Type> {
        match &decl.kind {
            DeclKind::Var {
                mutable,
                pattern,
                annotation,
                assert,
                init,
            } => {
                let dest = annotation.as_ref().map(|te| self.check_type_expr(te)).transpose()?;
                let init_ty = self.check_expr(init, dest.as_ref())?;
                let final_ty = match &dest {
                    Some(d) => {
                        let ok = if *assert {
                            types::assertable(&init_ty, d)
                        } else {
                            types::assignable(&init_ty, d)
                        };
                        if !ok {
                            return Err(type_error(
                                &self.path,
                                init.span,
                                format!(
                                    "cannot assign a value of type \"{}\" to a variable of type \"{}\"",
                                    type_name(&init_ty),
                                    type_name(d)
                                ),
                            ));
                        }
                        d.clone()
                    }
                    None => init_ty,
                };
                self.check_pattern(pattern, &final_ty, *mutable, *assert)?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::Proc { name, literal } => {
                let proc_ty = self.check_proc_signature(literal, None, Some(name))?;
                self.value_scope
                    .declare(name.clone(), false, true, proc_ty.clone())
                    .map_err(|_| {
                        scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\""))
                    })?;
                self.check_proc_body(literal, &proc_ty)?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::TypeAlias { name, aliased } => {
                let resolved = self.check_type_expr(aliased)?;
                self.type_scope
                    .declare(name.clone(), false, true, resolved)
                    .map_err(|_| scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\"")))?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::Struct {
                name,
                tuple_form,
                fields,
            } => {
                let resolved_fields = self.check_field_decls(fields, *tuple_form)?;
                let struct_ty = self
                    .arena
                    .struct_(name.as_str().to_string(), *tuple_form, resolved_fields);
                self.type_scope
                    .declare(name.clone(), false, true, struct_ty.clone())
                    .map_err(|_| scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\"")))?;
                let module_ty = self.arena.module(name.as_str().to_string());
                if let TypeKind::Module { associated_type, .. } = &module_ty.kind {
                    *associated_type.borrow_mut() = Some(struct_ty);
                }
                self.value_scope
                    .declare(name.clone(), false, true, module_ty)
                    .map_err(|_| scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\"")))?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::Enum { name, variants } => {
                let enum_ty = self.arena.enum_(name.as_str().to_string());
                for variant in variants {
                    let resolved_fields = self.check_field_decls(&variant.fields, variant.tuple_form)?;
                    self.arena.push_variant(
                        &enum_ty,
                        variant.name.as_str().to_string(),
                        variant.constant,
                        variant.tuple_form,
                        resolved_fields,
                    );
                }
                self.type_scope
                    .declare(name.clone(), false, true, enum_ty.clone())
                    .map_err(|_| scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\"")))?;
                let module_ty = self.arena.module(name.as_str().to_string());
                if let TypeKind::Module { associated_type, .. } = &module_ty.kind {
                    *associated_type.borrow_mut() = Some(enum_ty);
                }
                self.value_scope
                    .declare(name.clone(), false, true, module_ty)
                    .map_err(|_| scope_error(&self.path, decl.span, format!("cannot redeclare \"{name}\"")))?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::Test { body, .. } => {
                self.check_block(body, None)?;
                Ok(self.arena.unit.clone())
            }
            DeclKind::Stmt(stmt) => self.check_stmt(stmt),
        }
    }

    fn check_field_decls(&mut self, fields: &[FieldDecl], tuple_form: bool) -> Result<Vec<Field>> {
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let ty = self.check_type_expr(&field.annotation)?;
                let name = if tuple_form {
                    FieldName::Positional(i)
                } else {
                    FieldName::Named(field.name.as_ref().expect("record field has a name").as_str().to_string())
                };
                Ok(Field {
                    mutable: field.mutable,
                    name,
                    ty,
                })
            })
            .collect()
    }

    // ---- Statements -----------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<Type> {
        match &stmt.kind {
            StmtKind::Break(label) | StmtKind::Continue(label) => {
                if !self.loop_labels.resolves(label) {
                    return Err(scope_error(
                        &self.path,
                        stmt.span,
                        "break/continue used outside of a matching loop",
                    ));
                }
                Ok(self.arena.unit.clone())
            }
            StmtKind::Return(expr) => {
                let expected = self.proc_return_stack.last().cloned();
                if expected.is_none() {
                    return Err(scope_error(&self.path, stmt.span, "return used outside of a procedure"));
                }
                let expected = expected.unwrap();
                let actual = match expr {
                    Some(e) => self.check_expr(e, Some(&expected))?,
                    None => self.arena.unit.clone(),
                };
                if !types::is_wildcard(&expected) && !types::assignable(&actual, &expected) {
                    return Err(type_error(
                        &self.path,
                        stmt.span,
                        format!(
                            "returned type \"{}\" is not assignable to the declared return type \"{}\"",
                            type_name(&actual),
                            type_name(&expected)
                        ),
                    ));
                }
                Ok(self.arena.unit.clone())
            }
            StmtKind::Assert(expr) => {
                let t = self.check_expr(expr, Some(&self.arena.bool_.clone()))?;
                if !types::assignable(&t, &self.arena.bool_) {
                    return Err(type_error(&self.path, expr.span, "assert requires a Bool expression"));
                }
                Ok(self.arena.unit.clone())
            }
            StmtKind::Loop { label, body } => {
                self.loop_labels.push(label.clone());
                let result = self.check_block(body, None);
                self.loop_labels.pop();
                result?;
                Ok(self.arena.unit.clone())
            }
            StmtKind::While { test, body } => {
                let t = self.check_expr(test, Some(&self.arena.bool_.clone()))?;
                if !types::assignable(&t, &self.arena.bool_) {
                    return Err(type_error(&self.path, test.span, "while condition must be Bool"));
                }
                self.loop_labels.push(None);
                let result = self.check_block(body, None);
                self.loop_labels.pop();
                result?;
                Ok(self.arena.unit.clone())
            }
            StmtKind::AssignVar { target, value } => {
                let decl = self
                    .value_scope
                    .lookup_declaration(target)
                    .ok_or_else(|| scope_error(&self.path, stmt.span, format!("undeclared identifier \"{target}\"")))?;
                if !decl.mutable {
                    return Err(scope_error(
                        &self.path,
                        stmt.span,
                        format!("cannot assign to constant \"{target}\""),
                    ));
                }
                let ty = decl.value.clone();
                let vt = self.check_expr(value, Some(&ty))?;
                if !types::assignable(&vt, &ty) {
                    return Err(type_error(
                        &self.path,
                        value.span,
                        format!(
                            "cannot assign a value of type \"{}\" to \"{target}\" of type \"{}\"",
                            type_name(&vt),
                            type_name(&ty)
                        ),
                    ));
                }
                Ok(self.arena.unit.clone())
            }
            StmtKind::AssignField { target, field, value } => {
                let target_ty = self.check_expr(target, None)?;
                let field_decl = lookup_named_field(&target_ty, field.as_str())
                    .ok_or_else(|| type_error(&self.path, stmt.span, format!("unknown field \"{field}\"")))?;
                if !field_decl.mutable {
                    return Err(scope_error(
                        &self.path,
                        stmt.span,
                        format!("cannot assign to constant field \"{field}\""),
                    ));
                }
                let field_ty = field_decl.ty.clone();
                let vt = self.check_expr(value, Some(&field_ty))?;
                if !types::assignable(&vt, &field_ty) {
                    return Err(type_error(&self.path, value.span, "field assignment type mismatch"));
                }
                Ok(self.arena.unit.clone())
            }
            StmtKind::Expr(expr) => self.check_expr(expr, None),
        }
    }

    // ---- Blocks -----------------------------------------------------------

    fn check_block(&mut self, block: &Block, dest: Option<&Type>) -> Result<Type> {
        self.value_scope.push_frame();
        let result = self.check_block_items(block, dest);
        self.value_scope.pop_frame();
        result
    }

    fn check_block_items(&mut self, block: &Block, dest: Option<&Type>) -> Result<Type> {
        let mut last = self.arena.unit.clone();
        let len = block.items.len();
        for (i, item) in block.items.iter().enumerate() {
            let is_last = i + 1 == len;
            last = match item {
                BlockItem::Decl(d) => {
                    self.check_decl(d)?;
                    self.arena.unit.clone()
                }
                BlockItem::Stmt(Stmt {
                    kind: StmtKind::Expr(e),
                    ..
                }) if is_last => self.check_expr(e, dest)?,
                BlockItem::Stmt(s) => self.check_stmt(s)?,
            };
        }
        Ok(last)
    }

    // ---- Procedure literals ------------------------------------------------

    fn check_proc_signature(
        &mut self,
        literal: &ProcLiteral,
        dest: Option<&Type>,
        _name: Option<&Identifier>,
    ) -> Result<Type> {
        let dest_proc = dest.and_then(|d| match &d.kind {
            TypeKind::Proc { params, returns } => Some((params.clone(), returns.clone())),
            _ => None,
        });
        let mut param_types = Vec::with_capacity(literal.params.len());
        for (i, param) in literal.params.iter().enumerate() {
            let ty = if let Some(te) = &param.annotation {
                self.check_type_expr(te)?
            } else if let Some((dest_params, _)) = &dest_proc {
                dest_params
                    .get(i)
                    .cloned()
                    .ok_or_else(|| type_error(&self.path, literal.span, "no destination type for parameter"))?
            } else {
                return Err(type_error(
                    &self.path,
                    literal.span,
                    "parameter needs a type annotation (no destination type is available here)",
                ));
            };
            param_types.push(ty);
        }
        let return_ty = if let Some(te) = &literal.return_annotation {
            self.check_type_expr(te)?
        } else if let Some((_, dest_returns)) = &dest_proc {
            dest_returns
        } else {
            self.arena.wildcard()
        };
        Ok(self.arena.proc(param_types, return_ty))
    }

    fn check_proc_body(&mut self, literal: &ProcLiteral, proc_ty: &Type) -> Result<()> {
        let (params, returns) = match &proc_ty.kind {
            TypeKind::Proc { params, returns } => (params.clone(), returns.clone()),
            _ => unreachable!("check_proc_signature always returns a Proc type"),
        };
        self.value_scope.push_frame();
        for (param, ty) in literal.params.iter().zip(params.iter()) {
            let result = self.check_pattern(&param.pattern, ty, false, false);
            if let Err(e) = result {
                self.value_scope.pop_frame();
                return Err(e);
            }
        }
        self.proc_return_stack.push(returns.clone());
        let body_result = self.check_block_items(&literal.body, Some(&returns));
        self.proc_return_stack.pop();
        self.value_scope.pop_frame();
        let body_ty = body_result?;
        if !types::is_wildcard(&returns) && !types::assignable(&body_ty, &returns) {
            return Err(type_error(
                &self.path,
                literal.body.span,
                format!(
                    "procedure body evaluates to \"{}\" but the declared return type is \"{}\"",
                    type_name(&body_ty),
                    type_name(&returns)
                ),
            ));
        }
        Ok(())
    }

    fn check_proc_literal(&mut self, literal: &ProcLiteral, dest: Option<&Type>) -> Result<Type> {
        let proc_ty = self.check_proc_signature(literal, dest, None)?;
        self.check_proc_body(literal, &proc_ty)?;
        Ok(proc_ty)
    }

    // ---- Expressions (§4.4) ------------------------------------------------

    pub fn check_expr(&mut self, expr: &Expr, dest: Option<&Type>) -> Result<Type> {
        let ty = self.check_expr_kind(expr, dest)?;
        *expr.resolved_type.borrow_mut() = Some(ty.clone());
        Ok(ty)
    }

    fn check_expr_kind(&mut self, expr: &Expr, dest: Option<&Type>) -> Result<Type> {
        match &expr.kind {
            ExprKind::Block(block) => self.check_block(block, dest),
            ExprKind::Tuple(items) => {
                let dest_items = match dest.map(|d| &d.kind) {
                    Some(TypeKind::Tuple(ts)) if ts.len() == items.len() => Some(ts.clone()),
                    _ => None,
                };
                let mut resolved = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_dest = dest_items.as_ref().and_then(|ts| ts.get(i));
                    resolved.push(self.check_expr(item, item_dest)?);
                }
                Ok(self.arena.tuple(resolved))
            }
            ExprKind::StructInit { name, fields, spread } => {
                let struct_ty = self
                    .type_scope
                    .lookup(name)
                    .ok_or_else(|| scope_error(&self.path, expr.span, format!("unknown type \"{name}\"")))?;
                self.check_record_field_inits(expr.span, &struct_ty, fields, spread.as_ref())?;
                Ok(struct_ty)
            }
            ExprKind::EnumInit {
                enum_name,
                variant_name,
                fields,
            } => {
                let enum_ty = self
                    .type_scope
                    .lookup(enum_name)
                    .ok_or_else(|| scope_error(&self.path, expr.span, format!("unknown type \"{enum_name}\"")))?;
                let variant_ty = find_variant(&enum_ty, variant_name.as_str()).ok_or_else(|| {
                    type_error(
                        &self.path,
                        expr.span,
                        format!("enum \"{enum_name}\" has no variant \"{variant_name}\""),
                    )
                })?;
                self.check_record_field_inits(expr.span, &variant_ty, fields, None)?;
                Ok(enum_ty)
            }
            ExprKind::Group(inner) => self.check_expr(inner, dest),
            ExprKind::If {
                pattern,
                asserted_type,
                test,
                then,
                else_,
            } => {
                let tested = self.check_expr(test, None)?;
                self.value_scope.push_frame();
                let then_result = (|| {
                    if let Some(pattern) = pattern {
                        let scrutinee = match asserted_type {
                            Some(te) => self.check_type_expr(te)?,
                            None => tested.clone(),
                        };
                        self.check_pattern(pattern, &scrutinee, false, true)?;
                    } else if !types::assignable(&tested, &self.arena.bool_) {
                        return Err(type_error(&self.path, test.span, "if condition must be Bool"));
                    }
                    self.check_block_items(then, dest)
                })();
                self.value_scope.pop_frame();
                let then_ty = then_result?;
                match else_ {
                    Some(else_block) => {
                        let else_ty = self.check_block(else_block, dest)?;
                        Ok(types::union(&[then_ty, else_ty], &self.arena.any))
                    }
                    None => Ok(self.arena.unit.clone()),
                }
            }
            ExprKind::Match { test, cases } => {
                let scrutinee = match test {
                    Some(t) => self.check_expr(t, None)?,
                    None => self.arena.bool_.clone(),
                };
                let mut case_types = Vec::with_capacity(cases.len());
                for case in cases {
                    self.value_scope.push_frame();
                    let result = (|| {
                        let case_scrutinee = match &case.asserted_type {
                            Some(te) => self.check_type_expr(te)?,
                            None => scrutinee.clone(),
                        };
                        self.check_pattern(&case.pattern, &case_scrutinee, false, true)?;
                        if let Some(guard) = &case.guard {
                            let guard_ty = self.check_expr(guard, Some(&self.arena.bool_.clone()))?;
                            if !types::assignable(&guard_ty, &self.arena.bool_) {
                                return Err(type_error(&self.path, guard.span, "match guard must be Bool"));
                            }
                        }
                        self.check_expr(&case.body, None)
                    })();
                    self.value_scope.pop_frame();
                    case_types.push(result?);
                }
                if !self.match_is_exhaustive(&scrutinee, cases) {
                    case_types.push(self.arena.unit.clone());
                }
                Ok(types::union(&case_types, &self.arena.any))
            }
            ExprKind::Throw(inner) => {
                self.check_expr(inner, None)?;
                Ok(self.arena.never.clone())
            }
            ExprKind::Proc(literal) => self.check_proc_literal(literal, dest),
            ExprKind::TypeValue(te) => {
                self.check_type_expr(te)?;
                Ok(self.arena.type_.clone())
            }
            ExprKind::Binary { op, left, right } => self.check_binary(*op, left, right),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand),
            ExprKind::Call { callee, args } => self.check_call(expr.span, callee, args),
            ExprKind::Member { target, field } => self.check_member(expr.span, target, field),
            ExprKind::Literal(lit) => Ok(self.check_literal(lit, dest)),
            ExprKind::Identifier(name) => self
                .value_scope
                .lookup(name)
                .ok_or_else(|| scope_error(&self.path, expr.span, format!("undeclared identifier \"{name}\""))),
        }
    }

    fn check_literal(&self, lit: &Literal, dest: Option<&Type>) -> Type {
        match lit {
            Literal::Bool(_) => self.arena.bool_.clone(),
            Literal::Str(_) => self.arena.str_.clone(),
            Literal::Float(_) => self.arena.float.clone(),
            Literal::Int(n) => {
                let dest_is_float = dest.map_or(false, |d| matches!(d.kind, TypeKind::Primitive("Float")));
                if dest_is_float && fits_f64_safely(n) {
                    self.arena.float.clone()
                } else {
                    self.arena.int.clone()
                }
            }
        }
    }

    fn check_record_field_inits(
        &mut self,
        span: crate::lexing::source::Span,
        ty: &Type,
        fields: &[FieldInit],
        spread: Option<&Expr>,
    ) -> Result<()> {
        let declared_fields: Vec<Field> = match &ty.kind {
            TypeKind::Struct { fields, .. } => fields.clone(),
            TypeKind::Variant { fields, .. } => fields.clone(),
            _ => return Err(type_error(&self.path, span, "not a struct or variant type")),
        };
        let mut seen = HashSet::new();
        for init in fields {
            let (key, declared_name, lookup_name) = match &init.name {
                FieldInitName::Named(name) => {
                    (format!("n:{name}"), name.to_string(), FieldName::Named(name.as_str().to_string()))
                }
                FieldInitName::Positional(i) => (format!("p:{i}"), i.to_string(), FieldName::Positional(*i)),
            };
            if !seen.insert(key) {
                return Err(type_error(
                    &self.path,
                    span,
                    format!("duplicate field initializer \"{declared_name}\""),
                ));
            }
            let declared = declared_fields
                .iter()
                .find(|f| f.name == lookup_name)
                .ok_or_else(|| type_error(&self.path, span, format!("unknown field \"{declared_name}\"")))?;
            let field_ty = declared.ty.clone();
            let value_ty = self.check_expr(&init.value, Some(&field_ty))?;
            if !types::assignable(&value_ty, &field_ty) {
                return Err(type_error(
                    &self.path,
                    init.value.span,
                    format!("field \"{declared_name}\" type mismatch"),
                ));
            }
        }
        if let Some(spread) = spread {
            let spread_ty = self.check_expr(spread, Some(ty))?;
            if !types::assignable(&spread_ty, ty) {
                return Err(type_error(&self.path, spread.span, "spread expression has an incompatible type"));
            }
        } else {
            let missing = declared_fields.len() != seen.len();
            if missing {
                return Err(type_error(&self.path, span, "missing field initializer(s)"));
            }
        }
        Ok(())
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Type> {
        use BinaryOp::*;
        match op {
            Or | And => {
                let lt = self.check_expr(left, Some(&self.arena.bool_.clone()))?;
                let rt = self.check_expr(right, Some(&self.arena.bool_.clone()))?;
                if !types::assignable(&lt, &self.arena.bool_) || !types::assignable(&rt, &self.arena.bool_) {
                    return Err(type_error(&self.path, left.span.join(right.span), "operands must be Bool"));
                }
                Ok(self.arena.bool_.clone())
            }
            Eq | NotEq | IdEq | IdNotEq => {
                let lt = self.check_expr(left, None)?;
                let rt = self.check_expr(right, None)?;
                if !types::assignable(&lt, &rt) && !types::assignable(&rt, &lt) {
                    return Err(type_error(&self.path, left.span.join(right.span), "operands are not comparable"));
                }
                Ok(self.arena.bool_.clone())
            }
            Lt | LtEq | Gt | GtEq => {
                let lt = self.check_expr(left, None)?;
                let rt = self.check_expr(right, None)?;
                if !self.is_numeric(&lt) || !self.is_numeric(&rt) {
                    return Err(type_error(&self.path, left.span.join(right.span), "comparison requires numeric operands"));
                }
                Ok(self.arena.bool_.clone())
            }
            Add | Sub | Mul | Rem | Div => {
                let lt = self.check_expr(left, None)?;
                let rt = self.check_expr(right, None)?;
                if !self.is_numeric(&lt) || !self.is_numeric(&rt) {
                    return Err(type_error(&self.path, left.span.join(right.span), "arithmetic requires numeric operands"));
                }
                if std::rc::Rc::ptr_eq(&lt, &self.arena.float) || std::rc::Rc::ptr_eq(&rt, &self.arena.float) {
                    Ok(self.arena.float.clone())
                } else {
                    Ok(self.arena.int.clone())
                }
            }
            Default => {
                let lt = self.check_expr(left, None)?;
                let rt = self.check_expr(right, None)?;
                Ok(types::union(&[lt, rt], &self.arena.any))
            }
        }
    }

    fn is_numeric(&self, t: &Type) -> bool {
        std::rc::Rc::ptr_eq(t, &self.arena.int) || std::rc::Rc::ptr_eq(t, &self.arena.float)
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Type> {
        match op {
            UnaryOp::Neg => {
                let t = self.check_expr(operand, None)?;
                if !self.is_numeric(&t) {
                    return Err(type_error(&self.path, operand.span, "unary '-' requires a numeric operand"));
                }
                Ok(t)
            }
            UnaryOp::Not => {
                let t = self.check_expr(operand, Some(&self.arena.bool_.clone()))?;
                if !types::assignable(&t, &self.arena.bool_) {
                    return Err(type_error(&self.path, operand.span, "unary '!' requires a Bool operand"));
                }
                Ok(self.arena.bool_.clone())
            }
            UnaryOp::Spread => self.check_expr(operand, None),
        }
    }

    fn check_call(&mut self, span: crate::lexing::source::Span, callee: &Expr, args: &[Expr]) -> Result<Type> {
        let callee_ty = self.check_expr(callee, None)?;
        match &callee_ty.kind {
            TypeKind::Proc { params, returns } => {
                if params.len() != args.len() {
                    return Err(type_error(
                        &self.path,
                        span,
                        format!("expected {} argument(s), got {}", params.len(), args.len()),
                    ));
                }
                for (arg, param_ty) in args.iter().zip(params.iter()) {
                    let arg_ty = self.check_expr(arg, Some(param_ty))?;
                    if !types::assignable(&arg_ty, param_ty) {
                        return Err(type_error(&self.path, arg.span, "argument type mismatch"));
                    }
                }
                Ok(returns.clone())
            }
            TypeKind::Module { associated_type, .. } => {
                let assoc = associated_type
                    .borrow()
                    .clone()
                    .ok_or_else(|| type_error(&self.path, span, "module has no associated constructor"))?;
                let (tuple_form, fields) = match &assoc.kind {
                    TypeKind::Struct { tuple_form, fields, .. } => (*tuple_form, fields.clone()),
                    TypeKind::Variant { tuple_form, fields, .. } => (*tuple_form, fields.clone()),
                    _ => return Err(type_error(&self.path, span, "not callable")),
                };
                if !tuple_form {
                    return Err(type_error(
                        &self.path,
                        span,
                        "cannot call a non-tuple struct/variant as a constructor",
                    ));
                }
                if fields.len() != args.len() {
                    return Err(type_error(
                        &self.path,
                        span,
                        format!("expected {} argument(s), got {}", fields.len(), args.len()),
                    ));
                }
                for (arg, field) in args.iter().zip(fields.iter()) {
                    let arg_ty = self.check_expr(arg, Some(&field.ty))?;
                    if !types::assignable(&arg_ty, &field.ty) {
                        return Err(type_error(&self.path, arg.span, "constructor argument type mismatch"));
                    }
                }
                Ok(assoc)
            }
            _ => Err(type_error(&self.path, span, "call of a non-callable value")),
        }
    }

    fn check_member(&mut self, span: crate::lexing::source::Span, target: &Expr, field: &MemberField) -> Result<Type> {
        let target_ty = self.check_expr(target, None)?;
        match field {
            MemberField::Named(name) => {
                if let TypeKind::Module { associated_type, .. } = &target_ty.kind {
                    if let Some(assoc) = associated_type.borrow().clone() {
                        if let TypeKind::Enum { .. } = &assoc.kind {
                            let variant = find_variant(&assoc, name.as_str()).ok_or_else(|| {
                                type_error(&self.path, span, format!("unknown variant \"{name}\""))
                            })?;
                            let is_constant = matches!(&variant.kind, TypeKind::Variant { constant: true, .. });
                            if is_constant {
                                return Ok(assoc);
                            }
                            let wrapper = self
                                .arena
                                .module(format!("{}.{}", type_name(&assoc), name));
                            if let TypeKind::Module { associated_type, .. } = &wrapper.kind {
                                *associated_type.borrow_mut() = Some(variant);
                            }
                            return Ok(wrapper);
                        }
                    }
                }
                lookup_named_field(&target_ty, name.as_str())
                    .map(|f| f.ty.clone())
                    .ok_or_else(|| type_error(&self.path, span, format!("unknown field \"{name}\"")))
            }
            MemberField::Positional(index) => lookup_positional_field(&target_ty, *index)
                .ok_or_else(|| type_error(&self.path, span, format!("no field at position {index}"))),
        }
    }

    fn match_is_exhaustive(&self, scrutinee: &Type, cases: &[MatchCase]) -> bool {
        if cases
            .iter()
            .any(|c| matches!(c.pattern.kind, PatternKind::Wildcard) && c.guard.is_none())
        {
            return true;
        }
        let covers_with_assignable_type = cases.iter().any(|c| {
            c.guard.is_none()
                && matches!(
                    c.pattern.kind,
                    PatternKind::Wildcard | PatternKind::Identifier { .. }
                )
                && c.asserted_type
                    .as_ref()
                    .and_then(|te| self.peek_type_expr(te))
                    .map_or(false, |t| types::assignable(scrutinee, &t))
        });
        if covers_with_assignable_type {
            return true;
        }
        if let TypeKind::Enum { variants, .. } = &scrutinee.kind {
            let names: HashSet<String> = variants
                .borrow()
                .iter()
                .filter_map(|v| match &v.kind {
                    TypeKind::Variant { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect();
            let covered: HashSet<String> = cases
                .iter()
                .filter(|c| c.guard.is_none())
                .filter_map(|c| match &c.pattern.kind {
                    PatternKind::Variant { variant_name, .. } => Some(variant_name.as_str().to_string()),
                    _ => None,
                })
                .collect();
            if names.iter().all(|n| covered.contains(n)) {
                return true;
            }
        }
        false
    }

    /// A read-only peek at a type expression's resolved type, used only by
    /// exhaustiveness checking so it never mutates scopes on a dry run.
    fn peek_type_expr(&self, te: &TypeExpr) -> Option<Type> {
        match &te.kind {
            TypeExprKind::Identifier(name) => self.arena.primitive(name.as_str()).or_else(|| self.type_scope.lookup(name)),
            TypeExprKind::Wildcard => Some(self.arena.wildcard()),
            _ => None,
        }
    }

    // ---- Patterns (§4.4) ----------------------------------------------------

    fn check_pattern(&mut self, pattern: &Pattern, scrutinee: &Type, mutable: bool, assert: bool) -> Result<()> {
        match &pattern.kind {
            PatternKind::Wildcard => Ok(()),
            PatternKind::Literal(lit) => {
                if !assert {
                    return Err(type_error(&self.path, pattern.span, "literal pattern outside an asserted context"));
                }
                let lit_ty = self.check_literal(lit, Some(scrutinee));
                if !types::assertable(&lit_ty, scrutinee) {
                    return Err(type_error(&self.path, pattern.span, "literal pattern does not match scrutinee type"));
                }
                Ok(())
            }
            PatternKind::Identifier { name, .. } => {
                self.value_scope
                    .declare(name.clone(), mutable, true, scrutinee.clone())
                    .map_err(|_| scope_error(&self.path, pattern.span, format!("cannot redeclare \"{name}\"")))
            }
            PatternKind::As(a, b) => {
                self.check_pattern(a, scrutinee, mutable, assert)?;
                self.check_pattern(b, scrutinee, mutable, assert)
            }
            PatternKind::Tuple(items) => match &scrutinee.kind {
                TypeKind::Tuple(elts) if elts.len() == items.len() => {
                    for (item, elt) in items.iter().zip(elts.iter()) {
                        self.check_pattern(item, elt, mutable, assert)?;
                    }
                    Ok(())
                }
                _ => Err(type_error(
                    &self.path,
                    pattern.span,
                    format!("expected a tuple of arity {}", items.len()),
                )),
            },
            PatternKind::Struct {
                name,
                tuple_form,
                fields,
            } => {
                let struct_ty = self
                    .type_scope
                    .lookup(name)
                    .ok_or_else(|| scope_error(&self.path, pattern.span, format!("unknown type \"{name}\"")))?;
                self.check_constructor_pattern(pattern.span, &struct_ty, *tuple_form, fields, scrutinee, mutable, assert)
            }
            PatternKind::Variant {
                enum_name,
                variant_name,
                tuple_form,
                fields,
            } => {
                let enum_name = enum_name
                    .as_ref()
                    .ok_or_else(|| type_error(&self.path, pattern.span, "variant patterns must be qualified"))?;
                let enum_ty = self
                    .type_scope
                    .lookup(enum_name)
                    .ok_or_else(|| scope_error(&self.path, pattern.span, format!("unknown type \"{enum_name}\"")))?;
                let variant_ty = find_variant(&enum_ty, variant_name.as_str()).ok_or_else(|| {
                    type_error(
                        &self.path,
                        pattern.span,
                        format!("enum \"{enum_name}\" has no variant \"{variant_name}\""),
                    )
                })?;
                self.check_constructor_pattern(pattern.span, &variant_ty, *tuple_form, fields, scrutinee, mutable, assert)
            }
        }
    }

    fn check_constructor_pattern(
        &mut self,
        span: crate::lexing::source::Span,
        constructor_ty: &Type,
        tuple_form: bool,
        fields: &[PatternField],
        scrutinee: &Type,
        mutable: bool,
        assert: bool,
    ) -> Result<()> {
        let ok = if assert {
            types::assertable(scrutinee, constructor_ty)
        } else {
            types::assignable(scrutinee, constructor_ty)
        };
        if !ok {
            return Err(type_error(
                &self.path,
                span,
                format!(
                    "scrutinee of type \"{}\" cannot match a pattern of type \"{}\"",
                    type_name(scrutinee),
                    type_name(constructor_ty)
                ),
            ));
        }
        let declared_fields: Vec<Field> = match &constructor_ty.kind {
            TypeKind::Struct { fields, tuple_form: declared_tuple, .. } => {
                if *declared_tuple != tuple_form {
                    return Err(type_error(&self.path, span, "pattern shape does not match the declared shape"));
                }
                fields.clone()
            }
            TypeKind::Variant { fields, tuple_form: declared_tuple, .. } => {
                if *declared_tuple != tuple_form {
                    return Err(type_error(&self.path, span, "pattern shape does not match the declared shape"));
                }
                fields.clone()
            }
            _ => return Err(type_error(&self.path, span, "not a struct or variant type")),
        };
        for pat_field in fields {
            let declared = match &pat_field.name {
                FieldInitName::Positional(i) => declared_fields.iter().find(|f| f.name == FieldName::Positional(*i)),
                FieldInitName::Named(name) => declared_fields.iter().find(|f| f.name == FieldName::Named(name.as_str().to_string())),
            };
            let declared = declared.ok_or_else(|| type_error(&self.path, span, "unknown field in pattern"))?;
            self.check_pattern(&pat_field.pattern, &declared.ty.clone(), mutable, assert)?;
        }
        Ok(())
    }

    // ---- Type expressions (§3.2) --------------------------------------------

    pub fn check_type_expr(&mut self, te: &TypeExpr) -> Result<Type> {
        match &te.kind {
            TypeExprKind::Identifier(name) => self
                .arena
                .primitive(name.as_str())
                .or_else(|| self.type_scope.lookup(name))
                .ok_or_else(|| scope_error(&self.path, te.span, format!("unknown type \"{name}\""))),
            TypeExprKind::Wildcard => Ok(self.arena.wildcard()),
            TypeExprKind::Proc { params, returns } => {
                let params = params.iter().map(|p| self.check_type_expr(p)).collect::<Result<Vec<_>>>()?;
                let returns = self.check_type_expr(returns)?;
                Ok(self.arena.proc(params, returns))
            }
            TypeExprKind::Tuple(items) => {
                let items = items.iter().map(|t| self.check_type_expr(t)).collect::<Result<Vec<_>>>()?;
                Ok(self.arena.tuple(items))
            }
        }
    }
}

fn lookup_named_field<'a>(ty: &'a Type, name: &str) -> Option<&'a Field> {
    match &ty.kind {
        TypeKind::Struct { fields, .. } | TypeKind::Variant { fields, .. } => {
            fields.iter().find(|f| f.name == FieldName::Named(name.to_string()))
        }
        _ => None,
    }
}

fn lookup_positional_field(ty: &Type, index: usize) -> Option<Type> {
    match &ty.kind {
        TypeKind::Tuple(items) => items.get(index).cloned(),
        TypeKind::Struct { fields, .. } | TypeKind::Variant { fields, .. } => {
            fields.iter().find(|f| f.name == FieldName::Positional(index)).map(|f| f.ty.clone())
        }
        _ => None,
    }
}

fn find_variant(enum_ty: &Type, name: &str) -> Option<Type> {
    match &enum_ty.kind {
        TypeKind::Enum { variants, .. } => variants.borrow().iter().find(|v| match &v.kind {
            TypeKind::Variant { name: n, .. } => n.as_str() == name,
            _ => false,
        }).cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexing::source::CodeSource;
    use crate::lexing::Tokens;
    use crate::parsing::Parser;

    fn check(src: &str) -> Result<Type> {
        let tokens = Tokens::new(CodeSource::new("<test>", src));
        let mut parser = Parser::new(tokens);
        let root = parser.parse_root().expect("source parses");
        Checker::new("<test>").check_root(&root)
    }

    #[test]
    fn infers_int_literal_without_annotation() {
        let ty = check("var x = 1;").unwrap();
        assert_eq!(type_name(&ty), "Unit");
    }

    #[test]
    fn coerces_int_literal_to_float_destination() {
        let root_src = "var x: Float = 1;";
        let tokens = Tokens::new(CodeSource::new("<test>", root_src));
        let mut parser = Parser::new(tokens);
        let root = parser.parse_root().unwrap();
        let mut checker = Checker::new("<test>");
        checker.check_root(&root).unwrap();
        match &root.decls[0].kind {
            DeclKind::Var { init, .. } => {
                let resolved = init.resolved_type.borrow().clone().unwrap();
                assert_eq!(type_name(&resolved), "Float");
            }
            other => panic!("expected a var decl, got {other:?}"),
        }
    }

    #[test]
    fn rejects_mismatched_var_annotation() {
        let err = check("var x: Int = \"hi\";").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Type);
    }

    #[test]
    fn struct_construction_and_field_access_type_check() {
        check("struct Point { x: Int, y: Int }; var p = Point { x = 1, y = 2 }; p.x;").unwrap();
    }

    #[test]
    fn tuple_form_struct_is_called_not_record_initialized() {
        check("struct Pair(Int, Int); var p = Pair(1, 2); p.0;").unwrap();
    }

    #[test]
    fn missing_field_initializer_is_rejected() {
        let err = check("struct Point { x: Int, y: Int }; var p = Point { x = 1 };").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Type);
    }

    #[test]
    fn exhaustive_enum_match_type_checks() {
        check(
            "enum Color { Red, Green, Blue }; var c = Color.Red; \
             match c { Color.Red => 1, Color.Green => 2, Color.Blue => 3 };",
        )
        .unwrap();
    }

    #[test]
    fn non_exhaustive_enum_match_widens_to_include_unit() {
        let root_src = "enum Color { Red, Green, Blue }; var c = Color.Red; match c { Color.Red => 1 };";
        let tokens = Tokens::new(CodeSource::new("<test>", root_src));
        let mut parser = Parser::new(tokens);
        let root = parser.parse_root().unwrap();
        let mut checker = Checker::new("<test>");
        checker.check_root(&root).unwrap();
        match &root.decls[2].kind {
            DeclKind::Stmt(Stmt { kind: StmtKind::Expr(e), .. }) => {
                let resolved = e.resolved_type.borrow().clone().unwrap();
                assert_eq!(type_name(&resolved), "Any");
            }
            other => panic!("expected a match stmt, got {other:?}"),
        }
    }

    #[test]
    fn recursive_proc_can_call_itself() {
        check("proc countdown(n: Int) -> Int { if n <= 0 { 0 } else { countdown(n - 1) } };").unwrap();
    }

    #[test]
    fn break_outside_a_loop_is_a_scope_error() {
        let err = check("break;").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Scope);
    }

    #[test]
    fn undeclared_identifier_is_a_scope_error() {
        let err = check("nonexistent;").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Scope);
    }

    #[test]
    fn default_operator_type_checks_mismatched_operands() {
        check("1 ? \"fallback\";").unwrap();
    }
}
