//! The tree-walking evaluator (§4.5): walks the same AST the checker already
//! annotated and produces runtime `Value`s. Checking is assumed to have
//! already succeeded — the evaluator trusts `resolved_type` slots and
//! `assert`-guarded constructs rather than re-validating shapes.
//!
//! Control flow (`break`, `continue`, `return`) is modeled as an `Err(Flow)`
//! that unwinds the Rust call stack until the enclosing loop or procedure
//! call consumes it, the same "errors as values, not host exceptions"
//! discipline the lexer and parser already use for their own failures.

use std::io::Write;
use std::rc::Rc;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::common::multiphase::Identifier;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::lexing::source::Span;
use crate::parsing::ast::*;
use crate::scope::Scope;
use crate::types::{Type, TypeArena, TypeKind};
use crate::value::{ProcImpl, Value};

/// Unwinds the Rust stack for both genuine errors and in-language control
/// flow; the latter is always caught by the loop/procedure that owns it.
pub enum Flow {
    Diagnostic(Diagnostic),
    Break(Option<Identifier>),
    Continue(Option<Identifier>),
    Return(Value),
}

impl From<Diagnostic> for Flow {
    fn from(diagnostic: Diagnostic) -> Self {
        Flow::Diagnostic(diagnostic)
    }
}

pub type EvalResult = Result<Value, Flow>;

fn runtime_error(path: &str, span: Span, note: impl Into<String>) -> Flow {
    Flow::Diagnostic(Diagnostic::new(DiagnosticKind::Runtime, note, path, span))
}

pub struct Evaluator {
    pub arena: TypeArena,
    pub type_scope: Scope<Type>,
    pub value_scope: Scope<Value>,
    path: String,
    test_mode: bool,
    out: Box<dyn Write>,
    /// Per-variant memo for constant (zero-field) enum variants (§3.5): keyed
    /// by the variant type's own pointer identity, so repeated access of the
    /// same `EnumName.Variant` returns the same `Value::Enum` and `===` holds.
    variant_memo: std::cell::RefCell<std::collections::HashMap<usize, Value>>,
}

impl Evaluator {
    pub fn new(
        arena: TypeArena,
        type_scope: Scope<Type>,
        path: impl Into<String>,
        test_mode: bool,
        out: Box<dyn Write>,
    ) -> Self {
        Self {
            arena,
            type_scope,
            value_scope: Scope::new(),
            path: path.into(),
            test_mode,
            out,
            variant_memo: std::cell::RefCell::new(std::collections::HashMap::new()),
        }
    }

    /// Returns the memoized `Value::Enum` for a constant variant, building
    /// and caching it on first access (§3.5). `variant_ty` must be a
    /// zero-field `TypeKind::Variant`; its `Rc` pointer is the memo key since
    /// each variant term is allocated exactly once per enum (§3.3).
    fn constant_variant(&self, index: usize, variant_ty: Type) -> Value {
        let key = Rc::as_ptr(&variant_ty) as usize;
        if let Some(existing) = self.variant_memo.borrow().get(&key) {
            return existing.clone();
        }
        let value = Value::Enum(index, Rc::new(std::cell::RefCell::new(IndexMap::new())), variant_ty);
        self.variant_memo.borrow_mut().insert(key, value.clone());
        value
    }

    pub fn eval_root(&mut self, root: &Root) -> Result<Value, Diagnostic> {
        let mut last = Value::Unit;
        for decl in &root.decls {
            match self.eval_decl(decl) {
                Ok(v) => last = v,
                Err(Flow::Diagnostic(d)) => return Err(d),
                Err(Flow::Return(_)) => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Runtime,
                        "return used outside of a procedure",
                        self.path.clone(),
                        decl.span,
                    ))
                }
                Err(Flow::Break(_)) | Err(Flow::Continue(_)) => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Runtime,
                        "break/continue used outside of a loop",
                        self.path.clone(),
                        decl.span,
                    ))
                }
            }
        }
        Ok(last)
    }

    fn eval_decl(&mut self, decl: &Decl) -> EvalResult {
        match &decl.kind {
            DeclKind::Var { mutable, pattern, init, .. } => {
                let value = self.eval_expr(init)?;
                self.bind_pattern(pattern, value, *mutable);
                Ok(Value::Unit)
            }
            DeclKind::Proc { name, literal } => {
                let proc_value = self.make_procedure(Some(name.clone()), literal);
                self.value_scope
                    .declare(name.clone(), false, true, proc_value)
                    .expect("checker already validated this declaration");
                Ok(Value::Unit)
            }
            DeclKind::TypeAlias { .. } => Ok(Value::Unit),
            DeclKind::Struct { name, .. } => {
                let struct_ty = self
                    .type_scope
                    .lookup(name)
                    .expect("checker declared this type");
                self.declare_module_value(name, struct_ty);
                Ok(Value::Unit)
            }
            DeclKind::Enum { name, .. } => {
                let enum_ty = self
                    .type_scope
                    .lookup(name)
                    .expect("checker declared this type");
                self.declare_module_value(name, enum_ty);
                Ok(Value::Unit)
            }
            DeclKind::Test { name, body } => {
                if self.test_mode {
                    match self.eval_block(body) {
                        Ok(_) => log::info!("test \"{name}\" passed"),
                        Err(Flow::Diagnostic(d)) => {
                            log::warn!("test \"{name}\" failed: {}", d.note);
                            return Err(Flow::Diagnostic(d));
                        }
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Unit)
            }
            DeclKind::Stmt(stmt) => self.eval_stmt(stmt),
        }
    }

    fn declare_module_value(&mut self, name: &Identifier, associated: Type) {
        let module_ty = self.arena.module(name.as_str().to_string());
        if let TypeKind::Module { associated_type, .. } = &module_ty.kind {
            *associated_type.borrow_mut() = Some(associated);
        }
        self.value_scope
            .declare(name.clone(), false, true, Value::Module(name.clone(), module_ty))
            .expect("checker already validated this declaration");
    }

    fn make_procedure(&mut self, name: Option<Identifier>, literal: &ProcLiteral) -> Value {
        let param_types = literal
            .params
            .iter()
            .map(|p| p.annotation.as_ref().map_or_else(|| self.arena.any.clone(), |te| self.resolve_type_expr(te)))
            .collect();
        let return_type = literal
            .return_annotation
            .as_ref()
            .map_or_else(|| self.arena.wildcard(), |te| self.resolve_type_expr(te));
        let proc_ty = self.arena.proc(param_types, return_type);
        let imp = ProcImpl {
            name,
            params: Rc::new(literal.params.clone()),
            body: Rc::new(literal.body.clone()),
            captured: self.value_scope.capture(),
        };
        Value::Procedure(Rc::new(imp), proc_ty)
    }

    // ---- Statements ---------------------------------------------------------

    fn eval_stmt(&mut self, stmt: &Stmt) -> EvalResult {
        match &stmt.kind {
            StmtKind::Break(label) => Err(Flow::Break(label.clone())),
            StmtKind::Continue(label) => Err(Flow::Continue(label.clone())),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Unit,
                };
                Err(Flow::Return(value))
            }
            StmtKind::Assert(expr) => {
                let value = self.eval_expr(expr)?;
                if as_bool(&value) {
                    Ok(Value::Unit)
                } else {
                    Err(runtime_error(&self.path, stmt.span, "assertion failed"))
                }
            }
            StmtKind::Loop { label, body } => self.eval_loop(label.clone(), body),
            StmtKind::While { test, body } => self.eval_while(test, body),
            StmtKind::AssignVar { target, value } => {
                let v = self.eval_expr(value)?;
                self.value_scope
                    .assign(target, v)
                    .expect("checker already validated this assignment");
                Ok(Value::Unit)
            }
            StmtKind::AssignField { target, field, value } => {
                let target_val = self.eval_expr(target)?;
                let v = self.eval_expr(value)?;
                let fields = match &target_val {
                    Value::Struct(fields, _) | Value::Enum(_, fields, _) => fields,
                    _ => return Err(runtime_error(&self.path, stmt.span, "cannot assign a field on this value")),
                };
                fields.borrow_mut().insert(field.as_str().to_string(), v);
                Ok(Value::Unit)
            }
            StmtKind::Expr(expr) => self.eval_expr(expr),
        }
    }

    fn eval_loop(&mut self, label: Option<Identifier>, body: &Block) -> EvalResult {
        loop {
            match self.eval_block(body) {
                Ok(_) => {}
                Err(Flow::Break(l)) if l.is_none() || l == label => return Ok(Value::Unit),
                Err(Flow::Continue(l)) if l.is_none() || l == label => continue,
                other => return other,
            }
        }
    }

    fn eval_while(&mut self, test: &Expr, body: &Block) -> EvalResult {
        loop {
            let cond = self.eval_expr(test)?;
            if !as_bool(&cond) {
                return Ok(Value::Unit);
            }
            match self.eval_block(body) {
                Ok(_) => {}
                Err(Flow::Break(None)) => return Ok(Value::Unit),
                Err(Flow::Continue(None)) => continue,
                other => return other,
            }
        }
    }

    // ---- Blocks --------------------------------------------------------------

    fn eval_block(&mut self, block: &Block) -> EvalResult {
        self.value_scope.push_frame();
        let result = self.eval_block_items(block);
        self.value_scope.pop_frame();
        result
    }

    fn eval_block_items(&mut self, block: &Block) -> EvalResult {
        let mut last = Value::Unit;
        for item in &block.items {
            last = match item {
                BlockItem::Decl(d) => {
                    self.eval_decl(d)?;
                    Value::Unit
                }
                BlockItem::Stmt(s) => self.eval_stmt(s)?,
            };
        }
        Ok(last)
    }

    // ---- Expressions (§4.5) ---------------------------------------------------

    pub fn eval_expr(&mut self, expr: &Expr) -> EvalResult {
        match &expr.kind {
            ExprKind::Block(block) => self.eval_block(block),
            ExprKind::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|i| self.eval_expr(i))
                    .collect::<Result<Vec<_>, Flow>>()?;
                let ty = resolved_type_of(expr, &self.arena);
                Ok(Value::Tuple(Rc::new(values), ty))
            }
            ExprKind::StructInit { fields, spread, .. } => {
                let ty = resolved_type_of(expr, &self.arena);
                let map = self.eval_field_inits(fields, spread.as_ref())?;
                Ok(Value::Struct(Rc::new(std::cell::RefCell::new(map)), ty))
            }
            ExprKind::EnumInit {
                enum_name,
                variant_name,
                fields,
            } => {
                let enum_ty = self
                    .type_scope
                    .lookup(enum_name)
                    .expect("checker validated this type reference");
                let variant_ty =
                    find_variant(&enum_ty, variant_name.as_str()).expect("checker validated this variant");
                let index = variant_index(&enum_ty, &variant_ty);
                if fields.is_empty() {
                    return Ok(self.constant_variant(index, variant_ty));
                }
                let map = self.eval_field_inits(fields, None)?;
                Ok(Value::Enum(index, Rc::new(std::cell::RefCell::new(map)), variant_ty))
            }
            ExprKind::Group(inner) => self.eval_expr(inner),
            ExprKind::If { pattern, test, then, else_, .. } => self.eval_if(pattern, test, then, else_),
            ExprKind::Match { test, cases } => self.eval_match(test, cases),
            ExprKind::Throw(inner) => {
                let value = self.eval_expr(inner)?;
                Err(runtime_error(
                    &self.path,
                    expr.span,
                    format!("uncaught throw: {}", crate::value::pretty_print(&value)),
                ))
            }
            ExprKind::Proc(literal) => Ok(self.make_procedure(None, literal)),
            ExprKind::TypeValue(te) => Ok(Value::Type(self.resolve_type_expr(te))),
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, expr.span),
            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand, expr.span),
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.span),
            ExprKind::Member { target, field } => {
                let target_val = self.eval_expr(target)?;
                match field {
                    MemberField::Positional(index) => self.member_positional(&target_val, *index, expr.span),
                    MemberField::Named(name) => self.member_named(&target_val, name, expr.span),
                }
            }
            ExprKind::Literal(lit) => Ok(self.eval_literal(lit, expr)),
            ExprKind::Identifier(name) => self
                .value_scope
                .lookup(name)
                .ok_or_else(|| runtime_error(&self.path, expr.span, format!("undeclared identifier \"{name}\""))),
        }
    }

    fn eval_field_inits(
        &mut self,
        fields: &[FieldInit],
        spread: Option<&Expr>,
    ) -> Result<IndexMap<String, Value>, Flow> {
        let mut map = IndexMap::new();
        if let Some(spread_expr) = spread {
            let spread_val = self.eval_expr(spread_expr)?;
            if let Value::Struct(base, _) = &spread_val {
                for (k, v) in base.borrow().iter() {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        for f in fields {
            let v = self.eval_expr(&f.value)?;
            map.insert(field_init_key(&f.name), v);
        }
        Ok(map)
    }

    fn eval_if(
        &mut self,
        pattern: &Option<Pattern>,
        test: &Expr,
        then: &Block,
        else_: &Option<Block>,
    ) -> EvalResult {
        let tested = self.eval_expr(test)?;
        match pattern {
            Some(p) => {
                if pattern_matches(p, &tested) {
                    self.value_scope.push_frame();
                    let result = (|| {
                        self.bind_pattern(p, tested.clone(), false);
                        self.eval_block_items(then)
                    })();
                    self.value_scope.pop_frame();
                    result
                } else if let Some(e) = else_ {
                    self.eval_block(e)
                } else {
                    Ok(Value::Unit)
                }
            }
            None => {
                if as_bool(&tested) {
                    self.eval_block(then)
                } else if let Some(e) = else_ {
                    self.eval_block(e)
                } else {
                    Ok(Value::Unit)
                }
            }
        }
    }

    fn eval_match(&mut self, test: &Option<Expr>, cases: &[MatchCase]) -> EvalResult {
        let scrutinee = match test {
            Some(t) => self.eval_expr(t)?,
            None => Value::Bool(true),
        };
        for case in cases {
            if !pattern_matches(&case.pattern, &scrutinee) {
                continue;
            }
            self.value_scope.push_frame();
            let outcome = (|| -> Result<Option<Value>, Flow> {
                self.bind_pattern(&case.pattern, scrutinee.clone(), false);
                if let Some(guard) = &case.guard {
                    let guard_val = self.eval_expr(guard)?;
                    if !as_bool(&guard_val) {
                        return Ok(None);
                    }
                }
                self.eval_expr(&case.body).map(Some)
            })();
            self.value_scope.pop_frame();
            if let Some(value) = outcome? {
                return Ok(value);
            }
        }
        Ok(Value::Unit)
    }

    fn eval_literal(&self, lit: &Literal, expr: &Expr) -> Value {
        match lit {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Str(s) => Value::Str(Rc::from(s.as_str())),
            Literal::Float(f) => Value::Float(*f),
            Literal::Int(n) => {
                let coerced_to_float = matches!(
                    expr.resolved_type.borrow().as_ref().map(|t| &t.kind),
                    Some(TypeKind::Primitive("Float"))
                );
                if coerced_to_float {
                    Value::Float(n.to_f64().unwrap_or(f64::NAN))
                } else {
                    Value::Int(n.clone())
                }
            }
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> EvalResult {
        use BinaryOp::*;
        match op {
            Or => {
                let l = self.eval_expr(left)?;
                if as_bool(&l) {
                    Ok(Value::Bool(true))
                } else {
                    let r = self.eval_expr(right)?;
                    Ok(Value::Bool(as_bool(&r)))
                }
            }
            And => {
                let l = self.eval_expr(left)?;
                if !as_bool(&l) {
                    Ok(Value::Bool(false))
                } else {
                    let r = self.eval_expr(right)?;
                    Ok(Value::Bool(as_bool(&r)))
                }
            }
            Eq => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                Ok(Value::Bool(values_equal(&l, &r)))
            }
            NotEq => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                Ok(Value::Bool(!values_equal(&l, &r)))
            }
            IdEq => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                Ok(Value::Bool(values_identical(&l, &r)))
            }
            IdNotEq => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                Ok(Value::Bool(!values_identical(&l, &r)))
            }
            Lt | LtEq | Gt | GtEq => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                let ordering = numeric_cmp(&l, &r);
                let result = match op {
                    Lt => ordering.is_lt(),
                    LtEq => ordering.is_le(),
                    Gt => ordering.is_gt(),
                    GtEq => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            Add | Sub | Mul | Div | Rem => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                self.eval_arithmetic(op, l, r, span)
            }
            Default => {
                let l = self.eval_expr(left)?;
                if matches!(l, Value::Unit) {
                    self.eval_expr(right)
                } else {
                    Ok(l)
                }
            }
        }
    }

    fn eval_arithmetic(&self, op: BinaryOp, left: Value, right: Value, span: Span) -> EvalResult {
        use BinaryOp::*;
        match (&left, &right) {
            (Value::Int(x), Value::Int(y)) => {
                if matches!(op, Div | Rem) && y.is_zero() {
                    return Err(runtime_error(&self.path, span, "division by zero"));
                }
                let result = match op {
                    Add => x + y,
                    Sub => x - y,
                    Mul => x * y,
                    Div => x / y,
                    Rem => x % y,
                    _ => unreachable!(),
                };
                Ok(Value::Int(result))
            }
            _ => {
                let x = to_f64(&left);
                let y = to_f64(&right);
                let result = match op {
                    Add => x + y,
                    Sub => x - y,
                    Mul => x * y,
                    Div => x / y,
                    Rem => x % y,
                    _ => unreachable!(),
                };
                Ok(Value::Float(result))
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> EvalResult {
        match op {
            UnaryOp::Neg => match self.eval_expr(operand)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Err(runtime_error(&self.path, span, "unary '-' requires a numeric operand")),
            },
            UnaryOp::Not => {
                let v = self.eval_expr(operand)?;
                Ok(Value::Bool(!as_bool(&v)))
            }
            UnaryOp::Spread => self.eval_expr(operand),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> EvalResult {
        if let ExprKind::Identifier(name) = &callee.kind {
            if crate::builtins::is_builtin(name) {
                return self.eval_builtin_call(name, args, span);
            }
        }
        let callee_val = self.eval_expr(callee)?;
        match &callee_val {
            Value::Procedure(imp, ty) => self.call_procedure(imp.clone(), ty.clone(), args),
            Value::Module(_, ty) => self.construct_via_module(ty.clone(), args, span),
            _ => Err(runtime_error(&self.path, span, "call of a non-callable value")),
        }
    }

    fn eval_builtin_call(&mut self, name: &Identifier, args: &[Expr], span: Span) -> EvalResult {
        let values = args
            .iter()
            .map(|a| self.eval_expr(a))
            .collect::<Result<Vec<_>, Flow>>()?;
        match name.as_str() {
            "print" => crate::builtins::print(&mut self.out, &values[0])
                .map_err(|e| runtime_error(&self.path, span, e.to_string())),
            "clock" => Ok(crate::builtins::clock()),
            "cat" => Ok(crate::builtins::cat(&values[0], &values[1])),
            "print_type" => Ok(crate::builtins::print_type(&values[0])),
            other => Err(runtime_error(&self.path, span, format!("unknown builtin \"{other}\""))),
        }
    }

    fn call_procedure(&mut self, imp: Rc<ProcImpl>, ty: Type, args: &[Expr]) -> EvalResult {
        let arg_values = args
            .iter()
            .map(|a| self.eval_expr(a))
            .collect::<Result<Vec<_>, Flow>>()?;
        let caller_scope = std::mem::replace(&mut self.value_scope, imp.captured.capture());
        self.value_scope.push_frame();
        // A named procedure rebinds its own name into its call frame so it
        // can call itself; `captured` was snapshotted before the enclosing
        // declaration could have added that binding (§3.4, §4.5's recursion
        // example).
        if let Some(name) = &imp.name {
            let self_value = Value::Procedure(imp.clone(), ty.clone());
            let _ = self.value_scope.declare(name.clone(), false, true, self_value);
        }
        for (param, value) in imp.params.iter().zip(arg_values.into_iter()) {
            self.bind_pattern(&param.pattern, value, false);
        }
        let result = self.eval_block_items(&imp.body);
        self.value_scope = caller_scope;
        match result {
            Ok(v) => Ok(v),
            Err(Flow::Return(v)) => Ok(v),
            Err(other) => Err(other),
        }
    }

    fn construct_via_module(&mut self, module_ty: Type, args: &[Expr], span: Span) -> EvalResult {
        let assoc = match &module_ty.kind {
            TypeKind::Module { associated_type, .. } => associated_type.borrow().clone(),
            _ => None,
        }
        .ok_or_else(|| runtime_error(&self.path, span, "module has no associated constructor"))?;
        let values = args
            .iter()
            .map(|a| self.eval_expr(a))
            .collect::<Result<Vec<_>, Flow>>()?;
        let fields: IndexMap<String, Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect();
        match &assoc.kind {
            TypeKind::Struct { .. } => Ok(Value::Struct(Rc::new(std::cell::RefCell::new(fields)), assoc.clone())),
            TypeKind::Variant { parent, .. } => {
                let parent_enum = parent
                    .upgrade()
                    .ok_or_else(|| runtime_error(&self.path, span, "variant's enum no longer exists"))?;
                let index = variant_index(&parent_enum, &assoc);
                Ok(Value::Enum(index, Rc::new(std::cell::RefCell::new(fields)), assoc.clone()))
            }
            _ => Err(runtime_error(&self.path, span, "not callable")),
        }
    }

    fn member_positional(&self, target: &Value, index: usize, span: Span) -> EvalResult {
        match target {
            Value::Tuple(items, _) => items
                .get(index)
                .cloned()
                .ok_or_else(|| runtime_error(&self.path, span, "tuple index out of range")),
            Value::Struct(fields, _) | Value::Enum(_, fields, _) => fields
                .borrow()
                .get(&index.to_string())
                .cloned()
                .ok_or_else(|| runtime_error(&self.path, span, "field index out of range")),
            _ => Err(runtime_error(&self.path, span, "value has no positional fields")),
        }
    }

    fn member_named(&self, target: &Value, name: &Identifier, span: Span) -> EvalResult {
        match target {
            Value::Struct(fields, _) | Value::Enum(_, fields, _) => fields
                .borrow()
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| runtime_error(&self.path, span, format!("unknown field \"{name}\""))),
            Value::Module(module_name, ty) => {
                if let TypeKind::Module { associated_type, .. } = &ty.kind {
                    if let Some(assoc) = associated_type.borrow().clone() {
                        if let TypeKind::Enum { .. } = &assoc.kind {
                            if let Some(variant) = find_variant(&assoc, name.as_str()) {
                                let is_constant = matches!(&variant.kind, TypeKind::Variant { constant: true, .. });
                                if is_constant {
                                    let index = variant_index(&assoc, &variant);
                                    return Ok(self.constant_variant(index, variant));
                                }
                                let wrapper = self.arena.module(format!("{module_name}.{name}"));
                                if let TypeKind::Module { associated_type, .. } = &wrapper.kind {
                                    *associated_type.borrow_mut() = Some(variant);
                                }
                                return Ok(Value::Module(Identifier::from(format!("{module_name}.{name}")), wrapper));
                            }
                        }
                    }
                }
                Err(runtime_error(
                    &self.path,
                    span,
                    format!("unknown member \"{name}\" on module \"{module_name}\""),
                ))
            }
            _ => Err(runtime_error(&self.path, span, format!("unknown field \"{name}\""))),
        }
    }

    // ---- Patterns (§4.5) -------------------------------------------------------

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, mutable: bool) {
        match &pattern.kind {
            PatternKind::Wildcard | PatternKind::Literal(_) => {}
            PatternKind::Identifier { name, .. } => {
                self.value_scope
                    .declare(name.clone(), mutable, true, value)
                    .expect("checker already validated this binding");
            }
            PatternKind::As(a, b) => {
                self.bind_pattern(a, value.clone(), mutable);
                self.bind_pattern(b, value, mutable);
            }
            PatternKind::Tuple(items) => {
                if let Value::Tuple(values, _) = &value {
                    for (item, v) in items.iter().zip(values.iter()) {
                        self.bind_pattern(item, v.clone(), mutable);
                    }
                }
            }
            PatternKind::Struct { fields, .. } => {
                if let Value::Struct(values, _) = &value {
                    let values = values.borrow();
                    for pf in fields {
                        if let Some(v) = field_value(&values, &pf.name) {
                            self.bind_pattern(&pf.pattern, v.clone(), mutable);
                        }
                    }
                }
            }
            PatternKind::Variant { fields, .. } => {
                if let Value::Enum(_, values, _) = &value {
                    let values = values.borrow();
                    for pf in fields {
                        if let Some(v) = field_value(&values, &pf.name) {
                            self.bind_pattern(&pf.pattern, v.clone(), mutable);
                        }
                    }
                }
            }
        }
    }

    // ---- Type expressions (§3.2, evaluated for `TypeValue`) -----------------------

    fn resolve_type_expr(&self, te: &TypeExpr) -> Type {
        match &te.kind {
            TypeExprKind::Identifier(name) => self
                .arena
                .primitive(name.as_str())
                .or_else(|| self.type_scope.lookup(name))
                .expect("checker already validated this type reference"),
            TypeExprKind::Wildcard => self.arena.wildcard(),
            TypeExprKind::Proc { params, returns } => {
                let params = params.iter().map(|p| self.resolve_type_expr(p)).collect();
                let returns = self.resolve_type_expr(returns);
                self.arena.proc(params, returns)
            }
            TypeExprKind::Tuple(items) => {
                let items = items.iter().map(|t| self.resolve_type_expr(t)).collect();
                self.arena.tuple(items)
            }
        }
    }
}

fn resolved_type_of(expr: &Expr, arena: &TypeArena) -> Type {
    expr.resolved_type.borrow().clone().unwrap_or_else(|| arena.any.clone())
}

fn field_init_key(name: &FieldInitName) -> String {
    match name {
        FieldInitName::Named(id) => id.as_str().to_string(),
        FieldInitName::Positional(i) => i.to_string(),
    }
}

fn field_value<'a>(values: &'a IndexMap<String, Value>, name: &FieldInitName) -> Option<&'a Value> {
    match name {
        FieldInitName::Named(id) => values.get(id.as_str()),
        FieldInitName::Positional(i) => values.get(&i.to_string()),
    }
}

/// Mirrors `Checker::find_variant`, duplicated here because the evaluator
/// only needs a `Type` back, not a diagnostic-producing `Result`.
fn find_variant(enum_ty: &Type, name: &str) -> Option<Type> {
    match &enum_ty.kind {
        TypeKind::Enum { variants, .. } => variants
            .borrow()
            .iter()
            .find(|v| matches!(&v.kind, TypeKind::Variant { name: n, .. } if n.as_str() == name))
            .cloned(),
        _ => None,
    }
}

fn variant_index(enum_ty: &Type, variant: &Type) -> usize {
    match &enum_ty.kind {
        TypeKind::Enum { variants, .. } => variants
            .borrow()
            .iter()
            .position(|v| Rc::ptr_eq(v, variant))
            .unwrap_or(0),
        _ => 0,
    }
}

fn as_bool(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Int(n) => n.to_f64().unwrap_or(f64::NAN),
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => x.to_f64().unwrap_or(f64::NAN).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x
            .partial_cmp(&y.to_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Unit, Value::Unit) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Tuple(x, _), Value::Tuple(y, _)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_equal(p, q))
        }
        (Value::Struct(x, tx), Value::Struct(y, ty)) => {
            Rc::ptr_eq(tx, ty) && fields_equal(&x.borrow(), &y.borrow())
        }
        (Value::Enum(ix, x, tx), Value::Enum(iy, y, ty)) => {
            ix == iy && Rc::ptr_eq(tx, ty) && fields_equal(&x.borrow(), &y.borrow())
        }
        (Value::Module(nx, _), Value::Module(ny, _)) => nx == ny,
        (Value::Type(x), Value::Type(y)) => Rc::ptr_eq(x, y),
        (Value::Procedure(x, _), Value::Procedure(y, _)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn fields_equal(x: &IndexMap<String, Value>, y: &IndexMap<String, Value>) -> bool {
    x.len() == y.len() && x.iter().zip(y.iter()).all(|((k1, v1), (k2, v2))| k1 == k2 && values_equal(v1, v2))
}

/// `===`/`!==` (§4.5): reference identity for the reference-like values,
/// falling back to `values_equal` for everything that has no separate
/// notion of identity from its value.
fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Tuple(x, _), Value::Tuple(y, _)) => Rc::ptr_eq(x, y),
        (Value::Struct(x, _), Value::Struct(y, _)) => Rc::ptr_eq(x, y),
        (Value::Enum(_, x, _), Value::Enum(_, y, _)) => Rc::ptr_eq(x, y),
        (Value::Procedure(x, _), Value::Procedure(y, _)) => Rc::ptr_eq(x, y),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
        _ => values_equal(a, b),
    }
}

fn pattern_matches(pattern: &Pattern, value: &Value) -> bool {
    match &pattern.kind {
        PatternKind::Wildcard | PatternKind::Identifier { .. } => true,
        PatternKind::Literal(lit) => literal_matches(lit, value),
        PatternKind::As(a, b) => pattern_matches(a, value) && pattern_matches(b, value),
        PatternKind::Tuple(items) => match value {
            Value::Tuple(values, _) => {
                items.len() == values.len() && items.iter().zip(values.iter()).all(|(p, v)| pattern_matches(p, v))
            }
            _ => false,
        },
        PatternKind::Struct { fields, .. } => match value {
            Value::Struct(values, _) => {
                let values = values.borrow();
                fields
                    .iter()
                    .all(|pf| field_value(&values, &pf.name).map_or(false, |v| pattern_matches(&pf.pattern, v)))
            }
            _ => false,
        },
        PatternKind::Variant { variant_name, fields, .. } => match value {
            Value::Enum(_, values, ty) => {
                let name_matches =
                    matches!(&ty.kind, TypeKind::Variant { name, .. } if name.as_str() == variant_name.as_str());
                if !name_matches {
                    return false;
                }
                let values = values.borrow();
                fields
                    .iter()
                    .all(|pf| field_value(&values, &pf.name).map_or(false, |v| pattern_matches(&pf.pattern, v)))
            }
            _ => false,
        },
    }
}

fn literal_matches(lit: &Literal, value: &Value) -> bool {
    match (lit, value) {
        (Literal::Bool(a), Value::Bool(b)) => a == b,
        (Literal::Str(a), Value::Str(b)) => a.as_str() == &**b,
        (Literal::Float(a), Value::Float(b)) => a == b,
        (Literal::Int(a), Value::Int(b)) => a == b,
        (Literal::Int(a), Value::Float(b)) => a.to_f64().map_or(false, |f| f == *b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::lexing::source::CodeSource;
    use crate::lexing::Tokens;
    use crate::parsing::Parser;

    fn run(src: &str) -> Result<Value, Diagnostic> {
        let tokens = Tokens::new(CodeSource::new("<test>", src));
        let mut parser = Parser::new(tokens);
        let root = parser.parse_root().expect("source parses");
        let mut checker = Checker::new("<test>");
        checker.check_root(&root).expect("source type-checks");
        let mut evaluator = Evaluator::new(
            checker.arena.clone(),
            checker.type_scope.clone(),
            "<test>",
            false,
            Box::new(Vec::<u8>::new()),
        );
        evaluator.eval_root(&root)
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let value = run("1 + 2 * 3;").unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(7)));
    }

    #[test]
    fn var_decl_and_lookup() {
        let value = run("var x = 41; x + 1;").unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(42)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let err = run("1 / 0;").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Runtime);
    }

    #[test]
    fn struct_construction_and_field_mutation() {
        let value = run(
            "struct Point { mut x: Int, mut y: Int }; \
             var p = Point { x = 1, y = 2 }; \
             p.x = 9; \
             p.x;",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(9)));
    }

    #[test]
    fn tuple_form_struct_construction_and_positional_access() {
        let value = run("struct Pair(Int, Int); var p = Pair(3, 4); p.1;").unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(4)));
    }

    #[test]
    fn enum_match_dispatches_on_the_matching_variant() {
        let value = run(
            "enum Color { Red, Green, Blue }; \
             var c = Color.Green; \
             match c { Color.Red => 1, Color.Green => 2, Color.Blue => 3 };",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(2)));
    }

    #[test]
    fn recursive_procedure_counts_down() {
        let value = run(
            "proc countdown(n: Int) -> Int { if n <= 0 { 0 } else { countdown(n - 1) } }; \
             countdown(5);",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(0)));
    }

    #[test]
    fn break_with_a_label_unwinds_to_the_matching_loop() {
        let value = run(
            "var total = 0; \
             loop outer { \
                 loop { \
                     total = total + 1; \
                     if total == 3 { break outer; }; \
                 }; \
             }; \
             total;",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(3)));
    }

    #[test]
    fn default_operator_falls_through_unit_to_the_right_operand() {
        let value = run(
            "proc nothing() -> Unit { () }; \
             nothing() ? 5;",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(5)));
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let value = run(
            "proc make_adder(n: Int) -> proc (Int) -> Int { proc (x: Int) -> Int { x + n } }; \
             var add5 = make_adder(5); \
             add5(10);",
        )
        .unwrap();
        assert!(matches!(value, Value::Int(n) if n == BigInt::from(15)));
    }
}
