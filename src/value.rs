//! Runtime values (§3.5): what the evaluator actually produces and passes
//! around. Every value carries a `$type` back-pointer to the type term it
//! was constructed with, used by `print_type` and by member/call dispatch
//! that needs to know a value's declared shape at runtime.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::common::multiphase::Identifier;
use crate::parsing::ast::{Block, Param};
use crate::scope::Scope;
use crate::types::{type_name, Type, TypeKind};

#[derive(Clone, Debug)]
pub struct ProcImpl {
    pub name: Option<Identifier>,
    pub params: Rc<Vec<Param>>,
    pub body: Rc<Block>,
    /// The scope captured at the point the literal was evaluated (§3.4,
    /// §4.5): shares the global frame, clones every local frame.
    pub captured: Scope<Value>,
}

/// A struct/variant instance's fields. `Rc` gives cheap copies when a value
/// is passed around; the `RefCell` lets `AssignField` mutate a field through
/// any of those copies, so struct/enum instances behave as shared, mutable
/// records rather than value types (§4.5's field-assignment statement would
/// be unobservable otherwise).
pub type FieldMap = Rc<RefCell<IndexMap<String, Value>>>;

#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<Vec<Value>>, Type),
    Struct(FieldMap, Type),
    /// `variant_index` indexes into the parent enum's variant list.
    Enum(usize, FieldMap, Type),
    Procedure(Rc<ProcImpl>, Type),
    /// A handle to a declared type, usable as a value (constructor
    /// reference, or the left operand of `EnumName.Variant`, §3.5).
    Module(Identifier, Type),
    Type(Type),
}

impl Value {
    pub fn type_of(&self) -> Option<&Type> {
        match self {
            Value::Unit | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => None,
            Value::Tuple(_, t)
            | Value::Struct(_, t)
            | Value::Enum(_, _, t)
            | Value::Procedure(_, t)
            | Value::Module(_, t)
            | Value::Type(t) => Some(t),
        }
    }
}

/// Pretty-printing (§6.5).
pub fn pretty_print(value: &Value) -> String {
    match value {
        Value::Unit => "()".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.to_string(),
        Value::Tuple(items, _) => {
            let inner: Vec<String> = items.iter().map(pretty_print).collect();
            if items.len() == 1 {
                format!("({},)", inner[0])
            } else {
                format!("({})", inner.join(", "))
            }
        }
        Value::Struct(fields, ty) => pretty_print_fields(ty, &fields.borrow()),
        Value::Enum(_, fields, ty) => {
            let label = type_name(ty);
            let fields = fields.borrow();
            if fields.is_empty() {
                label
            } else {
                pretty_print_labeled_fields(&label, ty, &fields)
            }
        }
        Value::Procedure(imp, ty) => {
            let rendered = type_name(ty);
            match &imp.name {
                Some(name) => rendered.replacen("proc", &format!("proc {name}"), 1),
                None => rendered,
            }
        }
        Value::Module(name, _) => name.to_string(),
        Value::Type(t) => type_name(t),
    }
}

fn pretty_print_fields(ty: &Type, fields: &IndexMap<String, Value>) -> String {
    let name = type_name(ty);
    pretty_print_labeled_fields(&name, ty, fields)
}

fn pretty_print_labeled_fields(label: &str, ty: &Type, fields: &IndexMap<String, Value>) -> String {
    let tuple_form = matches!(
        &ty.kind,
        TypeKind::Struct { tuple_form: true, .. } | TypeKind::Variant { tuple_form: true, .. }
    );
    if tuple_form {
        let inner: Vec<String> = fields.values().map(pretty_print).collect();
        format!("{label}({})", inner.join(", "))
    } else {
        let inner: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("{k} = {}", pretty_print(v)))
            .collect();
        format!("{label} {{ {} }}", inner.join(", "))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", pretty_print(self))
    }
}
