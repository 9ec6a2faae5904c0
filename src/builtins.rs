//! Built-ins (§6.5): the handful of names declared into every fresh
//! interpreter instance before any user source runs.

use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigInt;

use crate::common::multiphase::Identifier;
use crate::value::{pretty_print, Value};

pub const NAMES: &[&str] = &["print", "clock", "cat", "print_type"];

pub const PRE_DECLARED_TYPE_NAMES: &[&str] =
    &["Type", "Any", "Never", "Bool", "Int", "Float", "Str", "Module"];

/// `print(x: Any) -> Unit`: writes `print-value(x)` then a newline.
pub fn print(out: &mut dyn std::io::Write, value: &Value) -> std::io::Result<Value> {
    writeln!(out, "{}", pretty_print(value))?;
    Ok(Value::Unit)
}

/// `clock() -> Int`: milliseconds since the host epoch.
pub fn clock() -> Value {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Value::Int(BigInt::from(millis))
}

/// `cat(a: Any, b: Any) -> Str`: concatenated pretty-printed forms.
pub fn cat(a: &Value, b: &Value) -> Value {
    Value::Str(format!("{}{}", pretty_print(a), pretty_print(b)).into())
}

/// `print_type(x: Any) -> Str`: printed type of `x`.
pub fn print_type(value: &Value) -> Value {
    let rendered = match value.type_of() {
        Some(t) => crate::types::type_name(t),
        None => match value {
            Value::Unit => "Unit".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Float(_) => "Float".to_string(),
            Value::Str(_) => "Str".to_string(),
            _ => unreachable!("type_of covers every other variant"),
        },
    };
    Value::Str(rendered.into())
}

pub fn is_builtin(name: &Identifier) -> bool {
    NAMES.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_writes_pretty_form_and_newline() {
        let mut out = Vec::new();
        print(&mut out, &Value::Int(BigInt::from(42))).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }

    #[test]
    fn cat_concatenates_pretty_printed_forms() {
        let result = cat(&Value::Int(BigInt::from(1)), &Value::Str("x".into()));
        match result {
            Value::Str(s) => assert_eq!(&*s, "1x"),
            _ => panic!("expected a Str"),
        }
    }

    #[test]
    fn print_type_of_a_primitive() {
        let result = print_type(&Value::Bool(true));
        match result {
            Value::Str(s) => assert_eq!(&*s, "Bool"),
            _ => panic!("expected a Str"),
        }
    }
}
