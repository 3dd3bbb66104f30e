use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use ember_asm::core;
use rustc_hash::FxHasher;

use super::int::ordering;
use super::{operands, NativeEnv, NativeResult, NativeTemplate};
use crate::value::Value;

/// Members every class inherits, and the structural `equals`/`compare`/`hashCode` a `Const`
/// class gets when no template of its own is registered.
pub struct ObjectTemplate;

/// Field values of an object in field-name order.
fn fields(value: &Value) -> Vec<(String, Value)> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };
    let mut fields: Vec<(String, Value)> = object
        .borrow()
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
}

fn structural_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_object(), b.as_object()) {
        (Some(_), Some(_)) => {
            a.class() == b.class()
                && fields(a)
                    .iter()
                    .zip(fields(b).iter())
                    .all(|(x, y)| x.0 == y.0 && structural_eq(&x.1, &y.1))
        }
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Char(x), Value::Char(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ if a.as_object().is_some() && a.class() == b.class() => {
            for ((_, x), (_, y)) in fields(a).iter().zip(fields(b).iter()) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    unequal => return Some(unequal),
                }
            }
            Some(Ordering::Equal)
        }
        _ => None,
    }
}

fn hash_into(value: &Value, hasher: &mut FxHasher) {
    match value {
        Value::Object(_) | Value::Service(_) => {
            value.class().0.hash(hasher);
            for (name, field) in fields(value) {
                name.hash(hasher);
                hash_into(&field, hasher);
            }
        }
        other => other.to_string().hash(hasher),
    }
}

impl NativeTemplate for ObjectTemplate {
    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let (this, args) = operands(target, args);
        match (method, args) {
            ("toString", []) => {
                let name = env.class_name(this.class());
                match this.message() {
                    Some(message) => NativeResult::string(format!("{name}: {message}")),
                    None if this.as_object().is_some() => NativeResult::string(name),
                    None => NativeResult::string(this.to_string()),
                }
            }
            ("equals", [other]) => NativeResult::bool(structural_eq(this, other)),
            ("hashCode", []) => {
                let mut hasher = FxHasher::default();
                hash_into(this, &mut hasher);
                NativeResult::int(hasher.finish() as i64)
            }
            ("compare", [other]) => match compare(this, other) {
                Some(order) => ordering(order),
                None => NativeResult::exception(
                    core::ILLEGAL_ARGUMENT,
                    format!(
                        "{} and {} are not comparable",
                        env.class_name(this.class()),
                        env.class_name(other.class())
                    ),
                ),
            },
            _ => env.unknown(this, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;
    use ember_asm::Module;

    fn point(x: i64, y: i64) -> Value {
        let mut object = Object::new(core::OBJECT);
        object.fields.insert("x".to_string(), Value::Int(x));
        object.fields.insert("y".to_string(), Value::Int(y));
        Value::object(object)
    }

    #[test]
    fn exceptions_render_with_their_message() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let exception = Value::exception(core::ILLEGAL_STATE, "boom");
        assert!(matches!(
            ObjectTemplate.invoke_native_n(&env, "toString", &exception, &[]),
            NativeResult::Value(Value::String(ref s)) if &**s == "IllegalState: boom"
        ));
    }

    #[test]
    fn equality_and_hash_are_structural() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let a = point(1, 2);
        let b = point(1, 2);
        assert!(matches!(
            ObjectTemplate.invoke_native_n(&env, "equals", &Value::Null, &[a.clone(), b.clone()]),
            NativeResult::Value(Value::Bool(true))
        ));
        let hash = |value: &Value| match ObjectTemplate.invoke_native_n(&env, "hashCode", value, &[]) {
            NativeResult::Value(Value::Int(hash)) => hash,
            _ => panic!("expected a hash"),
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn compare_orders_by_fields() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        assert!(matches!(
            ObjectTemplate.invoke_native1(&env, "compare", &point(1, 5), &point(2, 0)),
            NativeResult::Value(Value::Int(-1))
        ));
    }
}
