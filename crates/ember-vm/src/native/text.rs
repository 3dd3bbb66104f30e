use std::cell::RefCell;
use std::rc::Rc;

use ember_asm::core;

use super::int::ordering;
use super::{operands, NativeCall, NativeEnv, NativeResult, NativeTemplate};
use crate::value::Value;

pub struct StringTemplate;

/// `31 * h + c` over the chars, wrapping.
fn hash_chars(text: &str) -> i64 {
    text.chars()
        .fold(0i64, |hash, c| hash.wrapping_mul(31).wrapping_add(c as i64))
}

impl NativeTemplate for StringTemplate {
    fn invoke_native_get(&self, env: &NativeEnv<'_>, property: &str, target: &Value) -> NativeResult {
        match (property, target) {
            ("size", Value::String(text)) => NativeResult::int(text.chars().count() as i64),
            _ => env.unknown(target, property),
        }
    }

    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let (this, args) = operands(target, args);
        let Value::String(text) = this else {
            return env.mismatch(method, "String", this);
        };
        match (method, args) {
            ("toString", []) => NativeResult::Value(this.clone()),
            ("hashCode", []) => NativeResult::int(hash_chars(text)),
            ("equals", [other]) => NativeResult::bool(other.as_str() == Some(&**text)),
            ("compare", [Value::String(other)]) => ordering(text.cmp(other)),
            ("add", [other]) if other.is_primitive() => {
                NativeResult::string(format!("{text}{other}"))
            }
            ("add", [other]) => NativeResult::Call(NativeCall {
                target: other.clone(),
                name: "toString".to_string(),
                args: Vec::new(),
                append_to: Some(text.clone()),
            }),
            ("charAt", [Value::Int(index)]) => {
                let found = usize::try_from(*index)
                    .ok()
                    .and_then(|idx| text.chars().nth(idx));
                match found {
                    Some(c) => NativeResult::Value(Value::Char(c)),
                    None => NativeResult::exception(
                        core::OUT_OF_BOUNDS,
                        format!("index {index} out of bounds for String of size {}", text.chars().count()),
                    ),
                }
            }
            _ => env.unknown(this, method),
        }
    }
}

/// The `Appender<Char>` used by `appendTo`.
pub struct StringBufferTemplate;

impl NativeTemplate for StringBufferTemplate {
    fn invoke_native_get(&self, env: &NativeEnv<'_>, property: &str, target: &Value) -> NativeResult {
        match (property, target) {
            ("size", Value::Buffer(buffer)) => NativeResult::int(buffer.borrow().chars().count() as i64),
            _ => env.unknown(target, property),
        }
    }

    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let Value::Buffer(buffer) = target else {
            return env.mismatch(method, "StringBuffer", target);
        };
        match (method, args) {
            ("toString", []) => NativeResult::string(buffer.borrow().as_str()),
            ("add", [Value::Char(c)]) => {
                buffer.borrow_mut().push(*c);
                NativeResult::Value(target.clone())
            }
            ("addAll", [other]) if other.is_primitive() => {
                append(buffer, other);
                NativeResult::Value(target.clone())
            }
            ("add" | "addAll", [other]) => env.mismatch(method, "a Char or String", other),
            _ => env.unknown(target, method),
        }
    }
}

fn append(buffer: &Rc<RefCell<String>>, value: &Value) {
    // Rendering a buffer into itself would hold two borrows.
    let rendered = value.to_string();
    buffer.borrow_mut().push_str(&rendered);
}
