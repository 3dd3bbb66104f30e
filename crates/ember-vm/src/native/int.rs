use std::cmp::Ordering;

use ember_asm::core;

use super::{operands, NativeEnv, NativeResult, NativeTemplate};
use crate::value::Value;

/// 64-bit signed integers; arithmetic is checked.
pub struct IntTemplate;

/// Checked binary arithmetic shared with the interpreter's arithmetic ops.
pub(crate) fn binary(name: &str, a: i64, b: i64) -> Option<NativeResult> {
    let checked = match name {
        "add" => a.checked_add(b),
        "sub" => a.checked_sub(b),
        "mul" => a.checked_mul(b),
        "div" | "mod" if b == 0 => {
            return Some(NativeResult::exception(core::DIVISION_BY_ZERO, "Division by zero"));
        }
        "div" => a.checked_div(b),
        "mod" => a.checked_rem(b),
        _ => return None,
    };
    Some(match checked {
        Some(value) => NativeResult::int(value),
        None => NativeResult::exception(core::OVERFLOW, format!("Int overflow in `{name}`")),
    })
}

pub(crate) fn ordering(ordering: Ordering) -> NativeResult {
    NativeResult::int(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

impl NativeTemplate for IntTemplate {
    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let (this, args) = operands(target, args);
        let Some(value) = this.as_int() else {
            return env.mismatch(method, "Int", this);
        };
        match (method, args) {
            ("negate", []) => match value.checked_neg() {
                Some(negated) => NativeResult::int(negated),
                None => NativeResult::exception(core::OVERFLOW, "Int overflow in `negate`"),
            },
            ("hashCode", []) => NativeResult::int(value),
            ("toString", []) => NativeResult::string(value.to_string()),
            ("equals", [other]) => NativeResult::bool(other.as_int() == Some(value)),
            ("compare", [other]) => match other.as_int() {
                Some(other) => ordering(value.cmp(&other)),
                None => env.mismatch(method, "Int", other),
            },
            (_, [other]) => {
                let Some(other_value) = other.as_int() else {
                    return env.mismatch(method, "Int", other);
                };
                binary(method, value, other_value).unwrap_or_else(|| env.unknown(this, method))
            }
            _ => env.unknown(this, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_asm::Module;

    fn call(method: &str, target: Value, args: &[Value]) -> NativeResult {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        IntTemplate.invoke_native_n(&env, method, &target, args)
    }

    fn exception_class(result: NativeResult) -> Option<ember_asm::ClassId> {
        match result {
            NativeResult::Exception(value) => Some(value.class()),
            _ => None,
        }
    }

    #[test]
    fn arithmetic_is_checked() {
        assert!(matches!(
            call("add", Value::Int(2), &[Value::Int(3)]),
            NativeResult::Value(Value::Int(5))
        ));
        assert_eq!(
            exception_class(call("add", Value::Int(i64::MAX), &[Value::Int(1)])),
            Some(core::OVERFLOW)
        );
        assert_eq!(
            exception_class(call("negate", Value::Int(i64::MIN), &[])),
            Some(core::OVERFLOW)
        );
    }

    #[test]
    fn division_by_zero_raises() {
        assert_eq!(
            exception_class(call("div", Value::Int(1), &[Value::Int(0)])),
            Some(core::DIVISION_BY_ZERO)
        );
        assert_eq!(
            exception_class(call("mod", Value::Int(1), &[Value::Int(0)])),
            Some(core::DIVISION_BY_ZERO)
        );
    }

    #[test]
    fn compare_returns_sign() {
        assert!(matches!(
            call("compare", Value::Int(1), &[Value::Int(9)]),
            NativeResult::Value(Value::Int(-1))
        ));
    }

    #[test]
    fn static_equals_takes_both_operands() {
        assert!(matches!(
            call("equals", Value::Null, &[Value::Int(4), Value::Int(4)]),
            NativeResult::Value(Value::Bool(true))
        ));
    }

    #[test]
    fn wrong_operand_kind_is_an_illegal_argument() {
        assert_eq!(
            exception_class(call("add", Value::Int(1), &[Value::Bool(true)])),
            Some(core::ILLEGAL_ARGUMENT)
        );
    }
}
