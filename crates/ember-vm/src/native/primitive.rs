use super::int::ordering;
use super::{operands, NativeEnv, NativeResult, NativeTemplate};
use crate::value::Value;

pub struct BooleanTemplate;

impl NativeTemplate for BooleanTemplate {
    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let (this, args) = operands(target, args);
        let Some(value) = this.as_bool() else {
            return env.mismatch(method, "Boolean", this);
        };
        match (method, args) {
            ("not", []) => NativeResult::bool(!value),
            ("toString", []) => NativeResult::string(value.to_string()),
            ("hashCode", []) => NativeResult::int(value as i64),
            ("equals", [other]) => NativeResult::bool(other.as_bool() == Some(value)),
            ("and" | "or", [other]) => match other.as_bool() {
                Some(other) if method == "and" => NativeResult::bool(value && other),
                Some(other) => NativeResult::bool(value || other),
                None => env.mismatch(method, "Boolean", other),
            },
            _ => env.unknown(this, method),
        }
    }
}

pub struct CharTemplate;

impl NativeTemplate for CharTemplate {
    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult {
        let (this, args) = operands(target, args);
        let Value::Char(value) = this else {
            return env.mismatch(method, "Char", this);
        };
        match (method, args) {
            ("toString", []) => NativeResult::string(value.to_string()),
            ("hashCode", []) => NativeResult::int(*value as i64),
            ("equals", [other]) => NativeResult::bool(matches!(other, Value::Char(c) if c == value)),
            ("compare", [Value::Char(other)]) => ordering(value.cmp(other)),
            _ => env.unknown(this, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_asm::Module;

    #[test]
    fn boolean_logic() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert!(matches!(
            BooleanTemplate.invoke_native1(&env, "and", &t, &f),
            NativeResult::Value(Value::Bool(false))
        ));
        assert!(matches!(
            BooleanTemplate.invoke_native1(&env, "or", &t, &f),
            NativeResult::Value(Value::Bool(true))
        ));
        assert!(matches!(
            BooleanTemplate.invoke_native_n(&env, "not", &f, &[]),
            NativeResult::Value(Value::Bool(true))
        ));
    }

    #[test]
    fn chars_render_and_compare() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let a = Value::Char('a');
        assert!(matches!(
            CharTemplate.invoke_native_n(&env, "toString", &a, &[]),
            NativeResult::Value(Value::String(ref s)) if &**s == "a"
        ));
        assert!(matches!(
            CharTemplate.invoke_native1(&env, "equals", &a, &Value::Char('a')),
            NativeResult::Value(Value::Bool(true))
        ));
    }
}
