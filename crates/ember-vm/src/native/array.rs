use ember_asm::core;

use super::{NativeEnv, NativeResult, NativeTemplate};
use crate::value::{ArrayRef, Value};

pub struct ArrayTemplate;

fn bounds(items: &ArrayRef, index: i64) -> Result<usize, NativeResult> {
    let len = items.borrow().len();
    usize::try_from(index)
        .ok()
        .filter(|idx| *idx < len)
        .ok_or_else(|| {
            NativeResult::exception(
                core::OUT_OF_BOUNDS,
                format!("index {index} out of bounds for Array of size {len}"),
            )
        })
}

impl NativeTemplate for ArrayTemplate {
    fn invoke_native_get(&self, env: &NativeEnv<'_>, property: &str, target: &Value) -> NativeResult {
        match (property, target) {
            ("size", Value::Array(items)) => NativeResult::int(items.borrow().len() as i64),
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
        let Value::Array(items) = target else {
            return env.mismatch(method, "Array", target);
        };
        match (method, args) {
            ("getElement", [Value::Int(index)]) => match bounds(items, *index) {
                Ok(idx) => NativeResult::Value(items.borrow()[idx].clone()),
                Err(exception) => exception,
            },
            ("setElement", [Value::Int(index), value]) => match bounds(items, *index) {
                Ok(idx) => {
                    items.borrow_mut()[idx] = value.clone();
                    NativeResult::Value(Value::Null)
                }
                Err(exception) => exception,
            },
            ("add", [value]) => {
                items.borrow_mut().push(value.clone());
                NativeResult::Value(target.clone())
            }
            ("toString", []) => NativeResult::string(target.to_string()),
            ("getElement" | "setElement", [index, ..]) => env.mismatch(method, "an Int index", index),
            _ => env.unknown(target, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_asm::Module;

    #[test]
    fn elements_are_bounds_checked() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let array = Value::array(vec![Value::Int(1), Value::Int(2)]);

        assert!(matches!(
            ArrayTemplate.invoke_native1(&env, "getElement", &array, &Value::Int(1)),
            NativeResult::Value(Value::Int(2))
        ));
        for index in [-1, 2] {
            let NativeResult::Exception(exception) =
                ArrayTemplate.invoke_native1(&env, "getElement", &array, &Value::Int(index))
            else {
                panic!("expected an exception for {index}");
            };
            assert_eq!(exception.class(), core::OUT_OF_BOUNDS);
        }
    }

    #[test]
    fn set_and_add_mutate_in_place() {
        let module = Module::new("test");
        let env = NativeEnv { module: &module };
        let array = Value::array(vec![Value::Int(1)]);
        ArrayTemplate.invoke_native_n(&env, "setElement", &array, &[Value::Int(0), Value::Int(5)]);
        ArrayTemplate.invoke_native1(&env, "add", &array, &Value::Int(6));
        assert_eq!(array.to_string(), "[5, 6]");
        assert!(matches!(
            ArrayTemplate.invoke_native_get(&env, "size", &array),
            NativeResult::Value(Value::Int(2))
        ));
    }
}
