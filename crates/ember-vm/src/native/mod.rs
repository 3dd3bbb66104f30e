//! Native method implementations, keyed by the qualified name of the declaring class.

mod array;
mod int;
mod object;
mod primitive;
mod text;

use std::rc::Rc;

use ember_asm::{core, ClassId, Module};
use rustc_hash::FxHashMap;

use crate::value::Value;

pub(crate) use int::binary as int_binary;

pub use array::ArrayTemplate;
pub use int::IntTemplate;
pub use object::ObjectTemplate;
pub use primitive::{BooleanTemplate, CharTemplate};
pub use text::{StringBufferTemplate, StringTemplate};

/// The outcome of a native method.
#[derive(Clone, Debug)]
pub enum NativeResult {
    Value(Value),
    /// Continue by calling an in-language method; its result becomes the native's result.
    Call(NativeCall),
    /// Raise an in-language exception.
    Exception(Value),
}

impl NativeResult {
    pub fn exception(class: ClassId, message: impl Into<Rc<str>>) -> Self {
        NativeResult::Exception(Value::exception(class, message))
    }

    pub fn bool(value: bool) -> Self {
        NativeResult::Value(Value::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        NativeResult::Value(Value::Int(value))
    }

    pub fn string(text: impl Into<Rc<str>>) -> Self {
        NativeResult::Value(Value::string(text))
    }
}

/// An in-language call requested by a native.
#[derive(Clone, Debug)]
pub struct NativeCall {
    pub target: Value,
    pub name: String,
    pub args: Vec<Value>,
    /// When set, the call's result is rendered and appended to this text.
    pub append_to: Option<Rc<str>>,
}

/// What a native can see of the runtime.
pub struct NativeEnv<'a> {
    pub module: &'a Module,
}

impl NativeEnv<'_> {
    pub fn class_name(&self, class: ClassId) -> &str {
        match self.module.classes.get_class(class) {
            Some(structure) => structure.qualified_name(),
            None => "?",
        }
    }

    /// Exception for a member the template does not implement.
    pub fn unknown(&self, target: &Value, member: &str) -> NativeResult {
        NativeResult::exception(
            core::ILLEGAL_ARGUMENT,
            format!("{} has no native member `{member}`", self.class_name(target.class())),
        )
    }

    /// Exception for an argument of the wrong kind.
    pub fn mismatch(&self, member: &str, expected: &str, actual: &Value) -> NativeResult {
        NativeResult::exception(
            core::ILLEGAL_ARGUMENT,
            format!("`{member}` expects {expected}, got {}", actual.kind()),
        )
    }
}

/// Native behavior of one class.
///
/// Implementations dispatch on the member name. Static natives receive `Value::Null` as the
/// target and all operands in `args`.
pub trait NativeTemplate: 'static {
    /// Reads a native property.
    fn invoke_native_get(&self, env: &NativeEnv<'_>, property: &str, target: &Value) -> NativeResult {
        env.unknown(target, property)
    }

    /// Calls a native method taking one argument.
    fn invoke_native1(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        arg: &Value,
    ) -> NativeResult {
        self.invoke_native_n(env, method, target, std::slice::from_ref(arg))
    }

    /// Calls a native method taking any number of arguments.
    fn invoke_native_n(
        &self,
        env: &NativeEnv<'_>,
        method: &str,
        target: &Value,
        args: &[Value],
    ) -> NativeResult;
}

/// Native templates registered per class name.
pub struct NativeRegistry {
    templates: FxHashMap<String, Box<dyn NativeTemplate>>,
}

impl NativeRegistry {
    pub fn empty() -> Self {
        Self {
            templates: FxHashMap::default(),
        }
    }

    /// A registry with the templates of the core classes.
    pub fn with_core() -> Self {
        let mut registry = Self::empty();
        registry.register("Object", ObjectTemplate);
        registry.register("Boolean", BooleanTemplate);
        registry.register("Int", IntTemplate);
        registry.register("Char", CharTemplate);
        registry.register("String", StringTemplate);
        registry.register("Array", ArrayTemplate);
        registry.register("StringBuffer", StringBufferTemplate);
        registry
    }

    pub fn register(&mut self, class: impl Into<String>, template: impl NativeTemplate) {
        self.templates.insert(class.into(), Box::new(template));
    }

    pub fn get(&self, class: &str) -> Option<&dyn NativeTemplate> {
        self.templates.get(class).map(|t| t.as_ref())
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::with_core()
    }
}

/// The operand of a native: the target for instance calls, the first argument for static ones.
pub(crate) fn operands<'v>(target: &'v Value, args: &'v [Value]) -> (&'v Value, &'v [Value]) {
    match (target, args) {
        (Value::Null, [first, rest @ ..]) => (first, rest),
        _ => (target, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_templates_are_registered() {
        let registry = NativeRegistry::with_core();
        for name in ["Object", "Int", "String", "Array", "StringBuffer"] {
            assert!(registry.get(name).is_some(), "{name}");
        }
        assert!(registry.get("geo.Point").is_none());
    }

    #[test]
    fn static_calls_take_their_operand_from_the_arguments() {
        let args = [Value::Int(1), Value::Int(2)];
        let (left, rest) = operands(&Value::Null, &args);
        assert_eq!(left, &Value::Int(1));
        assert_eq!(rest, &[Value::Int(2)]);

        let (left, rest) = operands(&Value::Int(5), &args[..1]);
        assert_eq!(left, &Value::Int(5));
        assert_eq!(rest.len(), 1);
    }
}
