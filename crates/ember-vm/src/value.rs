use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ember_asm::{core, ClassId, ConstId};
use rustc_hash::FxHashMap;

use crate::context::ContextId;

pub type ObjectRef = Rc<RefCell<Object>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A heap instance of a user or core class.
#[derive(Debug)]
pub struct Object {
    pub class: ClassId,
    pub fields: FxHashMap<String, Value>,
}

impl Object {
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            fields: FxHashMap::default(),
        }
    }
}

/// A service instance: an object owned by its own context.
#[derive(Clone, Debug)]
pub struct ServiceRef {
    pub context: ContextId,
    pub object: ObjectRef,
}

/// A runtime value.
///
/// Primitive values compare by content; references compare by identity.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Char(char),
    String(Rc<str>),
    Array(ArrayRef),
    /// A `StringBuffer`.
    Buffer(Rc<RefCell<String>>),
    Object(ObjectRef),
    Service(ServiceRef),
    /// A pool constant with no runtime representation of its own (types, identities).
    Constant(ConstId),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Self {
        Value::String(text.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// An instance of an exception class carrying `message`.
    pub fn exception(class: ClassId, message: impl Into<Rc<str>>) -> Self {
        let mut object = Object::new(class);
        object
            .fields
            .insert("message".to_string(), Value::String(message.into()));
        Value::object(object)
    }

    /// The runtime class used for dispatch.
    pub fn class(&self) -> ClassId {
        match self {
            Value::Null => core::NULL,
            Value::Bool(_) => core::BOOLEAN,
            Value::Int(_) => core::INT,
            Value::Char(_) => core::CHAR,
            Value::String(_) => core::STRING,
            Value::Array(_) => core::ARRAY,
            Value::Buffer(_) => core::STRING_BUFFER,
            Value::Object(object) => object.borrow().class,
            Value::Service(service) => service.object.borrow().class,
            Value::Constant(_) => core::OBJECT,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Int",
            Value::Char(_) => "Char",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Buffer(_) => "StringBuffer",
            Value::Object(_) => "Object",
            Value::Service(_) => "Service",
            Value::Constant(_) => "Constant",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// The object behind an instance or a service.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            Value::Service(service) => Some(&service.object),
            _ => None,
        }
    }

    /// The `message` field of an exception instance.
    pub fn message(&self) -> Option<String> {
        let object = self.as_object()?.borrow();
        match object.fields.get("message") {
            Some(Value::String(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    /// Whether the value has a textual form without running code.
    pub(crate) fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Char(_)
                | Value::String(_)
                | Value::Buffer(_)
        )
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Buffer(a), Value::Buffer(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Service(a), Value::Service(b)) => Rc::ptr_eq(&a.object, &b.object),
            (Value::Constant(a), Value::Constant(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Char(value) => write!(f, "{value}"),
            Value::String(text) => f.write_str(text),
            Value::Buffer(buffer) => f.write_str(&buffer.borrow()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.borrow().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(object) => write!(f, "<object #{}>", object.borrow().class.0),
            Value::Service(service) => write!(
                f,
                "<service #{} @{}>",
                service.object.borrow().class.0,
                service.context.0
            ),
            Value::Constant(id) => write!(f, "<constant #{}>", id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_compare_by_content() {
        assert_eq!(Value::string("abc"), Value::string(String::from("abc")));
        assert_ne!(Value::Int(1), Value::Bool(true));
    }

    #[test]
    fn references_compare_by_identity() {
        let a = Value::object(Object::new(core::OBJECT));
        let b = Value::object(Object::new(core::OBJECT));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn exceptions_carry_their_message() {
        let exception = Value::exception(core::OVERFLOW, "too big");
        assert_eq!(exception.class(), core::OVERFLOW);
        assert_eq!(exception.message().as_deref(), Some("too big"));
    }

    #[test]
    fn arrays_display_their_items() {
        let array = Value::array(vec![Value::Int(1), Value::Char('x')]);
        assert_eq!(array.to_string(), "[1, x]");
    }
}
