//! The core classes every module starts with.
//!
//! Their ids are fixed, and `ConstantPool::new` interns their terminal types in id order, so
//! `TypeId(n)` is the type of `ClassId(n)` for every core class.

use crate::class::{
    ClassTable, Composition, Contribution, Format, ParentRef, PropertyStructure, TypeParamDecl,
};
use crate::method::MethodStructure;
use crate::param::Parameter;
use crate::pool::{ConstantPool, TypeId};
use crate::types::FormalType;
use crate::ClassId;

pub const OBJECT: ClassId = ClassId(0);
pub const MODULE: ClassId = ClassId(1);
pub const PACKAGE: ClassId = ClassId(2);
pub const CONST: ClassId = ClassId(3);
pub const SERVICE: ClassId = ClassId(4);
pub const ENUM: ClassId = ClassId(5);
pub const TUPLE: ClassId = ClassId(6);
pub const NULLABLE: ClassId = ClassId(7);
pub const NULL: ClassId = ClassId(8);
pub const BOOLEAN: ClassId = ClassId(9);
pub const INT: ClassId = ClassId(10);
pub const CHAR: ClassId = ClassId(11);
pub const STRING: ClassId = ClassId(12);
pub const ARRAY: ClassId = ClassId(13);
pub const APPENDER: ClassId = ClassId(14);
pub const STRING_BUFFER: ClassId = ClassId(15);
pub const EXCEPTION: ClassId = ClassId(16);
pub const ILLEGAL_STATE: ClassId = ClassId(17);
pub const OUT_OF_BOUNDS: ClassId = ClassId(18);
pub const ILLEGAL_ARGUMENT: ClassId = ClassId(19);
pub const OVERFLOW: ClassId = ClassId(20);
pub const DIVISION_BY_ZERO: ClassId = ClassId(21);

pub const CORE_CLASS_COUNT: u32 = 22;

const CORE_CLASSES: [(&str, Format); CORE_CLASS_COUNT as usize] = [
    ("Object", Format::Class),
    ("Module", Format::Interface),
    ("Package", Format::Interface),
    ("Const", Format::Interface),
    ("Service", Format::Interface),
    ("Enum", Format::Interface),
    ("Tuple", Format::Interface),
    ("Nullable", Format::Enum),
    ("Null", Format::EnumValue),
    ("Boolean", Format::Const),
    ("Int", Format::Const),
    ("Char", Format::Const),
    ("String", Format::Const),
    ("Array", Format::Class),
    ("Appender", Format::Interface),
    ("StringBuffer", Format::Class),
    ("Exception", Format::Class),
    ("IllegalState", Format::Class),
    ("OutOfBounds", Format::Class),
    ("IllegalArgument", Format::Class),
    ("Overflow", Format::Class),
    ("DivisionByZero", Format::Class),
];

/// Whether `class` is one of the classes declared by [`bootstrap`].
pub fn is_core(class: ClassId) -> bool {
    class.0 < CORE_CLASS_COUNT
}

/// Declares the core classes into an empty table.
pub(crate) fn bootstrap(pool: &mut ConstantPool, classes: &mut ClassTable) {
    for (idx, (name, format)) in CORE_CLASSES.iter().enumerate() {
        let parent = (idx as u32 == NULL.0).then_some(ParentRef::Class(NULLABLE));
        let qualified = match parent {
            Some(_) => format!("Nullable.{name}"),
            None => (*name).to_string(),
        };
        let id = classes.insert_class(name, qualified, *format, parent);
        debug_assert_eq!(id, ClassId(idx as u32));
    }

    for (class, name) in [(TUPLE, "ElementTypes"), (ARRAY, "Element"), (APPENDER, "Element")] {
        classes
            .structure_mut(class)
            .type_params
            .push(TypeParamDecl {
                name: name.to_string(),
                constraint: TypeId::OBJECT,
            });
    }

    for (idx, (_, format)) in CORE_CLASSES.iter().enumerate() {
        let class = ClassId(idx as u32);
        if class != OBJECT && format.requires_extends() {
            extend(classes, class, superclass(class));
        }
    }
    for class in [BOOLEAN, INT, CHAR, STRING] {
        implement(classes, class, pool.class_type(CONST));
    }
    let char_appender = pool.parameterized(APPENDER, &[TypeId::CHAR]);
    implement(classes, STRING_BUFFER, char_appender);

    declare_members(pool, classes);
}

/// The single class a core class extends.
fn superclass(class: ClassId) -> TypeId {
    match class {
        NULL => TypeId::NULLABLE,
        ILLEGAL_STATE | OUT_OF_BOUNDS | ILLEGAL_ARGUMENT | OVERFLOW | DIVISION_BY_ZERO => {
            TypeId::EXCEPTION
        }
        _ => TypeId::OBJECT,
    }
}

fn extend(classes: &mut ClassTable, class: ClassId, ty: TypeId) {
    classes
        .structure_mut(class)
        .contributions
        .push(Contribution::new(Composition::Extends, ty));
}

fn implement(classes: &mut ClassTable, class: ClassId, ty: TypeId) {
    classes
        .structure_mut(class)
        .contributions
        .push(Contribution::new(Composition::Implements, ty));
}

fn native(
    classes: &mut ClassTable,
    class: ClassId,
    name: &str,
    params: &[TypeId],
    returns: &[TypeId],
) {
    let params = params
        .iter()
        .enumerate()
        .map(|(idx, ty)| Parameter::value(format!("p{idx}"), *ty))
        .collect();
    let returns = returns.iter().map(|ty| Parameter::ret(*ty)).collect();
    let method = MethodStructure::declared(name, params, returns).as_native();
    classes.insert_method(class, method);
}

fn declare_members(pool: &mut ConstantPool, classes: &mut ClassTable) {
    use TypeId as T;

    native(classes, OBJECT, "toString", &[], &[T::STRING]);

    native(classes, BOOLEAN, "not", &[], &[T::BOOLEAN]);
    for op in ["and", "or", "equals"] {
        native(classes, BOOLEAN, op, &[T::BOOLEAN], &[T::BOOLEAN]);
    }
    native(classes, BOOLEAN, "toString", &[], &[T::STRING]);

    for op in ["add", "sub", "mul", "div", "mod"] {
        native(classes, INT, op, &[T::INT], &[T::INT]);
    }
    native(classes, INT, "negate", &[], &[T::INT]);
    native(classes, INT, "compare", &[T::INT], &[T::INT]);
    native(classes, INT, "equals", &[T::INT], &[T::BOOLEAN]);
    native(classes, INT, "hashCode", &[], &[T::INT]);
    native(classes, INT, "toString", &[], &[T::STRING]);

    native(classes, CHAR, "equals", &[T::CHAR], &[T::BOOLEAN]);
    native(classes, CHAR, "toString", &[], &[T::STRING]);

    classes.insert_property(STRING, PropertyStructure::new("size", T::INT).readonly());
    native(classes, STRING, "add", &[T::OBJECT], &[T::STRING]);
    native(classes, STRING, "equals", &[T::STRING], &[T::BOOLEAN]);
    native(classes, STRING, "compare", &[T::STRING], &[T::INT]);
    native(classes, STRING, "hashCode", &[], &[T::INT]);
    native(classes, STRING, "toString", &[], &[T::STRING]);
    native(classes, STRING, "charAt", &[T::INT], &[T::CHAR]);

    let element = pool.formal(FormalType::TypeParam {
        class: ARRAY,
        name: "Element".to_string(),
        index: 0,
    });
    let array = pool.parameterized(ARRAY, &[element]);
    classes.insert_property(ARRAY, PropertyStructure::new("size", T::INT).readonly());
    native(classes, ARRAY, "getElement", &[T::INT], &[element]);
    native(classes, ARRAY, "setElement", &[T::INT, element], &[]);
    native(classes, ARRAY, "add", &[element], &[array]);

    let element = pool.formal(FormalType::TypeParam {
        class: APPENDER,
        name: "Element".to_string(),
        index: 0,
    });
    let appender = pool.parameterized(APPENDER, &[element]);
    let add = MethodStructure::declared(
        "add",
        vec![Parameter::value("element", element)],
        vec![Parameter::ret(appender)],
    )
    .as_abstract();
    classes.insert_method(APPENDER, add);

    native(classes, STRING_BUFFER, "add", &[T::CHAR], &[T::STRING_BUFFER]);
    native(classes, STRING_BUFFER, "addAll", &[T::STRING], &[T::STRING_BUFFER]);
    native(classes, STRING_BUFFER, "toString", &[], &[T::STRING]);

    classes.insert_property(EXCEPTION, PropertyStructure::new("message", T::STRING));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relation;
    use crate::Module;

    #[test]
    fn core_ids_match_names() {
        let module = Module::new("test");
        assert_eq!(module.class_id("Object"), Some(OBJECT));
        assert_eq!(module.class_id("Nullable.Null"), Some(NULL));
        assert_eq!(module.class_id("DivisionByZero"), Some(DIVISION_BY_ZERO));
        assert_eq!(module.classes.class_count(), CORE_CLASS_COUNT as usize);
        assert!(is_core(STRING));
    }

    #[test]
    fn exceptions_extend_exception() {
        let mut module = Module::new("test");
        let overflow = module.pool.class_type(OVERFLOW);
        let mut ts = module.type_system();
        assert_eq!(ts.calculate_relation(TypeId::EXCEPTION, overflow), Relation::IsA);
        assert_eq!(ts.calculate_relation(overflow, TypeId::EXCEPTION), Relation::Incompatible);
    }

    #[test]
    fn exceptions_extend_exactly_once() {
        let module = Module::new("test");
        let extends: Vec<_> = module
            .classes
            .class(ILLEGAL_STATE)
            .contributions()
            .iter()
            .filter(|c| c.composition == Composition::Extends)
            .map(|c| c.ty)
            .collect();
        assert_eq!(extends, vec![TypeId::EXCEPTION]);
    }

    #[test]
    fn string_buffer_is_a_char_appender() {
        let mut module = Module::new("test");
        let mut ts = module.type_system();
        let appender = ts.pool().parameterized(APPENDER, &[TypeId::CHAR]);
        assert_eq!(ts.calculate_relation(appender, TypeId::STRING_BUFFER), Relation::IsA);
    }
}
